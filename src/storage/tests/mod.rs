// src/storage/tests/mod.rs

mod file_tests;

// Behaviour every state store must share
pub(crate) mod common {
    use std::collections::HashMap;

    use crate::algorithms::{RequestEntry, SlidingWindowLog};
    use crate::error::Result;
    use crate::limiter::{PersistedSnapshot, ProjectLimiterState, ThrottleState};
    use crate::storage::StateStore;

    pub fn sample_snapshot(now: i64) -> PersistedSnapshot {
        let mut requests = SlidingWindowLog::new();
        requests.push(RequestEntry {
            timestamp: now - 5_000,
            operation: "GET projects/p1".to_string(),
            success: true,
        });

        let mut project_limits = HashMap::new();
        project_limits.insert(
            "p1".to_string(),
            ProjectLimiterState {
                requests,
                last_request: Some(now - 5_000),
                consecutive_failures: 2,
                backoff_until: Some(now + 2_000),
            },
        );

        let mut throttle_state = HashMap::new();
        throttle_state.insert(
            "p1".to_string(),
            ThrottleState {
                throttled_at: now,
                retry_after: now + 30_000,
                consecutive_throttles: 1,
                last_retry_after: 30_000,
            },
        );

        PersistedSnapshot {
            project_limits,
            throttle_state,
            saved_at: now,
        }
    }

    // Save, load and overwrite through any backend
    pub async fn test_save_load_overwrite<S: StateStore>(store: &S) -> Result<()> {
        assert_eq!(store.load().await?, None);

        let first = sample_snapshot(1_700_000_000_000);
        store.save(&first).await?;
        assert_eq!(store.load().await?, Some(first));

        let second = PersistedSnapshot {
            saved_at: 1_700_000_060_000,
            ..PersistedSnapshot::default()
        };
        store.save(&second).await?;
        assert_eq!(store.load().await?, Some(second));

        Ok(())
    }
}
