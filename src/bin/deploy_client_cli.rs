// src/bin/deploy_client_cli.rs

use dotenv::dotenv;
use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{format, row, Table};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::watch;
use tokio::time;
use tracing::{info, warn};

use deploy_client::error::format_wait;
use deploy_client::logging;
use deploy_client::{
    ApiRequest, ClientConfig, FileStateStore, MemoryStateStore, RateLimiter, RateLimiterConfig,
    ReqwestTransport, RequestExecutor, RequestOptions, StateStore, TenantStatus,
};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "deploy_client_cli",
    about = "Signed, rate limited calls against the deployment API"
)]
struct Opt {
    /// Rate limiter state file (overrides DEPLOY_RATE_LIMIT_STATE_PATH)
    #[structopt(long, parse(from_os_str))]
    state_file: Option<PathBuf>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Show persisted rate limiter state per tenant
    Status {
        #[structopt(long)]
        tenant: Option<String>,

        /// Print JSON instead of a table
        #[structopt(long)]
        json: bool,
    },

    /// Clear rate limiter state for one tenant, or all of them
    Reset {
        #[structopt(long)]
        tenant: Option<String>,
    },

    /// Drive an in-memory limiter and summarise its decisions
    Simulate {
        #[structopt(long, default_value = "demo")]
        tenant: String,

        #[structopt(short = "n", long, default_value = "100")]
        requests: usize,

        /// Time between requests in milliseconds
        #[structopt(short = "t", long, default_value = "100")]
        interval_ms: u64,
    },

    /// Signed GET, e.g. `get projects/<id>/environments`
    Get {
        path: String,

        #[structopt(flatten)]
        call: CallOpts,
    },

    /// Signed POST with an optional JSON body
    Post {
        path: String,

        /// JSON request body
        #[structopt(long)]
        body: Option<String>,

        #[structopt(flatten)]
        call: CallOpts,
    },
}

#[derive(Debug, StructOpt)]
struct CallOpts {
    /// Tenant key for rate limiting (defaults to the project id)
    #[structopt(long)]
    tenant: Option<String>,

    #[structopt(long, default_value = "3")]
    max_retries: u32,

    /// Per-request timeout in seconds
    #[structopt(long, default_value = "30")]
    timeout_secs: u64,

    /// Give up after waiting this many seconds on local rate limits
    #[structopt(long)]
    max_wait_secs: Option<u64>,
}

impl CallOpts {
    fn options(&self) -> RequestOptions {
        let mut options = RequestOptions::default()
            .with_max_retries(self.max_retries)
            .with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(tenant) = &self.tenant {
            options = options.with_tenant(tenant.clone());
        }
        if let Some(secs) = self.max_wait_secs {
            options = options.with_max_rate_limit_wait(Duration::from_secs(secs));
        }
        options
    }
}

#[tokio::main]
async fn main() -> CliResult<()> {
    dotenv().ok();
    let opt = Opt::from_args();

    logging::init_with_default(match opt.verbose {
        0 => "deploy_client=info",
        1 => "deploy_client=debug",
        _ => "trace",
    });

    let mut config = RateLimiterConfig::from_env()?;
    if let Some(path) = &opt.state_file {
        config.state_path = path.clone();
    }

    // Flipped by ctrl-c; watched by long-running commands
    let (cancel_tx, cancel_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = cancel_tx.send(true);
    })?;

    match opt.cmd {
        Command::Status { tenant, json } => show_status(config, tenant, json).await,
        Command::Reset { tenant } => reset(config, tenant).await,
        Command::Simulate {
            tenant,
            requests,
            interval_ms,
        } => simulate(config, &tenant, requests, interval_ms, cancel_rx).await,
        Command::Get { path, call } => {
            execute(config, ApiRequest::get(path), &call, cancel_rx).await
        }
        Command::Post { path, body, call } => {
            let payload: Value = match body {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Object(Default::default()),
            };
            execute(config, ApiRequest::post(path, payload), &call, cancel_rx).await
        }
    }
}

async fn open_file_limiter(config: RateLimiterConfig) -> RateLimiter<FileStateStore> {
    let store = FileStateStore::new(config.state_path.clone());
    RateLimiter::open(config, store).await
}

async fn show_status(config: RateLimiterConfig, tenant: Option<String>, json: bool) -> CliResult<()> {
    let limiter = open_file_limiter(config).await;
    let tenants = match tenant {
        Some(t) => vec![t],
        None => limiter.tenants().await,
    };

    let mut statuses = Vec::with_capacity(tenants.len());
    for id in &tenants {
        let wait = limiter.get_suggested_wait_time(id).await;
        statuses.push((limiter.get_status(id).await, wait));
    }

    if json {
        let only: Vec<&TenantStatus> = statuses.iter().map(|(s, _)| s).collect();
        println!("{}", serde_json::to_string_pretty(&only)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No tenants tracked in {}", limiter.store().location());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row![
        "Tenant",
        "Last min",
        "Last hour",
        "Failures",
        "Backoff",
        "Throttled",
        "Suggested wait"
    ]);
    for (status, wait) in &statuses {
        table.add_row(row![
            status.tenant_id,
            format!("{}/{}", status.requests_last_minute, status.max_requests_per_minute),
            format!("{}/{}", status.requests_last_hour, status.max_requests_per_hour),
            status.consecutive_failures,
            remaining(status.backoff_remaining_ms),
            remaining(status.throttle_remaining_ms),
            format_wait(*wait)
        ]);
    }
    table.printstd();
    Ok(())
}

fn remaining(ms: Option<u64>) -> String {
    ms.map(|ms| format_wait(Duration::from_millis(ms)))
        .unwrap_or_else(|| "-".to_string())
}

async fn reset(config: RateLimiterConfig, tenant: Option<String>) -> CliResult<()> {
    let limiter = open_file_limiter(config).await;
    limiter.reset(tenant.as_deref()).await;
    limiter.save().await?;
    println!(
        "Cleared {} in {}",
        tenant.as_deref().unwrap_or("all tenants"),
        limiter.store().location()
    );
    Ok(())
}

async fn simulate(
    config: RateLimiterConfig,
    tenant: &str,
    requests: usize,
    interval_ms: u64,
    cancel: watch::Receiver<bool>,
) -> CliResult<()> {
    let limiter = RateLimiter::new(config, MemoryStateStore::new());
    let interval = Duration::from_millis(interval_ms);
    let started = Instant::now();

    let pb = ProgressBar::new(requests as u64);
    pb.set_style(ProgressStyle::with_template(
        "{bar:40.cyan/blue} {pos}/{len} {msg}",
    )?);

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    for i in 0..requests {
        if *cancel.borrow() {
            pb.abandon_with_message("cancelled");
            break;
        }

        let decision = limiter.check_rate_limit(tenant, "simulate").await;
        let label = match decision.reason {
            None => {
                limiter
                    .record_request(tenant, &format!("simulate-{}", i))
                    .await;
                "allowed"
            }
            Some(reason) => reason.as_str(),
        };
        *outcomes.entry(label).or_default() += 1;

        pb.set_message(label);
        pb.inc(1);
        time::sleep(interval).await;
    }
    pb.finish_and_clear();

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    table.set_titles(row!["Outcome", "Count"]);
    for (label, count) in &outcomes {
        table.add_row(row![label, count]);
    }
    table.printstd();

    let status = limiter.get_status(tenant).await;
    println!(
        "\n{} requests in {:?}; {} recorded in the last minute, suggested wait {}",
        requests,
        started.elapsed(),
        status.requests_last_minute,
        format_wait(limiter.get_suggested_wait_time(tenant).await)
    );
    Ok(())
}

async fn execute(
    config: RateLimiterConfig,
    request: ApiRequest,
    call: &CallOpts,
    mut cancel: watch::Receiver<bool>,
) -> CliResult<()> {
    let client_config = ClientConfig::from_env();
    let credentials = client_config.require_credentials()?.clone();

    let limiter = open_file_limiter(config).await;
    let cleanup = limiter.spawn_cleanup();
    let executor = RequestExecutor::new(
        ReqwestTransport::new()?,
        limiter.clone(),
        client_config,
    );
    let options = call.options();

    info!(operation = %request.operation(), "Sending request");
    let outcome = tokio::select! {
        result = executor.execute(&credentials, &request, &options) => Some(result),
        _ = cancel.wait_for(|cancelled| *cancelled) => None,
    };

    cleanup.stop().await;
    limiter.shutdown().await;

    match outcome {
        Some(Ok(value)) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Some(Err(e)) => Err(e.into()),
        None => {
            warn!("Request cancelled");
            Err("cancelled".into())
        }
    }
}
