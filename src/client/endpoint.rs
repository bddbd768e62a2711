// src/client/endpoint.rs

use reqwest::Url;

use crate::config::Credentials;
use crate::error::{ClientError, Result};

pub(crate) const DEFAULT_TENANT: &str = "default";

/// Join `path` onto `base`. The base is always treated as a directory.
pub fn build_url(base: &str, path: &str) -> Result<Url> {
    let mut base = base.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let base = Url::parse(&base)
        .map_err(|e| ClientError::Config(format!("invalid API url '{}': {}", base, e)))?;

    base.join(path.trim_start_matches('/'))
        .map_err(|e| ClientError::Config(format!("invalid request path '{}': {}", path, e)))
}

/// Path plus query of the resolved URL, exactly as it gets signed
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Id following a `projects` segment, e.g. `projects/<id>/environments`
pub fn tenant_from_path(path: &str) -> Option<&str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    segments.find(|s| s.eq_ignore_ascii_case("projects"))?;
    segments.next()
}

/// Explicit option, then the credentials' project, then the path, then "default"
pub fn resolve_tenant(explicit: Option<&str>, credentials: &Credentials, path: &str) -> String {
    explicit
        .or(credentials.project_id.as_deref())
        .or_else(|| tenant_from_path(path))
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_TENANT)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_keeps_base_path() {
        let url = build_url(
            "https://paasportal.episerver.net/api/v1.0",
            "/projects/p1/environments",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://paasportal.episerver.net/api/v1.0/projects/p1/environments"
        );
        assert_eq!(path_and_query(&url), "/api/v1.0/projects/p1/environments");
    }

    #[test]
    fn test_query_is_part_of_signed_path() {
        let url = build_url("http://localhost:8080/api/", "projects/p1/deployments?limit=5").unwrap();
        assert_eq!(path_and_query(&url), "/api/projects/p1/deployments?limit=5");
    }

    #[test]
    fn test_invalid_base_is_config_error() {
        let err = build_url("not a url", "projects").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_tenant_resolution_order() {
        let creds = Credentials::new("key", "c2VjcmV0");
        let path = "projects/from-path/environments";

        assert_eq!(tenant_from_path(path), Some("from-path"));
        assert_eq!(tenant_from_path("projects"), None);
        assert_eq!(tenant_from_path("/projects/abc?x=1"), Some("abc"));

        assert_eq!(resolve_tenant(Some("explicit"), &creds, path), "explicit");
        assert_eq!(resolve_tenant(None, &creds, path), "from-path");
        assert_eq!(resolve_tenant(None, &creds, "status"), DEFAULT_TENANT);

        let creds = creds.with_project("from-creds");
        assert_eq!(resolve_tenant(None, &creds, path), "from-creds");
    }
}
