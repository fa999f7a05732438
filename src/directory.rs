//! Where the list of outlets comes from.
//!
//! - [`BackofficeDirectory`]: the backoffice API, `GET /outletssources?filters[active]=true`
//! - [`FileDirectory`]: a local YAML list, for offline runs
//!
//! Both return only active outlets. Eligibility of an outlet's URL is checked
//! later, per outlet, by the orchestrator.

use crate::error::DirectoryError;
use crate::models::Outlet;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, instrument};

#[async_trait]
pub trait OutletDirectory: Send + Sync {
    async fn list_active_outlets(&self) -> Result<Vec<Outlet>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct OutletListing {
    data: Vec<Outlet>,
}

#[derive(Debug, Clone)]
pub struct BackofficeDirectory {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl BackofficeDirectory {
    pub fn new(client: reqwest::Client, base_url: &str, token: Option<String>) -> Self {
        let endpoint = format!(
            "{}/outletssources?{}=true",
            base_url.trim_end_matches('/'),
            urlencoding::encode("filters[active]")
        );
        Self {
            client,
            endpoint,
            token,
        }
    }
}

#[async_trait]
impl OutletDirectory for BackofficeDirectory {
    #[instrument(level = "info", skip_all, fields(endpoint = %self.endpoint))]
    async fn list_active_outlets(&self) -> Result<Vec<Outlet>, DirectoryError> {
        let mut request = self.client.get(&self.endpoint);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let body = request.send().await?.error_for_status()?.text().await?;
        let listing: OutletListing =
            serde_json::from_str(&body).map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        let outlets: Vec<Outlet> = listing.data.into_iter().filter(|o| o.active).collect();
        info!(count = outlets.len(), "Fetched active outlets");
        Ok(outlets)
    }
}

/// Outlets listed in a YAML file:
///
/// ```yaml
/// - name: Wire
///   url: https://wire.example/
/// - name: Paused
///   url: https://paused.example/
///   active: false
/// ```
#[derive(Debug, Clone)]
pub struct FileDirectory {
    path: PathBuf,
}

impl FileDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl OutletDirectory for FileDirectory {
    #[instrument(level = "info", skip_all, fields(path = %self.path.display()))]
    async fn list_active_outlets(&self) -> Result<Vec<Outlet>, DirectoryError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| DirectoryError::Io {
                path: self.path.clone(),
                source,
            })?;
        let outlets: Vec<Outlet> =
            serde_yaml::from_str(&raw).map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        let outlets: Vec<Outlet> = outlets.into_iter().filter(|o| o.active).collect();
        info!(count = outlets.len(), "Loaded active outlets");
        Ok(outlets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_backoffice_directory_filters_inactive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/outletssources"))
            .and(query_param("filters[active]", "true"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": 1, "name": "Wire", "url": "https://wire.example", "active": true},
                    {"id": 2, "name": "Paused", "url": "https://paused.example", "active": false},
                    {"id": 3, "name": "Blank", "url": "", "active": true}
                ],
                "meta": {}
            })))
            .mount(&server)
            .await;

        let directory = BackofficeDirectory::new(
            reqwest::Client::new(),
            &format!("{}/api", server.uri()),
            Some("token".to_string()),
        );
        let outlets = directory.list_active_outlets().await.unwrap();
        let names: Vec<_> = outlets.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Wire", "Blank"]);
    }

    #[tokio::test]
    async fn test_backoffice_directory_keeps_listing_with_null_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/outletssources"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": 1, "name": "Wire", "url": "https://wire.example", "active": true},
                    {"id": 2, "name": "NoUrl", "url": null, "active": true}
                ]
            })))
            .mount(&server)
            .await;

        let directory = BackofficeDirectory::new(reqwest::Client::new(), &server.uri(), None);
        let outlets = directory.list_active_outlets().await.unwrap();
        assert_eq!(
            outlets,
            vec![
                Outlet::new("Wire", "https://wire.example"),
                Outlet::new("NoUrl", ""),
            ]
        );
        assert!(!outlets[1].is_eligible());
    }

    #[tokio::test]
    async fn test_backoffice_directory_malformed_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        let directory = BackofficeDirectory::new(reqwest::Client::new(), &server.uri(), None);
        assert!(matches!(
            directory.list_active_outlets().await,
            Err(DirectoryError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_backoffice_directory_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let directory = BackofficeDirectory::new(reqwest::Client::new(), &server.uri(), None);
        assert!(matches!(
            directory.list_active_outlets().await,
            Err(DirectoryError::Http(_))
        ));
    }

    #[tokio::test]
    async fn test_file_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("outlets.yaml");
        std::fs::write(
            &file,
            "- name: Wire\n  url: https://wire.example/\n- name: Paused\n  url: https://paused.example/\n  active: false\n",
        )
        .unwrap();
        let outlets = FileDirectory::new(&file).list_active_outlets().await.unwrap();
        assert_eq!(outlets, vec![Outlet::new("Wire", "https://wire.example/")]);

        let missing = FileDirectory::new(tmp.path().join("nope.yaml"));
        assert!(matches!(
            missing.list_active_outlets().await,
            Err(DirectoryError::Io { .. })
        ));
    }
}
