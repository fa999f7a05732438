//! Harvest configuration.
//!
//! A [`HarvestConfig`] is loaded from an optional YAML file, then overridden by
//! command-line flags and environment variables (see [`crate::cli::Cli`]). The
//! resulting value is passed explicitly to every component that needs it.
//!
//! # Example
//!
//! ```yaml
//! storage_root: /var/lib/harvest
//! worker_count: 8
//! dedup_scope: current_run
//! backoffice_url: https://backoffice.example/api
//! sink_retries: 5
//! http:
//!   user_agent: "Mozilla/5.0 (compatible; outlet_harvest)"
//!   timeout_secs: 20
//!   headers:
//!     Accept-Language: en-US
//! ```

use crate::cli::Cli;
use crate::error::ConfigError;
use crate::pool::DEFAULT_WORKERS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Which persisted collections a dedup lookup can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// Only the collection created by the current outlet run.
    CurrentRun,
    /// Every collection under the storage root.
    #[default]
    AllHistory,
}

/// Settings for the HTTP client used by the extraction service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSettings {
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "Accept".to_string(),
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        );
        headers.insert("Accept-Language".to_string(), "en-US,en;q=0.5".to_string());
        Self {
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
            headers,
            timeout_secs: 30,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Directory holding one `.db.json` collection per outlet run.
    pub storage_root: PathBuf,
    /// Item workers per outlet.
    pub worker_count: usize,
    /// Outlets harvested at once; `None` means available parallelism.
    pub outlet_concurrency: Option<usize>,
    pub dedup_scope: DedupScope,
    /// Base URL of the backoffice API serving outlets and receiving sessions.
    pub backoffice_url: Option<String>,
    pub api_token: Option<String>,
    /// Read outlets from this YAML file instead of the backoffice.
    pub outlets_file: Option<PathBuf>,
    /// Extra attempts when posting a session report.
    pub sink_retries: usize,
    pub http: HttpSettings,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./storage"),
            worker_count: DEFAULT_WORKERS,
            outlet_concurrency: None,
            dedup_scope: DedupScope::default(),
            backoffice_url: None,
            api_token: None,
            outlets_file: None,
            sink_retries: 3,
            http: HttpSettings::default(),
        }
    }
}

impl HarvestConfig {
    /// Read a YAML config file. Missing keys keep their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Build the effective configuration: file (if any), then CLI overrides.
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(cli);
        config.validate()?;
        debug!(?config, "Resolved configuration");
        Ok(config)
    }

    fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(root) = &cli.storage_root {
            self.storage_root = root.clone();
        }
        if let Some(workers) = cli.workers {
            self.worker_count = workers;
        }
        if let Some(scope) = cli.dedup_scope {
            self.dedup_scope = scope;
        }
        if let Some(file) = &cli.outlets_file {
            self.outlets_file = Some(file.clone());
        }
        if let Some(url) = &cli.backoffice_url {
            self.backoffice_url = Some(url.clone());
        }
        if let Some(token) = &cli.api_token {
            self.api_token = Some(token.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.outlet_concurrency == Some(0) {
            return Err(ConfigError::Invalid {
                field: "outlet_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.outlets_file.is_none() && self.backoffice_url.is_none() {
            return Err(ConfigError::Invalid {
                field: "backoffice_url",
                reason: "either backoffice_url or outlets_file is required".to_string(),
            });
        }
        if let Some(url) = &self.backoffice_url {
            url::Url::parse(url).map_err(|e| ConfigError::Invalid {
                field: "backoffice_url",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn outlet_concurrency(&self) -> usize {
        self.outlet_concurrency.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}
