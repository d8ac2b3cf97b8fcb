//! Runtime configuration for the canteen POS core.
//!
//! Defaults are baked in; the embedding app may deserialize a `PosConfig`
//! from its own settings file, or overlay environment variables with
//! [`PosConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::api::normalize_base_url;
use crate::error::{PosError, Result};

pub const DEFAULT_API_BASE_URL: &str = "https://server.welfarecanteen.in/api";

const ENV_API_URL: &str = "CANTEEN_API_URL";
const ENV_DATA_DIR: &str = "CANTEEN_DATA_DIR";
const ENV_SYNC_INTERVAL: &str = "CANTEEN_SYNC_INTERVAL_SECS";
const ENV_REQUEST_TIMEOUT: &str = "CANTEEN_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PosConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connectivity_timeout_secs")]
    pub connectivity_timeout_secs: u64,
    /// Maximum completed walk-ins pushed per sync cycle.
    #[serde(default = "default_walkin_push_batch")]
    pub walkin_push_batch: usize,
    /// Printed at the top of every receipt.
    #[serde(default = "default_canteen_display_name")]
    pub canteen_display_name: String,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .or_else(|_| std::env::var("LOCALAPPDATA"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("in.welfarecanteen.pos")
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connectivity_timeout_secs() -> u64 {
    5
}

fn default_walkin_push_batch() -> usize {
    10
}

fn default_canteen_display_name() -> String {
    "Welfare Canteen".to_string()
}

impl Default for PosConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            data_dir: default_data_dir(),
            sync_interval_secs: default_sync_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connectivity_timeout_secs: default_connectivity_timeout_secs(),
            walkin_push_batch: default_walkin_push_batch(),
            canteen_display_name: default_canteen_display_name(),
        }
    }
}

impl PosConfig {
    /// Defaults overlaid with `CANTEEN_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(url) = env_non_empty(ENV_API_URL) {
            cfg.api_base_url = url;
        }
        if let Some(dir) = env_non_empty(ENV_DATA_DIR) {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = env_non_empty(ENV_SYNC_INTERVAL) {
            cfg.sync_interval_secs = parse_secs(ENV_SYNC_INTERVAL, &raw)?;
        }
        if let Some(raw) = env_non_empty(ENV_REQUEST_TIMEOUT) {
            cfg.request_timeout_secs = parse_secs(ENV_REQUEST_TIMEOUT, &raw)?;
        }

        cfg.validate()
    }

    /// Normalize the base URL and reject values the sync loop cannot run with.
    pub fn validate(mut self) -> Result<Self> {
        self.api_base_url = normalize_base_url(&self.api_base_url);
        if self.api_base_url.is_empty() {
            return Err(PosError::Config("api_base_url must not be empty".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(PosError::Config(
                "sync_interval_secs must be greater than zero".into(),
            ));
        }
        if self.walkin_push_batch == 0 {
            return Err(PosError::Config(
                "walkin_push_batch must be greater than zero".into(),
            ));
        }
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connectivity_timeout(&self) -> Duration {
        Duration::from_secs(self.connectivity_timeout_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn receipts_dir(&self) -> PathBuf {
        self.data_dir.join("receipts")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_secs(key: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|e| PosError::Config(format!("{key}={raw}: {e}")))
}
