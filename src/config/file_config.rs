use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::notifications::DeliverySettings;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub snapshot_limit: Option<usize>,
    pub request_timeout_sec: Option<u64>,
    /// "keep-local" or "resync"
    pub delete_failure_policy: Option<String>,

    // Sections
    pub connection: Option<ConnectionConfig>,
    pub delivery: Option<DeliverySettings>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub destination: Option<String>,
    pub heartbeat_interval_ms: Option<u64>,
    pub heartbeat_timeout_factor: Option<u32>,
    pub connect_timeout_secs: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub backoff_jitter_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
