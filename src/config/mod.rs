mod file_config;

pub use file_config::{ConnectionConfig, FileConfig};

use anyhow::{bail, Result};
use clap::ValueEnum;
use std::time::Duration;

use crate::lifecycle::Identity;
use crate::notifications::{DeleteFailurePolicy, DeliverySettings};
use crate::push::DEFAULT_DESTINATION;

/// Default page size of the REST snapshot.
pub const DEFAULT_SNAPSHOT_LIMIT: usize = 50;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub api_base_url: Option<String>,
    pub ws_url: Option<String>,
    pub user_id: Option<String>,
    pub token: Option<String>,
    pub snapshot_limit: usize,
    pub request_timeout_sec: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            ws_url: None,
            user_id: None,
            token: None,
            snapshot_limit: DEFAULT_SNAPSHOT_LIMIT,
            request_timeout_sec: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base_url: String,
    pub ws_url: String,
    /// Present when both a user id and a token were configured.
    pub identity: Option<Identity>,
    pub snapshot_limit: usize,
    pub request_timeout: Duration,
    pub delete_failure_policy: DeleteFailurePolicy,

    pub connection: ConnectionSettings,
    pub delivery: DeliverySettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let api_base_url = file
            .api_base_url
            .or_else(|| cli.api_base_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("api_base_url must be specified via --api-url or in config file")
            })?;
        if !(api_base_url.starts_with("http://") || api_base_url.starts_with("https://")) {
            bail!("api_base_url must be an http(s) URL: {}", api_base_url);
        }

        let ws_url = file
            .ws_url
            .or_else(|| cli.ws_url.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("ws_url must be specified via --ws-url or in config file")
            })?;
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            bail!("ws_url must be a ws(s) URL: {}", ws_url);
        }

        let user_id = file.user_id.or_else(|| cli.user_id.clone());
        let token = file.token.or_else(|| cli.token.clone());
        let identity = match (user_id, token) {
            (Some(user_id), Some(token)) => Some(Identity::new(user_id, token)),
            (None, None) => None,
            _ => bail!("user_id and token must be provided together"),
        };

        let snapshot_limit = file.snapshot_limit.unwrap_or(cli.snapshot_limit);
        if snapshot_limit == 0 {
            bail!("snapshot_limit must be greater than zero");
        }

        let request_timeout =
            Duration::from_secs(file.request_timeout_sec.unwrap_or(cli.request_timeout_sec));

        let delete_failure_policy = match file.delete_failure_policy {
            Some(value) => match parse_delete_failure_policy(&value) {
                Some(policy) => policy,
                None => bail!("Unknown delete_failure_policy: {}", value),
            },
            None => DeleteFailurePolicy::default(),
        };

        let connection = ConnectionSettings::from_file(file.connection.unwrap_or_default());
        connection.validate()?;

        let delivery = file.delivery.unwrap_or_default();

        Ok(Self {
            api_base_url,
            ws_url,
            identity,
            snapshot_limit,
            request_timeout,
            delete_failure_policy,
            connection,
            delivery,
        })
    }
}

/// Push channel tuning.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Per-user destination to subscribe to.
    pub destination: String,
    pub heartbeat_interval: Duration,
    /// Missing heartbeats for `heartbeat_interval * factor` drop the session.
    pub heartbeat_timeout_factor: u32,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub backoff_jitter: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout_factor: 3,
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            backoff_jitter: Duration::from_millis(250),
        }
    }
}

impl ConnectionSettings {
    fn from_file(file: ConnectionConfig) -> Self {
        let defaults = Self::default();
        Self {
            destination: file.destination.unwrap_or(defaults.destination),
            heartbeat_interval: file
                .heartbeat_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.heartbeat_interval),
            heartbeat_timeout_factor: file
                .heartbeat_timeout_factor
                .unwrap_or(defaults.heartbeat_timeout_factor),
            connect_timeout: file
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            max_reconnect_attempts: file
                .max_reconnect_attempts
                .unwrap_or(defaults.max_reconnect_attempts),
            initial_backoff: file
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: file
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            backoff_multiplier: file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
            backoff_jitter: file
                .backoff_jitter_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_jitter),
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.silence_timeout(self.heartbeat_interval)
    }

    /// How long a session may stay silent when the server promised a
    /// heartbeat every `incoming`.
    pub fn silence_timeout(&self, incoming: Duration) -> Duration {
        incoming.saturating_mul(self.heartbeat_timeout_factor)
    }

    pub fn validate(&self) -> Result<()> {
        if self.destination.is_empty() {
            bail!("connection.destination must not be empty");
        }
        if self.heartbeat_interval.is_zero() {
            bail!("connection.heartbeat_interval_ms must be greater than zero");
        }
        if self.heartbeat_timeout_factor == 0 {
            bail!("connection.heartbeat_timeout_factor must be at least 1");
        }
        if self
            .heartbeat_interval
            .checked_mul(self.heartbeat_timeout_factor)
            .is_none()
        {
            bail!(
                "connection.heartbeat_interval_ms * heartbeat_timeout_factor overflows ({:?} * {})",
                self.heartbeat_interval,
                self.heartbeat_timeout_factor
            );
        }
        if self.connect_timeout.is_zero() {
            bail!("connection.connect_timeout_secs must be greater than zero");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            bail!(
                "connection.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            );
        }
        if self.initial_backoff > self.max_backoff {
            bail!("connection.initial_backoff_ms must not exceed max_backoff_ms");
        }
        Ok(())
    }
}

/// Uses clap's ValueEnum trait for parsing.
fn parse_delete_failure_policy(s: &str) -> Option<DeleteFailurePolicy> {
    DeleteFailurePolicy::from_str(s, true).ok()
}
