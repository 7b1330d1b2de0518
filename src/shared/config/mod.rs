//! Application configuration module
//!
//! Provides the configuration consumed by the backend selector, the
//! optimistic update manager and the request lifecycle controller.
//!
//! Configuration can be assembled with [`AppConfigBuilder`] or read from a
//! TOML document:
//!
//! ```rust
//! use mealsync::shared::config::AppConfig;
//!
//! let config = AppConfig::from_toml_str(r#"
//!     remote_url = "https://api.example.com"
//!     max_retries = 5
//! "#).unwrap();
//!
//! assert!(config.is_remote_configured());
//! assert_eq!(config.max_retries, 5);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default rollback timeout for a pending optimistic update
pub const DEFAULT_ROLLBACK_TIMEOUT_MS: u64 = 30_000;
/// Default budget for a single backend call
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
/// Default time a successful update stays visible before eviction
pub const DEFAULT_SUCCESS_GRACE_MS: u64 = 1_500;
/// Default retry attempts after the initial failure
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default first backoff delay
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;
/// Default backoff ceiling
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 10_000;
/// Default number of settled updates kept for debugging
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// What to do when an identical operation is already in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Every call runs on its own
    Off,
    /// Later callers share the in-flight call's result
    #[default]
    Join,
    /// Later callers are refused with a duplicate-request error
    Reject,
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the remote store, `None` when only the local store is used
    pub remote_url: Option<String>,
    /// Project key sent with every remote request
    pub api_key: Option<String>,
    /// Location of the embedded database file
    pub local_db_path: Option<PathBuf>,
    /// Runtime switch for the remote store
    pub remote_enabled: bool,
    /// Forced rollback deadline for pending updates
    pub rollback_timeout_ms: u64,
    /// Hard timeout for a single backend call
    pub request_timeout_ms: u64,
    /// How long a successful update stays in the active set
    pub success_grace_ms: u64,
    /// Retry attempts after the initial failure
    pub max_retries: u32,
    /// First backoff delay
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling
    pub retry_max_delay_ms: u64,
    /// Settled updates retained in history
    pub history_limit: usize,
    /// Deduplication of identical in-flight calls
    pub dedup: DedupPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: None,
            local_db_path: None,
            remote_enabled: true,
            rollback_timeout_ms: DEFAULT_ROLLBACK_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            success_grace_ms: DEFAULT_SUCCESS_GRACE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            dedup: DedupPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&source)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        let non_zero = [
            ("rollback_timeout_ms", self.rollback_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("retry_base_delay_ms", self.retry_base_delay_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry_max_delay_ms",
                reason: "must not be lower than retry_base_delay_ms".to_string(),
            });
        }
        Ok(())
    }

    /// Whether a remote store is configured and switched on
    pub fn is_remote_configured(&self) -> bool {
        self.remote_enabled && self.remote_url.is_some()
    }

    pub fn rollback_timeout(&self) -> Duration {
        Duration::from_millis(self.rollback_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn success_grace(&self) -> Duration {
        Duration::from_millis(self.success_grace_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the remote store URL
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_url = Some(url.into());
        self
    }

    /// Set the remote project key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Set the embedded database location
    pub fn local_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.local_db_path = Some(path.into());
        self
    }

    /// Switch the remote store on or off
    pub fn remote_enabled(mut self, enabled: bool) -> Self {
        self.config.remote_enabled = enabled;
        self
    }

    pub fn rollback_timeout(mut self, timeout: Duration) -> Self {
        self.config.rollback_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn success_grace(mut self, grace: Duration) -> Self {
        self.config.success_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set retry attempts and backoff bounds
    pub fn retry(mut self, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.config.max_retries = max_retries;
        self.config.retry_base_delay_ms = base_delay.as_millis() as u64;
        self.config.retry_max_delay_ms = max_delay.as_millis() as u64;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    pub fn dedup(mut self, policy: DedupPolicy) -> Self {
        self.config.dedup = policy;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("could not parse configuration: {0}")]
    Parse(String),
    #[error("could not read configuration: {0}")]
    Io(String),
}
