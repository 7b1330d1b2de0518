use crate::shared::config::{AppConfig, AppConfigBuilder, ConfigError};
use std::path::PathBuf;

/// Environment variable overriding the remote store URL
pub const ENV_REMOTE_URL: &str = "MEALSYNC_REMOTE_URL";
/// Environment variable overriding the remote project key
pub const ENV_API_KEY: &str = "MEALSYNC_API_KEY";
/// Environment variable overriding the embedded database location
pub const ENV_DB_PATH: &str = "MEALSYNC_DB_PATH";
/// Set to `1` to switch the remote store off
pub const ENV_REMOTE_DISABLED: &str = "MEALSYNC_REMOTE_DISABLED";

/// Client configuration: [`AppConfig`] with environment overrides applied.
#[derive(Debug, Clone)]
pub struct Config {
    app: AppConfig,
}

impl Default for Config {
    fn default() -> Self {
        let mut app = AppConfig::default();
        apply_env(&mut app);
        // A malformed env URL falls back to local-only storage.
        if let Err(err) = app.validate() {
            tracing::warn!("[Config] Ignoring invalid environment override: {}", err);
            app.remote_url = None;
        }
        Self { app }
    }
}

impl Config {
    /// Create a configuration from defaults and the environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from a builder, then apply the environment
    pub fn with_builder(builder: AppConfigBuilder) -> Result<Self, ConfigError> {
        let mut app = builder.build()?;
        apply_env(&mut app);
        app.validate()?;
        Ok(Self { app })
    }

    /// Use an already assembled configuration as-is
    pub fn from_app(app: AppConfig) -> Result<Self, ConfigError> {
        app.validate()?;
        Ok(Self { app })
    }

    pub fn app(&self) -> &AppConfig {
        &self.app
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.app.remote_url.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.app.api_key.as_deref()
    }

    /// Full URL for a remote API path; `None` without a remote store
    pub fn api_url(&self, path: &str) -> Option<String> {
        self.remote_url()
            .map(|base| format!("{}{}", base.trim_end_matches('/'), path))
    }

    /// Embedded database file, defaulting to the platform data directory
    pub fn local_db_path(&self) -> PathBuf {
        self.app
            .local_db_path
            .clone()
            .unwrap_or_else(default_db_path)
    }

    pub fn is_remote_configured(&self) -> bool {
        self.app.is_remote_configured()
    }
}

/// Default embedded database location
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mealsync")
        .join("mealsync.db")
}

fn apply_env(app: &mut AppConfig) {
    if let Ok(url) = std::env::var(ENV_REMOTE_URL) {
        if !url.trim().is_empty() {
            app.remote_url = Some(url.trim().to_string());
        }
    }
    if let Ok(key) = std::env::var(ENV_API_KEY) {
        if !key.is_empty() {
            app.api_key = Some(key);
        }
    }
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        if !path.is_empty() {
            app.local_db_path = Some(PathBuf::from(path));
        }
    }
    if std::env::var(ENV_REMOTE_DISABLED).unwrap_or_default() == "1" {
        app.remote_enabled = false;
    }
}
