//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "changewatch.toml",
    "./config/config.toml",
    "./config/changewatch.toml",
    "/etc/changewatch/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides, then validate
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured config file does not exist, searching defaults");
        }

        if let Ok(path) = env::var("CHANGEWATCH_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("CHANGEWATCH_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("CHANGEWATCH_HTTP_HOST") {
            config.http.host = val;
        }

        // Graph
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_BASE_URL") {
            config.graph.base_url = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_AUTHORITY_URL") {
            config.graph.authority_url = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_TENANT_ID") {
            config.graph.tenant_id = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_CLIENT_ID") {
            config.graph.client_id = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_CLIENT_SECRET") {
            config.graph.client_secret = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_ACCESS_TOKEN") {
            config.graph.access_token = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_GRAPH_TIMEOUT_SECS") {
            if let Ok(timeout) = val.parse() {
                config.graph.request_timeout_secs = timeout;
            }
        }

        // Subscriptions
        if let Ok(val) = env::var("CHANGEWATCH_SUBSCRIPTIONS_ENABLED") {
            config.subscriptions.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("CHANGEWATCH_NOTIFICATION_URL") {
            config.subscriptions.notification_url = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_CLIENT_STATE") {
            config.subscriptions.client_state = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_RESOURCES") {
            config.subscriptions.resources = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = env::var("CHANGEWATCH_EXPIRATION_MINUTES") {
            if let Ok(minutes) = val.parse() {
                config.subscriptions.expiration_minutes = minutes;
            }
        }
        if let Ok(val) = env::var("CHANGEWATCH_RENEW_INTERVAL_MINUTES") {
            if let Ok(minutes) = val.parse() {
                config.subscriptions.renew_interval_minutes = minutes;
            }
        }
        if let Ok(val) = env::var("CHANGEWATCH_INCLUDE_RESOURCE_DATA") {
            config.subscriptions.include_resource_data = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("CHANGEWATCH_ENCRYPTION_CERTIFICATE") {
            config.subscriptions.encryption_certificate = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_ENCRYPTION_CERTIFICATE_ID") {
            config.subscriptions.encryption_certificate_id = val;
        }
        if let Ok(val) = env::var("CHANGEWATCH_RETRY_FAILED_CREATIONS") {
            config.subscriptions.retry_failed_creations = val.parse().unwrap_or(false);
        }

        // General
        if let Ok(val) = env::var("CHANGEWATCH_DEV_MODE") {
            config.dev_mode = val == "true" || val == "1";
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
