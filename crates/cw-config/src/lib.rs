//! Changewatch Configuration System
//!
//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

mod loader;

/// Upper bound for subscription lifetimes and renew intervals (one year)
pub const MAX_SUBSCRIPTION_MINUTES: u64 = 366 * 24 * 60;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub graph: GraphConfig,
    pub subscriptions: SubscriptionsConfig,

    /// Use the in-memory notification service even when Graph credentials are present
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            graph: GraphConfig::default(),
            subscriptions: SubscriptionsConfig::default(),
            dev_mode: false,
        }
    }
}

/// HTTP server configuration (health and admin endpoints)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Notification service (Microsoft Graph) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// API root, subscriptions live under `{base_url}/subscriptions`
    pub base_url: String,
    /// OAuth2 authority host
    pub authority_url: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Pre-issued bearer token; takes precedence over client credentials
    pub access_token: String,
    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            authority_url: "https://login.microsoftonline.com".to_string(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            access_token: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl GraphConfig {
    pub fn has_client_credentials(&self) -> bool {
        !self.tenant_id.is_empty() && !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn has_static_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn is_configured(&self) -> bool {
        self.has_static_token() || self.has_client_credentials()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Subscription lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionsConfig {
    /// Enable the background renewal scheduler
    pub enabled: bool,
    /// Receiver endpoint notifications are delivered to
    pub notification_url: String,
    /// Shared secret echoed back in every notification; generated when empty
    pub client_state: String,
    /// Resources onboarded at startup
    pub resources: Vec<String>,
    /// Lifetime requested for each created or renewed subscription
    pub expiration_minutes: u64,
    /// Renewal sweep cadence, must be shorter than `expiration_minutes`
    pub renew_interval_minutes: u64,
    pub include_resource_data: bool,
    pub encryption_certificate: String,
    pub encryption_certificate_id: String,
    /// Re-attempt failed creations at every sweep instead of waiting for an external trigger
    pub retry_failed_creations: bool,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_url: "http://localhost:8080/api/notifications".to_string(),
            client_state: String::new(),
            resources: vec![],
            expiration_minutes: 60,
            renew_interval_minutes: 15,
            include_resource_data: true,
            encryption_certificate: String::new(),
            encryption_certificate_id: String::new(),
            retry_failed_creations: false,
        }
    }
}

impl SubscriptionsConfig {
    pub fn expiration_period(&self) -> Duration {
        Duration::from_secs(self.expiration_minutes.saturating_mul(60))
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_secs(self.renew_interval_minutes.saturating_mul(60))
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Check cross-field constraints that serde defaults cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let subs = &self.subscriptions;

        if subs.expiration_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "subscriptions.expiration_minutes must be greater than zero".to_string(),
            ));
        }
        if subs.renew_interval_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "subscriptions.renew_interval_minutes must be greater than zero".to_string(),
            ));
        }
        if subs.expiration_minutes > MAX_SUBSCRIPTION_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "subscriptions.expiration_minutes ({}) must not exceed {}",
                subs.expiration_minutes, MAX_SUBSCRIPTION_MINUTES
            )));
        }
        if subs.renew_interval_minutes >= subs.expiration_minutes {
            return Err(ConfigError::ValidationError(format!(
                "subscriptions.renew_interval_minutes ({}) must be shorter than expiration_minutes ({})",
                subs.renew_interval_minutes, subs.expiration_minutes
            )));
        }
        if subs.notification_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "subscriptions.notification_url must not be empty".to_string(),
            ));
        }
        if subs.resources.iter().any(|r| r.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "subscriptions.resources must not contain empty entries".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Changewatch Configuration
# Environment variables (CHANGEWATCH_*) override these settings

dev_mode = false

[http]
port = 8080
host = "0.0.0.0"

[graph]
base_url = "https://graph.microsoft.com/v1.0"
authority_url = "https://login.microsoftonline.com"
tenant_id = ""
client_id = ""
client_secret = ""
access_token = ""
request_timeout_secs = 30

[subscriptions]
enabled = true
notification_url = "https://host.example.com/api/notifications"
client_state = ""
resources = ["/teams/T1/channels"]
expiration_minutes = 60
renew_interval_minutes = 15
include_resource_data = true
encryption_certificate = ""
encryption_certificate_id = ""
retry_failed_creations = false
"#
        .to_string()
    }
}
