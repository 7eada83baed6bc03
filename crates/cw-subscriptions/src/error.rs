use thiserror::Error;

/// Failure reported by the remote notification service.
///
/// Only two kinds matter to the lifecycle: a subscription the service no longer knows
/// about (recreate it), and everything else (log and retry on the next sweep).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Subscription not found: {0}")]
    NotFound(String),

    #[error("Notification service error (status {status:?}): {message}")]
    Other { status: Option<u16>, message: String },
}

impl ServiceError {
    pub fn other(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Other { status, message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        Self::Other {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
