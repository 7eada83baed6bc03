//! Remote notification service contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ServiceError;
use crate::model::{Subscription, SubscriptionRequest};

/// Operations the lifecycle manager needs from the remote notification service.
///
/// Implementations own transport, authentication and timeouts; the lifecycle layer
/// imposes none of its own.
#[async_trait]
pub trait NotificationServiceClient: Send + Sync {
    /// All subscriptions the service currently holds for this application.
    async fn list(&self) -> Result<Vec<Subscription>, ServiceError>;

    async fn create(&self, request: &SubscriptionRequest) -> Result<Subscription, ServiceError>;

    /// Extend a subscription. `ServiceError::NotFound` means the service lost it.
    async fn update(&self, id: &str, expiration: DateTime<Utc>) -> Result<Subscription, ServiceError>;

    async fn delete(&self, id: &str) -> Result<(), ServiceError>;
}
