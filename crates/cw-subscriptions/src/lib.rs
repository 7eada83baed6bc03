//! Changewatch Subscription Lifecycle
//!
//! Keeps change-notification subscriptions alive against a remote notification service:
//! - SubscriptionRegistry: in-memory id -> subscription map with snapshot reads
//! - NotificationServiceClient: List/Create/Update/Delete against the remote service
//! - SubscriptionLifecycleManager: onboarding with conflict resolution, renewal, recreation
//! - SubscriptionScheduler: fixed-cadence background renewal sweep
//! - GraphSubscriptionClient: reqwest client for Graph-style `/subscriptions` APIs
//! - InMemoryNotificationService: in-process service for dev mode and tests

pub mod auth;
pub mod client;
pub mod error;
pub mod graph;
pub mod manager;
pub mod mock;
pub mod model;
pub mod registry;
pub mod scheduler;

pub use auth::{AuthError, ClientCredentialsTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::NotificationServiceClient;
pub use error::{ServiceError, SubscriptionError};
pub use graph::GraphSubscriptionClient;
pub use manager::{LifecycleConfig, SubscriptionLifecycleManager, SweepReport};
pub use mock::InMemoryNotificationService;
pub use model::{ChangeType, Subscription, SubscriptionRequest};
pub use registry::{SubscriptionRecord, SubscriptionRegistry};
pub use scheduler::{SchedulerConfig, SubscriptionScheduler};

pub type Result<T> = std::result::Result<T, SubscriptionError>;
