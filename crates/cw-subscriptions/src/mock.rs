//! In-process notification service
//!
//! Backs the server in dev mode and the test suites. Ids are handed out sequentially
//! (`S1`, `S2`, ...) and faults can be injected per operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::info;

use crate::client::NotificationServiceClient;
use crate::error::ServiceError;
use crate::model::{ChangeType, Subscription, SubscriptionRequest};

#[derive(Default)]
pub struct InMemoryNotificationService {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
    latency: Option<Duration>,

    failing_creates: AtomicU32,
    update_failures: Mutex<HashMap<String, ServiceError>>,
    fail_list: AtomicBool,
    fail_deletes: AtomicBool,

    list_calls: AtomicU32,
    create_calls: AtomicU32,
    update_calls: AtomicU32,
    delete_calls: AtomicU32,
    deleted_ids: Mutex<Vec<String>>,
}

impl InMemoryNotificationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, widening race windows in concurrency tests
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Default::default()
        }
    }

    fn assign_id(&self) -> String {
        format!("S{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Place a subscription on the service directly, as if another process created it
    pub fn insert(&self, resource: &str, notification_url: &str, expiration: DateTime<Utc>) -> Subscription {
        let subscription = Subscription {
            id: self.assign_id(),
            resource: resource.to_string(),
            notification_url: notification_url.to_string(),
            client_state: None,
            expiration_date_time: expiration,
            encryption_certificate: None,
            encryption_certificate_id: None,
            include_resource_data: true,
            change_type: ChangeType::ALL.to_vec(),
        };
        self.subscriptions.lock().push(subscription.clone());
        subscription
    }

    /// Forget a subscription without the client's involvement
    pub fn drop_remote(&self, id: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Every update of `id` returns `error` until cleared
    pub fn fail_updates_for(&self, id: &str, error: ServiceError) {
        self.update_failures.lock().insert(id.to_string(), error);
    }

    pub fn clear_update_failure(&self, id: &str) {
        self.update_failures.lock().remove(id);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.lock().iter().find(|s| s.id == id).cloned()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    pub fn subscriptions_for(&self, resource: &str) -> Vec<Subscription> {
        self.subscriptions.lock().iter().filter(|s| s.watches(resource)).cloned().collect()
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted_ids.lock().clone()
    }
}

#[async_trait]
impl NotificationServiceClient for InMemoryNotificationService {
    async fn list(&self) -> Result<Vec<Subscription>, ServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(ServiceError::other(Some(503), "list unavailable"));
        }
        Ok(self.subscriptions())
    }

    async fn create(&self, request: &SubscriptionRequest) -> Result<Subscription, ServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let consumed_failure = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed_failure {
            return Err(ServiceError::other(Some(503), "create unavailable"));
        }

        let subscription = Subscription {
            id: self.assign_id(),
            resource: request.resource.clone(),
            notification_url: request.notification_url.clone(),
            client_state: request.client_state.clone(),
            expiration_date_time: request.expiration_date_time,
            encryption_certificate: request.encryption_certificate.clone(),
            encryption_certificate_id: request.encryption_certificate_id.clone(),
            include_resource_data: request.include_resource_data,
            change_type: request.change_type.clone(),
        };
        self.subscriptions.lock().push(subscription.clone());
        info!(subscription_id = %subscription.id, resource = %subscription.resource, "In-memory subscription created");
        Ok(subscription)
    }

    async fn update(&self, id: &str, expiration: DateTime<Utc>) -> Result<Subscription, ServiceError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if let Some(error) = self.update_failures.lock().get(id).cloned() {
            return Err(error);
        }

        let mut subscriptions = self.subscriptions.lock();
        match subscriptions.iter_mut().find(|s| s.id == id) {
            Some(subscription) => {
                subscription.expiration_date_time = expiration;
                Ok(subscription.clone())
            }
            None => Err(ServiceError::NotFound(id.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), ServiceError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ServiceError::other(Some(500), "delete failed"));
        }

        self.deleted_ids.lock().push(id.to_string());
        if self.drop_remote(id) {
            Ok(())
        } else {
            Err(ServiceError::NotFound(id.to_string()))
        }
    }
}
