//! Subscription Lifecycle Manager
//!
//! Onboards resources (conflict resolution against the remote list, then create), renews
//! every tracked subscription on each sweep, and recreates subscriptions the service lost.
//! No remote failure escapes this module: each call site logs and moves on, so one bad
//! subscription never aborts a sweep or the host process.
//!
//! Locking: every read-modify-write for a resource runs under that resource's
//! `tokio::sync::Mutex`, shared by onboarding and the sweep. Concurrent onboarding of the
//! same resource therefore sees the first caller's subscription in the remote list and
//! reuses it instead of creating a duplicate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::NotificationServiceClient;
use crate::error::{ServiceError, SubscriptionError};
use crate::model::{resource_key, ChangeType, Subscription, SubscriptionRequest};
use crate::registry::{SubscriptionRecord, SubscriptionRegistry};

/// Settings that shape every subscription the manager creates or renews
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Default receiver endpoint for `ensure_subscription`
    pub notification_url: String,
    pub client_state: String,
    /// Requested lifetime on create and on every renewal
    pub expiration_period: Duration,
    /// Sweep cadence; used to flag subscriptions that will lapse before the next sweep
    pub renew_interval: Duration,
    pub include_resource_data: bool,
    pub change_types: Vec<ChangeType>,
    pub encryption_certificate: Option<String>,
    pub encryption_certificate_id: Option<String>,
    /// Re-ensure resources whose creation failed at the end of each sweep
    pub retry_failed_creations: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            notification_url: "http://localhost:8080/api/notifications".to_string(),
            client_state: uuid::Uuid::new_v4().to_string(),
            expiration_period: Duration::from_secs(60 * 60),
            renew_interval: Duration::from_secs(15 * 60),
            include_resource_data: true,
            change_types: ChangeType::ALL.to_vec(),
            encryption_certificate: None,
            encryption_certificate_id: None,
            retry_failed_creations: false,
        }
    }
}

impl LifecycleConfig {
    pub fn new(notification_url: impl Into<String>) -> Self {
        Self {
            notification_url: notification_url.into(),
            ..Default::default()
        }
    }

    pub fn with_client_state(mut self, client_state: impl Into<String>) -> Self {
        self.client_state = client_state.into();
        self
    }

    pub fn with_expiration_period(mut self, period: Duration) -> Self {
        self.expiration_period = period;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_encryption_certificate(mut self, certificate: String, certificate_id: String) -> Self {
        self.encryption_certificate = Some(certificate).filter(|c| !c.is_empty());
        self.encryption_certificate_id = Some(certificate_id).filter(|c| !c.is_empty());
        self
    }

    pub fn with_retry_failed_creations(mut self, enabled: bool) -> Self {
        self.retry_failed_creations = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), SubscriptionError> {
        if self.notification_url.trim().is_empty() {
            return Err(SubscriptionError::Config("notification_url must not be empty".to_string()));
        }
        if self.expiration_period.is_zero() {
            return Err(SubscriptionError::Config("expiration_period must be greater than zero".to_string()));
        }
        if chrono::Duration::from_std(self.expiration_period).is_err() {
            return Err(SubscriptionError::Config(format!(
                "expiration_period ({:?}) is out of range",
                self.expiration_period
            )));
        }
        if self.renew_interval.is_zero() || self.renew_interval >= self.expiration_period {
            return Err(SubscriptionError::Config(format!(
                "renew_interval ({:?}) must be non-zero and shorter than expiration_period ({:?})",
                self.renew_interval, self.expiration_period
            )));
        }
        Ok(())
    }

    /// Falls back to the default lifetime when `validate` was skipped and the period is out of range
    fn expiration_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.expiration_period).unwrap_or_else(|_| {
            warn!(expiration_period = ?self.expiration_period, "Expiration period out of range, using 60 minutes");
            chrono::Duration::minutes(60)
        })
    }

    fn renew_interval_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.renew_interval).unwrap_or_else(|_| {
            warn!(renew_interval = ?self.renew_interval, "Renew interval out of range, using 15 minutes");
            chrono::Duration::minutes(15)
        })
    }
}

/// Outcome counts for one renewal sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Entries taken from the snapshot and processed
    pub examined: usize,
    pub renewed: usize,
    /// Lost or lapsed subscriptions replaced under a new id
    pub recreated: usize,
    /// Lost subscriptions whose recreation failed; their resources are no longer watched
    pub lost: usize,
    /// Renewals that failed with a non-NotFound error, kept for the next sweep
    pub failed: usize,
    /// Entries superseded between the snapshot and their turn
    pub skipped: usize,
    pub retried_creations: usize,
    /// Failed renewals whose subscription will expire before the next sweep
    pub at_risk: usize,
    /// Stop was requested before the sweep finished
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
struct PendingCreation {
    resource: String,
    target_url: String,
    failures: u32,
    last_failure_at: DateTime<Utc>,
}

pub struct SubscriptionLifecycleManager {
    config: LifecycleConfig,
    client: Arc<dyn NotificationServiceClient>,
    registry: Arc<SubscriptionRegistry>,
    /// One lock per normalized resource path; pruned once a resource is neither tracked nor pending
    resource_locks: DashMap<String, Arc<Mutex<()>>>,
    pending_creations: parking_lot::Mutex<HashMap<String, PendingCreation>>,
}

impl SubscriptionLifecycleManager {
    pub fn new(
        config: LifecycleConfig,
        client: Arc<dyn NotificationServiceClient>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Self {
        Self {
            config,
            client,
            registry,
            resource_locks: DashMap::new(),
            pending_creations: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Point-in-time view of every tracked subscription
    pub fn subscriptions(&self) -> Vec<SubscriptionRecord> {
        self.registry.snapshot()
    }

    /// Resources waiting for a creation retry, with their failure counts
    pub fn pending_creations(&self) -> Vec<(String, u32)> {
        let mut pending: Vec<(String, u32)> = self
            .pending_creations
            .lock()
            .values()
            .map(|p| (p.resource.clone(), p.failures))
            .collect();
        pending.sort();
        pending
    }

    /// Make sure `resource` has a live subscription delivering to the configured URL.
    ///
    /// Returns `Ok(None)` when the remote service could not be reached or refused the
    /// creation; the failure is logged and nothing is retried unless
    /// `retry_failed_creations` is set.
    pub async fn ensure_subscription(&self, resource: &str) -> Result<Option<Subscription>, SubscriptionError> {
        let target_url = self.config.notification_url.clone();
        self.ensure_subscription_for(resource, &target_url).await
    }

    pub async fn ensure_subscription_for(
        &self,
        resource: &str,
        target_url: &str,
    ) -> Result<Option<Subscription>, SubscriptionError> {
        if resource.trim().is_empty() {
            return Err(SubscriptionError::InvalidArgument("resource must not be empty".to_string()));
        }
        if target_url.trim().is_empty() {
            return Err(SubscriptionError::InvalidArgument("target url must not be empty".to_string()));
        }

        let span = info_span!("ensure_subscription", resource = %resource);
        async {
            let lock = self.resource_lock(resource);
            let guard = lock.lock().await;

            let outcome = self.ensure_locked(resource, target_url).await;
            match &outcome {
                Some(_) => self.clear_pending(resource),
                None => self.note_creation_failure(resource, target_url),
            }

            drop(guard);
            self.release_resource_lock(resource, lock);
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    async fn ensure_locked(&self, resource: &str, target_url: &str) -> Option<Subscription> {
        let now = Utc::now();

        let remote = match self.client.list().await {
            Ok(remote) => remote,
            Err(e) => {
                // Creating without the remote view could duplicate a live subscription
                warn!(error = %e, "Failed to list remote subscriptions, skipping onboarding");
                metrics::counter!("subscriptions.list_errors_total").increment(1);
                return None;
            }
        };

        let mut reusable: Option<Subscription> = None;
        for existing in remote.into_iter().filter(|s| s.watches(resource)) {
            if reusable.is_none() && existing.is_reusable_for(target_url, now) {
                reusable = Some(existing);
                continue;
            }

            let reason = if existing.is_expired_at(now) {
                "expired"
            } else if existing.notification_url != target_url {
                "stale_url"
            } else {
                "duplicate"
            };
            info!(
                subscription_id = %existing.id,
                notification_url = %existing.notification_url,
                expiration = %existing.expiration_date_time,
                reason,
                "Removing conflicting remote subscription"
            );
            metrics::counter!("subscriptions.conflicts_removed_total", "reason" => reason).increment(1);
            self.delete_best_effort(&existing.id).await;
            self.registry.remove(&existing.id);
        }

        let (subscription, renewed) = match reusable {
            Some(existing) => {
                info!(
                    subscription_id = %existing.id,
                    expiration = %existing.expiration_date_time,
                    "Reusing existing remote subscription"
                );
                metrics::counter!("subscriptions.reused_total").increment(1);
                self.refresh_if_expiring(existing, resource, target_url, now).await?
            }
            None => (self.create(resource, target_url).await?, false),
        };

        let id = subscription.id.clone();
        let expiration = subscription.expiration_date_time;
        self.track(subscription.clone());
        if renewed {
            self.registry.record_renewal(&id, expiration, Utc::now());
        }
        Some(subscription)
    }

    /// A reused subscription left over from an earlier run may not survive until the first
    /// sweep; renew it now when it has no more than one renew interval of life left.
    ///
    /// Returns the subscription to track and whether it was renewed.
    async fn refresh_if_expiring(
        &self,
        existing: Subscription,
        resource: &str,
        target_url: &str,
        now: DateTime<Utc>,
    ) -> Option<(Subscription, bool)> {
        let remaining = existing.expiration_date_time - now;
        if remaining > self.config.renew_interval_delta() {
            return Some((existing, false));
        }

        debug!(
            subscription_id = %existing.id,
            remaining_secs = remaining.num_seconds(),
            "Reused subscription expires before the next sweep, renewing now"
        );
        match self.client.update(&existing.id, now + self.config.expiration_delta()).await {
            Ok(updated) => {
                metrics::counter!("subscriptions.renewed_total").increment(1);
                Some((updated, true))
            }
            Err(ServiceError::NotFound(_)) => {
                warn!(subscription_id = %existing.id, "Reused subscription vanished, creating a new one");
                self.create(resource, target_url).await.map(|created| (created, false))
            }
            Err(e) => {
                // Still valid right now; the sweep keeps trying
                warn!(subscription_id = %existing.id, error = %e, "Failed to renew reused subscription");
                metrics::counter!("subscriptions.renewal.errors_total").increment(1);
                Some((existing, false))
            }
        }
    }

    /// Renew every tracked subscription once
    pub async fn renew_all(&self) -> SweepReport {
        self.renew_all_until(|| false).await
    }

    /// Renew every tracked subscription, checking `should_stop` before each entry.
    ///
    /// A remote call already in flight when stop is requested runs to completion.
    pub async fn renew_all_until<F>(&self, should_stop: F) -> SweepReport
    where
        F: Fn() -> bool,
    {
        let started = Instant::now();
        let mut report = SweepReport::default();
        let snapshot = self.registry.snapshot();

        debug!(entries = snapshot.len(), "Starting renewal sweep");

        for record in snapshot {
            if should_stop() {
                report.interrupted = true;
                break;
            }
            report.examined += 1;

            let span = info_span!(
                "renew_subscription",
                subscription_id = %record.id(),
                resource = %record.resource()
            );
            self.renew_one(record, &mut report).instrument(span).await;
        }

        if self.config.retry_failed_creations && !report.interrupted {
            self.retry_pending_creations(&should_stop, &mut report).await;
        }

        metrics::gauge!("subscriptions.tracked").set(self.registry.len() as f64);
        metrics::gauge!("subscriptions.renewal.consecutive_failures")
            .set(self.registry.max_consecutive_failures() as f64);
        metrics::histogram!("subscriptions.sweep.duration_seconds").record(started.elapsed().as_secs_f64());

        if report.interrupted {
            info!(examined = report.examined, "Renewal sweep interrupted by shutdown");
        } else if report.failed > 0 || report.lost > 0 {
            warn!(
                examined = report.examined,
                renewed = report.renewed,
                recreated = report.recreated,
                failed = report.failed,
                lost = report.lost,
                "Renewal sweep completed with failures"
            );
        } else {
            info!(
                examined = report.examined,
                renewed = report.renewed,
                recreated = report.recreated,
                duration_ms = started.elapsed().as_millis() as u64,
                "Renewal sweep completed"
            );
        }

        report
    }

    async fn renew_one(&self, record: SubscriptionRecord, report: &mut SweepReport) {
        let lock = self.resource_lock(record.resource());
        let guard = lock.lock().await;

        self.renew_locked(&record, report).await;

        drop(guard);
        self.release_resource_lock(record.resource(), lock);
    }

    async fn renew_locked(&self, record: &SubscriptionRecord, report: &mut SweepReport) {
        // Onboarding may have replaced this entry while we waited for the lock
        let Some(current) = self.registry.get(record.id()) else {
            debug!("Subscription superseded since snapshot, skipping");
            report.skipped += 1;
            return;
        };

        let id = current.id().to_string();
        let now = Utc::now();

        if current.subscription.is_expired_at(now) {
            warn!(expiration = %current.expires_at(), "Tracked subscription lapsed, replacing it");
            metrics::counter!("subscriptions.renewal.lapsed_total").increment(1);
            self.delete_best_effort(&id).await;
            self.replace_lost(&current, report).await;
            return;
        }

        let new_expiration = now + self.config.expiration_delta();
        match self.client.update(&id, new_expiration).await {
            Ok(updated) => {
                self.registry.record_renewal(&id, updated.expiration_date_time, Utc::now());
                report.renewed += 1;
                metrics::counter!("subscriptions.renewed_total").increment(1);
                debug!(expiration = %updated.expiration_date_time, "Subscription renewed");
            }
            Err(ServiceError::NotFound(_)) => {
                warn!("Subscription no longer exists remotely, recreating");
                metrics::counter!("subscriptions.renewal.not_found_total").increment(1);
                self.replace_lost(&current, report).await;
            }
            Err(ServiceError::Other { status, message }) => {
                let failures = self.registry.record_failure(&id).unwrap_or(0);
                report.failed += 1;
                metrics::counter!("subscriptions.renewal.errors_total").increment(1);
                warn!(
                    status = ?status,
                    error = %message,
                    consecutive_failures = failures,
                    "Failed to renew subscription, keeping it for the next sweep"
                );
                if self.flag_if_at_risk(&current, failures, now) {
                    report.at_risk += 1;
                }
            }
        }
    }

    /// Create a replacement for a lost subscription; the old id is dropped either way
    async fn replace_lost(&self, lost: &SubscriptionRecord, report: &mut SweepReport) {
        let resource = lost.resource().to_string();
        let target_url = lost.subscription.notification_url.clone();

        match self.create(&resource, &target_url).await {
            Some(replacement) => {
                info!(
                    old_subscription_id = %lost.id(),
                    new_subscription_id = %replacement.id,
                    "Subscription recreated"
                );
                self.registry.upsert(SubscriptionRecord::new(replacement));
                self.registry.remove(lost.id());
                self.clear_pending(&resource);
                report.recreated += 1;
                metrics::counter!("subscriptions.recreated_total").increment(1);
            }
            None => {
                self.registry.remove(lost.id());
                self.note_creation_failure(&resource, &target_url);
                report.lost += 1;
                metrics::counter!("subscriptions.lost_total").increment(1);
                error!(
                    old_subscription_id = %lost.id(),
                    "Could not recreate subscription, resource is no longer watched until it is ensured again"
                );
            }
        }
    }

    async fn retry_pending_creations<F>(&self, should_stop: &F, report: &mut SweepReport)
    where
        F: Fn() -> bool,
    {
        let pending: Vec<PendingCreation> = self.pending_creations.lock().values().cloned().collect();

        for entry in pending {
            if should_stop() {
                report.interrupted = true;
                return;
            }
            info!(
                resource = %entry.resource,
                previous_failures = entry.failures,
                last_failure_at = %entry.last_failure_at,
                "Retrying failed subscription creation"
            );
            report.retried_creations += 1;
            if let Err(e) = self.ensure_subscription_for(&entry.resource, &entry.target_url).await {
                // Only reachable if an invalid resource was queued; never retry it again
                warn!(resource = %entry.resource, error = %e, "Dropping invalid pending creation");
                self.clear_pending(&entry.resource);
            }
        }
    }

    async fn create(&self, resource: &str, target_url: &str) -> Option<Subscription> {
        let request = self.build_request(resource, target_url, Utc::now());

        match self.client.create(&request).await {
            Ok(created) => {
                info!(
                    subscription_id = %created.id,
                    expiration = %created.expiration_date_time,
                    "Subscription created"
                );
                metrics::counter!("subscriptions.created_total").increment(1);
                Some(created)
            }
            Err(e) => {
                error!(error = %e, notification_url = %target_url, "Failed to create subscription");
                metrics::counter!("subscriptions.create_errors_total").increment(1);
                None
            }
        }
    }

    fn build_request(&self, resource: &str, target_url: &str, now: DateTime<Utc>) -> SubscriptionRequest {
        SubscriptionRequest {
            change_type: self.config.change_types.clone(),
            notification_url: target_url.to_string(),
            resource: resource.to_string(),
            expiration_date_time: now + self.config.expiration_delta(),
            client_state: Some(self.config.client_state.clone()).filter(|s| !s.is_empty()),
            include_resource_data: self.config.include_resource_data,
            encryption_certificate: self.config.encryption_certificate.clone(),
            encryption_certificate_id: self.config.encryption_certificate_id.clone(),
        }
    }

    async fn delete_best_effort(&self, id: &str) {
        match self.client.delete(id).await {
            Ok(()) => debug!(subscription_id = %id, "Remote subscription deleted"),
            Err(ServiceError::NotFound(_)) => {
                debug!(subscription_id = %id, "Remote subscription already gone")
            }
            Err(e) => {
                warn!(subscription_id = %id, error = %e, "Failed to delete remote subscription");
                metrics::counter!("subscriptions.delete_errors_total").increment(1);
            }
        }
    }

    fn track(&self, subscription: Subscription) {
        let resource = subscription.resource.clone();
        let id = subscription.id.clone();
        self.registry.upsert(SubscriptionRecord::new(subscription));

        let superseded = self.registry.remove_others_for_resource(&resource, &id);
        if !superseded.is_empty() {
            debug!(superseded = ?superseded, "Dropped superseded local entries");
        }
    }

    /// Renewal keeps failing and the subscription will expire before the next sweep.
    /// Surfaced only; no recovery policy is applied.
    fn flag_if_at_risk(&self, record: &SubscriptionRecord, failures: u32, now: DateTime<Utc>) -> bool {
        let remaining = record.expires_at() - now;
        if remaining > self.config.renew_interval_delta() {
            return false;
        }
        metrics::counter!("subscriptions.renewal.at_risk_total").increment(1);
        warn!(
            consecutive_failures = failures,
            remaining_secs = remaining.num_seconds(),
            "Subscription will expire before the next sweep unless renewal succeeds"
        );
        true
    }

    fn resource_lock(&self, resource: &str) -> Arc<Mutex<()>> {
        self.resource_locks
            .entry(resource_key(resource))
            .or_default()
            .clone()
    }

    /// Number of per-resource locks currently held in the lock map
    pub fn resource_lock_count(&self) -> usize {
        self.resource_locks.len()
    }

    /// Drop the caller's handle and remove the map entry when nobody else holds it and the
    /// resource has nothing left to protect. The shard write lock taken by `remove_if` keeps
    /// new callers from cloning the entry while the check runs.
    fn release_resource_lock(&self, resource: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        let key = resource_key(resource);
        self.resource_locks.remove_if(&key, |_, lock| {
            Arc::strong_count(lock) == 1
                && self.registry.find_by_resource(resource).is_none()
                && !self.pending_creations.lock().contains_key(&key)
        });
    }

    fn note_creation_failure(&self, resource: &str, target_url: &str) {
        if !self.config.retry_failed_creations {
            return;
        }
        let mut pending = self.pending_creations.lock();
        let entry = pending.entry(resource_key(resource)).or_insert_with(|| PendingCreation {
            resource: resource.to_string(),
            target_url: target_url.to_string(),
            failures: 0,
            last_failure_at: Utc::now(),
        });
        entry.failures += 1;
        entry.last_failure_at = Utc::now();
        metrics::gauge!("subscriptions.pending_creations").set(pending.len() as f64);
    }

    fn clear_pending(&self, resource: &str) {
        let mut pending = self.pending_creations.lock();
        if pending.remove(&resource_key(resource)).is_some() {
            metrics::gauge!("subscriptions.pending_creations").set(pending.len() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = LifecycleConfig::default();
        assert_eq!(config.expiration_period, Duration::from_secs(3600));
        assert_eq!(config.renew_interval, Duration::from_secs(900));
        assert_eq!(config.change_types, ChangeType::ALL.to_vec());
        assert!(!config.client_state.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_renew_interval_not_shorter_than_expiration() {
        let config = LifecycleConfig::new("https://host/api/notifications")
            .with_expiration_period(Duration::from_secs(600))
            .with_renew_interval(Duration::from_secs(600));
        assert!(matches!(config.validate(), Err(SubscriptionError::Config(_))));
    }

    #[test]
    fn test_config_rejects_out_of_range_expiration() {
        let config = LifecycleConfig::new("https://host/api/notifications")
            .with_expiration_period(Duration::from_secs(u64::MAX));
        assert!(matches!(config.validate(), Err(SubscriptionError::Config(_))));
    }

    #[test]
    fn test_empty_certificate_values_are_omitted() {
        let config = LifecycleConfig::default().with_encryption_certificate(String::new(), "cert-1".to_string());
        assert_eq!(config.encryption_certificate, None);
        assert_eq!(config.encryption_certificate_id.as_deref(), Some("cert-1"));
    }
}
