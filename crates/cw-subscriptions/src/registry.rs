//! Subscription Registry - in-memory tracking of live subscriptions
//!
//! Keyed by the remote subscription id. The map sits behind a single `parking_lot::RwLock`
//! that is held for one map operation at a time and never across an `.await`; callers that
//! need read-modify-write atomicity for a resource serialize through the lifecycle
//! manager's per-resource lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::model::{same_resource, Subscription};

/// A tracked subscription plus local renewal bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub subscription: Subscription,
    /// Renewals that failed with a non-NotFound error since the last success
    pub consecutive_renewal_failures: u32,
    pub last_renewed_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            consecutive_renewal_failures: 0,
            last_renewed_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.subscription.id
    }

    pub fn resource(&self) -> &str {
        &self.subscription.resource
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.subscription.expiration_date_time
    }
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, SubscriptionRecord>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by id, returning the previous record
    pub fn upsert(&self, record: SubscriptionRecord) -> Option<SubscriptionRecord> {
        self.entries.write().insert(record.id().to_string(), record)
    }

    pub fn get(&self, id: &str) -> Option<SubscriptionRecord> {
        self.entries.read().get(id).cloned()
    }

    /// The tracked entry for a resource. If several exist the one expiring last wins.
    pub fn find_by_resource(&self, resource: &str) -> Option<SubscriptionRecord> {
        self.entries
            .read()
            .values()
            .filter(|r| same_resource(r.resource(), resource))
            .max_by_key(|r| r.expires_at())
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<SubscriptionRecord> {
        self.entries.write().remove(id)
    }

    /// Drop every entry for `resource` except `keep_id`; returns the dropped ids
    pub fn remove_others_for_resource(&self, resource: &str, keep_id: &str) -> Vec<String> {
        let mut entries = self.entries.write();
        let stale: Vec<String> = entries
            .values()
            .filter(|r| r.id() != keep_id && same_resource(r.resource(), resource))
            .map(|r| r.id().to_string())
            .collect();
        for id in &stale {
            entries.remove(id);
        }
        stale
    }

    /// Point-in-time copy of all entries, soonest expiry first
    pub fn snapshot(&self) -> Vec<SubscriptionRecord> {
        let mut records: Vec<SubscriptionRecord> = self.entries.read().values().cloned().collect();
        records.sort_by(|a, b| a.expires_at().cmp(&b.expires_at()).then_with(|| a.id().cmp(b.id())));
        records
    }

    /// Store a successful renewal. Returns false if the id is no longer tracked.
    pub fn record_renewal(&self, id: &str, expiration: DateTime<Utc>, renewed_at: DateTime<Utc>) -> bool {
        match self.entries.write().get_mut(id) {
            Some(record) => {
                record.subscription.expiration_date_time = expiration;
                record.consecutive_renewal_failures = 0;
                record.last_renewed_at = Some(renewed_at);
                true
            }
            None => false,
        }
    }

    /// Count a failed renewal, returning the new consecutive failure count
    pub fn record_failure(&self, id: &str) -> Option<u32> {
        self.entries.write().get_mut(id).map(|record| {
            record.consecutive_renewal_failures += 1;
            record.consecutive_renewal_failures
        })
    }

    pub fn max_consecutive_failures(&self) -> u32 {
        self.entries
            .read()
            .values()
            .map(|r| r.consecutive_renewal_failures)
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeType;
    use chrono::Duration;

    fn record(id: &str, resource: &str, expires_in_mins: i64) -> SubscriptionRecord {
        SubscriptionRecord::new(Subscription {
            id: id.to_string(),
            resource: resource.to_string(),
            notification_url: "https://host/api/notifications".to_string(),
            client_state: None,
            expiration_date_time: Utc::now() + Duration::minutes(expires_in_mins),
            encryption_certificate: None,
            encryption_certificate_id: None,
            include_resource_data: true,
            change_type: ChangeType::ALL.to_vec(),
        })
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.upsert(record("S1", "/teams/T1/channels", 60)).is_none());
        let previous = registry.upsert(record("S1", "/teams/T1/channels", 30));

        assert!(previous.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_by_resource() {
        let registry = SubscriptionRegistry::new();
        registry.upsert(record("S1", "/teams/T1/channels", 60));
        registry.upsert(record("S2", "/teams/T2/channels", 60));

        assert_eq!(registry.find_by_resource("teams/T1/channels").unwrap().id(), "S1");
        assert_eq!(registry.find_by_resource("/teams/T2/channels").unwrap().id(), "S2");
        assert!(registry.find_by_resource("/teams/T3/channels").is_none());
    }

    #[test]
    fn test_remove_others_for_resource_keeps_one() {
        let registry = SubscriptionRegistry::new();
        registry.upsert(record("S1", "/teams/T1/channels", 10));
        registry.upsert(record("S2", "/teams/T1/channels", 60));
        registry.upsert(record("S3", "/teams/T2/channels", 60));

        let mut removed = registry.remove_others_for_resource("/teams/T1/channels", "S2");
        removed.sort();

        assert_eq!(removed, vec!["S1".to_string()]);
        assert!(registry.get("S2").is_some());
        assert!(registry.get("S3").is_some());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_detached_and_ordered() {
        let registry = SubscriptionRegistry::new();
        registry.upsert(record("S1", "/a", 60));
        registry.upsert(record("S2", "/b", 5));

        let snapshot = registry.snapshot();
        registry.remove("S1");
        registry.upsert(record("S9", "/c", 1));

        let ids: Vec<&str> = snapshot.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["S2", "S1"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_failure_counter_resets_on_renewal() {
        let registry = SubscriptionRegistry::new();
        registry.upsert(record("S1", "/a", 60));

        assert_eq!(registry.record_failure("S1"), Some(1));
        assert_eq!(registry.record_failure("S1"), Some(2));
        assert_eq!(registry.max_consecutive_failures(), 2);

        let new_expiration = Utc::now() + Duration::minutes(120);
        assert!(registry.record_renewal("S1", new_expiration, Utc::now()));

        let renewed = registry.get("S1").unwrap();
        assert_eq!(renewed.consecutive_renewal_failures, 0);
        assert_eq!(renewed.expires_at(), new_expiration);
        assert!(renewed.last_renewed_at.is_some());

        assert_eq!(registry.record_failure("missing"), None);
        assert!(!registry.record_renewal("missing", new_expiration, Utc::now()));
    }
}
