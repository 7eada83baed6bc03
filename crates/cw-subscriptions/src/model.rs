//! Subscription wire types
//!
//! Field names follow the Graph `subscription` resource (camelCase JSON, `changeType` as a
//! comma-separated string).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    /// created|updated|deleted, requested for every subscription
    pub const ALL: [ChangeType; 3] = [Self::Created, Self::Updated, Self::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown change type '{}'", other)),
        }
    }
}

/// Serde adapter for the comma-separated `changeType` field.
mod change_type_list {
    use super::ChangeType;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(types: &[ChangeType], serializer: S) -> Result<S::Ok, S::Error> {
        let joined = types.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(",");
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<ChangeType>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| part.parse().map_err(de::Error::custom))
            .collect()
    }
}

/// A subscription as known to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub resource: String,
    pub notification_url: String,
    /// Not echoed back by every service on reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    pub expiration_date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_certificate_id: Option<String>,
    #[serde(default)]
    pub include_resource_data: bool,
    #[serde(with = "change_type_list")]
    pub change_type: Vec<ChangeType>,
}

impl Subscription {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date_time <= now
    }

    /// Whether this subscription can keep serving `target_url` without being replaced
    pub fn is_reusable_for(&self, target_url: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.notification_url == target_url
    }

    pub fn watches(&self, resource: &str) -> bool {
        same_resource(&self.resource, resource)
    }
}

/// Body of a create call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    #[serde(with = "change_type_list")]
    pub change_type: Vec<ChangeType>,
    pub notification_url: String,
    pub resource: String,
    pub expiration_date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<String>,
    pub include_resource_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_certificate_id: Option<String>,
}

/// Body of a renewal call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalRequest {
    pub expiration_date_time: DateTime<Utc>,
}

/// Canonical form of a resource path: services echo paths back without the leading
/// slash and with their own casing.
pub fn resource_key(resource: &str) -> String {
    resource.trim().trim_matches('/').to_ascii_lowercase()
}

pub fn same_resource(a: &str, b: &str) -> bool {
    resource_key(a) == resource_key(b)
}
