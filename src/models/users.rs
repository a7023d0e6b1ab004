use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// The whole persisted document: user id -> record.
pub type Users = BTreeMap<String, UserRecord>;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct UserRecord {
    #[serde(default)]
    pub points: u64,
    #[serde(default)]
    pub referrals: Vec<String>,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp"
    )]
    pub approved_at: Option<NaiveDateTime>,
    #[serde(rename = "first_name", default)]
    pub display_name: Option<String>,
    #[serde(rename = "username", default)]
    pub handle: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub registered_at: Option<NaiveDateTime>,
    #[serde(
        rename = "last_activity",
        default,
        deserialize_with = "lenient_timestamp"
    )]
    pub last_activity_at: Option<NaiveDateTime>,
}

impl UserRecord {
    pub fn new(
        display_name: Option<String>,
        handle: Option<String>,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            display_name,
            handle,
            registered_at: Some(now),
            last_activity_at: Some(now),
            ..Default::default()
        }
    }

    pub fn referral_count(&self) -> usize {
        self.referrals.len()
    }

    pub fn has_referred(&self, user_id: &str) -> bool {
        self.referrals.iter().any(|r| r == user_id)
    }
}

/// Read-only view handed to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UserStatus {
    pub user_id: String,
    pub points: u64,
    pub referral_count: usize,
    pub is_approved: bool,
    pub required: usize,
}

impl UserStatus {
    pub fn from_record(user_id: &str, record: &UserRecord, required: usize) -> Self {
        Self {
            user_id: user_id.to_string(),
            points: record.points,
            referral_count: record.referral_count(),
            is_approved: record.is_approved,
            required,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.referral_count >= self.required
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserStats {
    pub total_users: usize,
    pub completed_users: usize,
    pub pending_users: usize,
    pub total_referrals: usize,
}

// Garbage timestamps become `None` so retention treats them as unknown.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<NaiveDateTime>().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_records_with_legacy_key_names() {
        let raw = r#"{
            "points": 2,
            "referrals": ["11", "12"],
            "is_approved": false,
            "username": "alice",
            "first_name": "Alice",
            "registered_at": "2024-05-01T10:00:00.123456",
            "last_activity": "not a date"
        }"#;

        let record: UserRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.points, 2);
        assert_eq!(record.referral_count(), 2);
        assert_eq!(record.handle.as_deref(), Some("alice"));
        assert_eq!(record.display_name.as_deref(), Some("Alice"));
        assert!(record.registered_at.is_some());
        assert_eq!(record.last_activity_at, None);
    }

    #[test]
    fn missing_fields_default() {
        let record: UserRecord = serde_json::from_str("{}").unwrap();
        assert_eq!(record, UserRecord::default());
    }
}
