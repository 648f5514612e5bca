// common/src/models/connection.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An accepted realtime connection bound to an authenticated user for a fixed lease
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Opaque identifier assigned by the transport
    pub connection_id: String,
    pub user_id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub connected_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

impl ConnectionRecord {
    /// Create a record whose lease starts at `connected_at`.
    ///
    /// `expires_at - connected_at` is exactly `lease`.
    pub fn new(
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        connected_at: DateTime<Utc>,
        lease: Duration,
    ) -> Self {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        let expires_at = connected_at
            .checked_add_signed(lease)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            connected_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn lease(&self) -> chrono::Duration {
        self.expires_at.signed_duration_since(self.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::from_epoch_seconds;

    #[test]
    fn test_lease_is_exact() {
        let start = from_epoch_seconds(1_700_000_000);
        let record = ConnectionRecord::new("abc", "user-1", start, Duration::from_secs(3600));
        assert_eq!(record.lease().num_seconds(), 3600);
        assert_eq!(record.expires_at.timestamp(), 1_700_003_600);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let start = from_epoch_seconds(1_000);
        let record = ConnectionRecord::new("abc", "user-1", start, Duration::from_secs(10));
        assert!(!record.is_expired(from_epoch_seconds(1_009)));
        assert!(record.is_expired(from_epoch_seconds(1_010)));
        assert!(record.is_expired(from_epoch_seconds(2_000)));
    }

    #[test]
    fn test_serializes_as_epoch_seconds() {
        let record = ConnectionRecord::new("c-1", "u-1", from_epoch_seconds(100), Duration::from_secs(50));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["connectionId"], "c-1");
        assert_eq!(json["connectedAt"], 100);
        assert_eq!(json["expiresAt"], 150);
    }
}
