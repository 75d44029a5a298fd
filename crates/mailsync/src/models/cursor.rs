//! Sync cursor tracking per-connection import progress
//!
//! Persisted separately from messages so the next pass can resume without
//! re-fetching anything.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable checkpoint for one mailbox connection
///
/// `last_synced_uid` is monotonically non-decreasing within one
/// `uid_validity` generation. When the remote mailbox reports a different
/// `uid_validity`, its UID namespace has been reassigned and the cursor must
/// be discarded wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub connection_id: String,
    /// Highest remote UID the engine has confirmed importing up to
    pub last_synced_uid: u32,
    /// UIDVALIDITY generation token observed when this cursor was written
    pub uid_validity: u32,
    /// When the pass that wrote this cursor completed
    pub last_sync_at: DateTime<Utc>,
}

impl SyncCursor {
    /// Create a cursor after a completed pass
    pub fn new(connection_id: impl Into<String>, last_synced_uid: u32, uid_validity: u32) -> Self {
        Self {
            connection_id: connection_id.into(),
            last_synced_uid,
            uid_validity,
            last_sync_at: Utc::now(),
        }
    }

    /// Cursor with an advanced boundary, never regressing
    pub fn advanced(mut self, uid: u32) -> Self {
        self.last_synced_uid = self.last_synced_uid.max(uid);
        self.last_sync_at = Utc::now();
        self
    }

    /// Whether a freshly observed UIDVALIDITY invalidates this cursor
    pub fn is_invalidated_by(&self, observed_uid_validity: u32) -> bool {
        self.uid_validity != observed_uid_validity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cursor() {
        let cursor = SyncCursor::new("conn", 7, 100);
        assert_eq!(cursor.connection_id, "conn");
        assert_eq!(cursor.last_synced_uid, 7);
        assert_eq!(cursor.uid_validity, 100);
    }

    #[test]
    fn test_advanced_is_monotonic() {
        let cursor = SyncCursor::new("conn", 7, 100);
        let advanced = cursor.clone().advanced(12);
        assert_eq!(advanced.last_synced_uid, 12);

        // Advancing to a lower uid keeps the boundary
        let held = cursor.advanced(3);
        assert_eq!(held.last_synced_uid, 7);
    }

    #[test]
    fn test_invalidation_check() {
        let cursor = SyncCursor::new("conn", 50, 100);
        assert!(!cursor.is_invalidated_by(100));
        assert!(cursor.is_invalidated_by(101));
    }

    #[test]
    fn test_serialization() {
        let cursor = SyncCursor::new("conn", 7, 100);
        let json = serde_json::to_string(&cursor).unwrap();
        let deserialized: SyncCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(cursor, deserialized);
    }
}
