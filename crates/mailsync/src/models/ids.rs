//! Deterministic identifiers for imported messages
//!
//! All ids are derived purely from the connection id and the remote UID, so
//! reprocessing the same remote message always addresses the same records.

use serde::{Deserialize, Serialize};

/// Unique identifier for an imported message
///
/// Derived as `{connection_id}#{uid}`. Stable across repeated syncs of the
/// same remote message, which makes metadata upserts idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the deterministic id for a remote message
    pub fn deterministic(connection_id: &str, uid: u32) -> Self {
        Self(format!("{}#{}", connection_id, uid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a conversation thread
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the thread id for the default one-message-one-thread model
    pub fn deterministic(connection_id: &str, uid: u32) -> Self {
        Self(format!("{}#{}", connection_id, uid))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for an attachment of an imported message
///
/// Derived as `{connection_id}#{uid}#{index}` where `index` is the zero-based
/// position of the attachment within the decomposed message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

impl AttachmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the deterministic id for one attachment
    pub fn deterministic(connection_id: &str, uid: u32, index: usize) -> Self {
        Self(format!("{}#{}#{}", connection_id, uid, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
