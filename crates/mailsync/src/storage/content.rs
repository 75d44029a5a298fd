//! Content store trait for large payloads (body documents, attachment bytes)

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::{AttachmentId, ThreadId};

/// Key addressing one blob in the content store
///
/// Layout:
/// - body document: `{connection_id}/{thread_id}.json`
/// - attachment bytes: `{connection_id}/attachments/{thread_id}/{attachment_id}`
///
/// Keys are derived deterministically, so reprocessing a message overwrites
/// the same blobs with the same content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentKey(pub String);

impl ContentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for the body document of a thread
    pub fn body(connection_id: &str, thread_id: &ThreadId) -> Self {
        Self(format!("{}/{}.json", connection_id, thread_id.as_str()))
    }

    /// Key for the bytes of one attachment
    pub fn attachment(
        connection_id: &str,
        thread_id: &ThreadId,
        attachment_id: &AttachmentId,
    ) -> Self {
        Self(format!(
            "{}/attachments/{}/{}",
            connection_id,
            thread_id.as_str(),
            attachment_id.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Trait for durable key-addressed blob storage
///
/// Writes are idempotent at the key level: putting the same key twice is a
/// harmless overwrite.
pub trait ContentStore: Send + Sync {
    /// Store a blob, returning the key it is addressable under
    fn put(&self, key: &ContentKey, data: &[u8], content_type: &str) -> Result<ContentKey>;

    /// Retrieve a blob, or None if it doesn't exist
    fn get(&self, key: &ContentKey) -> Result<Option<Vec<u8>>>;

    /// Check whether a blob exists
    fn exists(&self, key: &ContentKey) -> Result<bool>;

    /// Delete every blob stored under a connection's prefix
    fn delete_all_for_connection(&self, connection_id: &str) -> Result<()>;

    /// Clear all blobs (for testing/reset)
    fn clear(&self) -> Result<()>;
}
