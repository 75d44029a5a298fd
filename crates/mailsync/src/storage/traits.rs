//! Metadata store trait definition

use anyhow::Result;

use crate::models::{ImportedMessage, MessageId, SyncCursor};

/// Trait for the queryable per-message metadata store
///
/// This trait abstracts over different backends (in-memory, SQLite, a remote
/// database) and carries both the message records and the per-connection
/// sync cursor, which the engine reads before any fetch and writes exactly
/// once at the end of a pass.
pub trait MetadataStore: Send + Sync {
    /// Insert or update a message record, keyed by its deterministic id
    fn upsert_message(&self, message: ImportedMessage) -> Result<()>;

    /// Get a message by deterministic id
    fn get_message(&self, id: &MessageId) -> Result<Option<ImportedMessage>>;

    /// Check if a message record exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// Count message records imported for a connection
    fn count_messages_for_connection(&self, connection_id: &str) -> Result<usize>;

    /// Delete every message record imported for a connection
    ///
    /// Used when a UIDVALIDITY change invalidates the connection's imports:
    /// the full resync rebuilds everything current, and anything not rebuilt
    /// would otherwise linger as a stale-generation orphan.
    fn delete_messages_for_connection(&self, connection_id: &str) -> Result<()>;

    /// Get the sync cursor for a connection, or None if never synced
    fn get_cursor(&self, connection_id: &str) -> Result<Option<SyncCursor>>;

    /// Write the sync cursor for a connection (upsert)
    fn set_cursor(&self, cursor: SyncCursor) -> Result<()>;

    /// Delete the sync cursor for a connection, forcing a full resync
    fn reset_cursor(&self, connection_id: &str) -> Result<()>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
