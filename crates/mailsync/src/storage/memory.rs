//! In-memory storage implementations
//!
//! Used for testing and as stand-ins before a real backend is wired up.
//! Both stores track write counts so tests can assert on idempotence, and
//! the content store supports per-key failure injection for exercising the
//! engine's partial-failure paths.

use anyhow::{Result, anyhow};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::content::{ContentKey, ContentStore};
use super::traits::MetadataStore;
use crate::models::{ImportedMessage, MessageId, SyncCursor};

/// In-memory implementation of MetadataStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
pub struct InMemoryMetadataStore {
    messages: RwLock<HashMap<String, ImportedMessage>>,
    cursors: RwLock<HashMap<String, SyncCursor>>,
    upserts: AtomicUsize,
}

impl InMemoryMetadataStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            upserts: AtomicUsize::new(0),
        }
    }

    /// Total number of upsert_message calls observed
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn upsert_message(&self, message: ImportedMessage) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let mut messages = self.messages.write().unwrap();
        messages.insert(message.id.as_str().to_string(), message);
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<ImportedMessage>> {
        let messages = self.messages.read().unwrap();
        Ok(messages.get(id.as_str()).cloned())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let messages = self.messages.read().unwrap();
        Ok(messages.contains_key(id.as_str()))
    }

    fn count_messages_for_connection(&self, connection_id: &str) -> Result<usize> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .values()
            .filter(|m| m.connection_id == connection_id)
            .count())
    }

    fn delete_messages_for_connection(&self, connection_id: &str) -> Result<()> {
        let mut messages = self.messages.write().unwrap();
        messages.retain(|_, m| m.connection_id != connection_id);
        Ok(())
    }

    fn get_cursor(&self, connection_id: &str) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.read().unwrap();
        Ok(cursors.get(connection_id).cloned())
    }

    fn set_cursor(&self, cursor: SyncCursor) -> Result<()> {
        let mut cursors = self.cursors.write().unwrap();
        cursors.insert(cursor.connection_id.clone(), cursor);
        Ok(())
    }

    fn reset_cursor(&self, connection_id: &str) -> Result<()> {
        let mut cursors = self.cursors.write().unwrap();
        cursors.remove(connection_id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.messages.write().unwrap().clear();
        self.cursors.write().unwrap().clear();
        Ok(())
    }
}

/// In-memory implementation of ContentStore
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    failing_keys: RwLock<HashSet<String>>,
    puts: AtomicUsize,
}

impl InMemoryContentStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            failing_keys: RwLock::new(HashSet::new()),
            puts: AtomicUsize::new(0),
        }
    }

    /// Make every put of the given key fail
    pub fn inject_put_failure(&self, key: &ContentKey) {
        self.failing_keys
            .write()
            .unwrap()
            .insert(key.as_str().to_string());
    }

    /// Clear all injected put failures
    pub fn heal_put_failures(&self) {
        self.failing_keys.write().unwrap().clear();
    }

    /// Total number of successful put calls observed
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore for InMemoryContentStore {
    fn put(&self, key: &ContentKey, data: &[u8], _content_type: &str) -> Result<ContentKey> {
        if self.failing_keys.read().unwrap().contains(key.as_str()) {
            return Err(anyhow!("injected put failure for {}", key.as_str()));
        }
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert(key.as_str().to_string(), data.to_vec());
        Ok(key.clone())
    }

    fn get(&self, key: &ContentKey) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs.get(key.as_str()).cloned())
    }

    fn exists(&self, key: &ContentKey) -> Result<bool> {
        let blobs = self.blobs.read().unwrap();
        Ok(blobs.contains_key(key.as_str()))
    }

    fn delete_all_for_connection(&self, connection_id: &str) -> Result<()> {
        let prefix = format!("{}/", connection_id);
        let mut blobs = self.blobs.write().unwrap();
        blobs.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.blobs.write().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ThreadId;

    #[test]
    fn test_cursor_roundtrip() {
        let store = InMemoryMetadataStore::new();
        assert!(store.get_cursor("conn").unwrap().is_none());

        store.set_cursor(SyncCursor::new("conn", 7, 100)).unwrap();
        let cursor = store.get_cursor("conn").unwrap().unwrap();
        assert_eq!(cursor.last_synced_uid, 7);
        assert_eq!(cursor.uid_validity, 100);

        store.reset_cursor("conn").unwrap();
        assert!(store.get_cursor("conn").unwrap().is_none());
    }

    #[test]
    fn test_content_put_failure_injection() {
        let store = InMemoryContentStore::new();
        let good = ContentKey::body("conn", &ThreadId::new("conn#1"));
        let bad = ContentKey::body("conn", &ThreadId::new("conn#2"));
        store.inject_put_failure(&bad);

        assert!(store.put(&good, b"data", "application/json").is_ok());
        assert!(store.put(&bad, b"data", "application/json").is_err());
        assert!(store.exists(&good).unwrap());
        assert!(!store.exists(&bad).unwrap());
    }

    #[test]
    fn test_delete_all_for_connection() {
        let store = InMemoryContentStore::new();
        let a = ContentKey::new("conn-a/t1.json");
        let b = ContentKey::new("conn-b/t1.json");
        store.put(&a, b"a", "application/json").unwrap();
        store.put(&b, b"b", "application/json").unwrap();

        store.delete_all_for_connection("conn-a").unwrap();

        assert!(!store.exists(&a).unwrap());
        assert!(store.exists(&b).unwrap());
    }
}
