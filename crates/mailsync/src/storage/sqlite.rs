//! SQLite-based metadata storage

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::content::ContentKey;
use super::traits::MetadataStore;
use crate::models::{
    AttachmentId, AttachmentRef, EmailAddress, ImportedMessage, MessageFlags, MessageId,
    SyncCursor, ThreadId,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Sync cursor per mailbox connection
            CREATE TABLE sync_cursors (
                connection_id TEXT PRIMARY KEY,
                last_synced_uid INTEGER NOT NULL,
                uid_validity INTEGER NOT NULL,
                last_sync_at TEXT NOT NULL
            );

            -- Imported message metadata, keyed by deterministic id.
            -- Participant lists and labels are stored as JSON text: this
            -- core never queries by participant, so normalized recipient
            -- tables would buy nothing.
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                connection_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                in_reply_to TEXT,
                subject TEXT NOT NULL,
                from_json TEXT NOT NULL,
                to_json TEXT NOT NULL,
                cc_json TEXT NOT NULL,
                bcc_json TEXT NOT NULL,
                reply_to_json TEXT NOT NULL,
                snippet TEXT NOT NULL,
                body_content_key TEXT NOT NULL,
                internal_date TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                is_starred INTEGER NOT NULL DEFAULT 0,
                labels_json TEXT NOT NULL
            );

            CREATE INDEX idx_messages_connection ON messages(connection_id);

            -- Attachment references, including recorded partial failures
            -- (content_key NULL means the payload failed to persist)
            CREATE TABLE attachments (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                filename TEXT,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                content_id TEXT,
                content_key TEXT,
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_attachments_message ON attachments(message_id);
            "#,
        ),
    ])
}

/// SQLite-based metadata store
///
/// Holds queryable message records and sync cursors. Large content lives in
/// a ContentStore; this table only keeps the keys.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Create a new SQLite metadata store at the given database path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL for concurrent readers during writes; NORMAL sync is safe
        // under WAL; foreign_keys needed for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_attachments(conn: &Connection, message_id: &str) -> Result<Vec<AttachmentRef>> {
        let mut stmt = conn.prepare(
            "SELECT id, filename, content_type, size, content_id, content_key
             FROM attachments WHERE message_id = ? ORDER BY position",
        )?;

        let rows = stmt
            .query_map([message_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .map(
                |(id, filename, content_type, size, content_id, content_key)| AttachmentRef {
                    id: AttachmentId::new(id),
                    filename,
                    content_type,
                    size: size as usize,
                    content_id,
                    content_key: content_key.map(ContentKey::new),
                },
            )
            .collect())
    }

    fn load_message(conn: &Connection, id: &str) -> Result<Option<ImportedMessage>> {
        type Row = (
            String,
            String,
            String,
            Option<String>,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            bool,
            bool,
            String,
        );

        let row: Option<Row> = conn
            .query_row(
                "SELECT thread_id, connection_id, message_id, in_reply_to, subject,
                        from_json, to_json, cc_json, bcc_json, reply_to_json,
                        snippet, body_content_key, internal_date, is_read, is_starred,
                        labels_json
                 FROM messages WHERE id = ?",
                [id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                        row.get(10)?,
                        row.get(11)?,
                        row.get(12)?,
                        row.get(13)?,
                        row.get(14)?,
                        row.get(15)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            thread_id,
            connection_id,
            message_id,
            in_reply_to,
            subject,
            from_json,
            to_json,
            cc_json,
            bcc_json,
            reply_to_json,
            snippet,
            body_content_key,
            internal_date,
            is_read,
            is_starred,
            labels_json,
        )) = row
        else {
            return Ok(None);
        };

        let from: Option<EmailAddress> =
            serde_json::from_str(&from_json).context("Failed to parse from_json")?;
        let to: Vec<EmailAddress> =
            serde_json::from_str(&to_json).context("Failed to parse to_json")?;
        let cc: Vec<EmailAddress> =
            serde_json::from_str(&cc_json).context("Failed to parse cc_json")?;
        let bcc: Vec<EmailAddress> =
            serde_json::from_str(&bcc_json).context("Failed to parse bcc_json")?;
        let reply_to: Vec<EmailAddress> =
            serde_json::from_str(&reply_to_json).context("Failed to parse reply_to_json")?;
        let labels: Vec<String> =
            serde_json::from_str(&labels_json).context("Failed to parse labels_json")?;
        let internal_date = DateTime::parse_from_rfc3339(&internal_date)
            .context("Failed to parse internal_date")?
            .with_timezone(&Utc);

        let attachments = Self::load_attachments(conn, id)?;

        Ok(Some(ImportedMessage {
            id: MessageId::new(id),
            thread_id: ThreadId::new(thread_id),
            connection_id,
            message_id,
            in_reply_to,
            subject,
            from,
            to,
            cc,
            bcc,
            reply_to,
            snippet,
            body_content_key: ContentKey::new(body_content_key),
            internal_date,
            flags: MessageFlags {
                read: is_read,
                starred: is_starred,
            },
            labels,
            attachments,
        }))
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert_message(&self, message: ImportedMessage) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO messages
                (id, thread_id, connection_id, message_id, in_reply_to, subject,
                 from_json, to_json, cc_json, bcc_json, reply_to_json,
                 snippet, body_content_key, internal_date, is_read, is_starred, labels_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                thread_id = excluded.thread_id,
                connection_id = excluded.connection_id,
                message_id = excluded.message_id,
                in_reply_to = excluded.in_reply_to,
                subject = excluded.subject,
                from_json = excluded.from_json,
                to_json = excluded.to_json,
                cc_json = excluded.cc_json,
                bcc_json = excluded.bcc_json,
                reply_to_json = excluded.reply_to_json,
                snippet = excluded.snippet,
                body_content_key = excluded.body_content_key,
                internal_date = excluded.internal_date,
                is_read = excluded.is_read,
                is_starred = excluded.is_starred,
                labels_json = excluded.labels_json",
            params![
                message.id.as_str(),
                message.thread_id.as_str(),
                message.connection_id,
                message.message_id,
                message.in_reply_to,
                message.subject,
                serde_json::to_string(&message.from)?,
                serde_json::to_string(&message.to)?,
                serde_json::to_string(&message.cc)?,
                serde_json::to_string(&message.bcc)?,
                serde_json::to_string(&message.reply_to)?,
                message.snippet,
                message.body_content_key.as_str(),
                message.internal_date.to_rfc3339(),
                message.flags.read,
                message.flags.starred,
                serde_json::to_string(&message.labels)?,
            ],
        )?;

        // Replace attachments wholesale; the set is small and position-keyed
        tx.execute(
            "DELETE FROM attachments WHERE message_id = ?",
            [message.id.as_str()],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO attachments
                    (id, message_id, position, filename, content_type, size, content_id, content_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, att) in message.attachments.iter().enumerate() {
                stmt.execute(params![
                    att.id.as_str(),
                    message.id.as_str(),
                    position as i64,
                    att.filename,
                    att.content_type,
                    att.size as i64,
                    att.content_id,
                    att.content_key.as_ref().map(|k| k.as_str().to_string()),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<ImportedMessage>> {
        let conn = self.conn.lock().unwrap();
        Self::load_message(&conn, id.as_str())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages WHERE id = ?",
                [id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn count_messages_for_connection(&self, connection_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE connection_id = ?",
            [connection_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn delete_messages_for_connection(&self, connection_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM messages WHERE connection_id = ?",
            [connection_id],
        )?;
        Ok(())
    }

    fn get_cursor(&self, connection_id: &str) -> Result<Option<SyncCursor>> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, i64, String)> = conn
            .query_row(
                "SELECT last_synced_uid, uid_validity, last_sync_at
                 FROM sync_cursors WHERE connection_id = ?",
                [connection_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((last_synced_uid, uid_validity, last_sync_at)) = row else {
            return Ok(None);
        };

        Ok(Some(SyncCursor {
            connection_id: connection_id.to_string(),
            last_synced_uid: last_synced_uid as u32,
            uid_validity: uid_validity as u32,
            last_sync_at: DateTime::parse_from_rfc3339(&last_sync_at)
                .context("Failed to parse last_sync_at")?
                .with_timezone(&Utc),
        }))
    }

    fn set_cursor(&self, cursor: SyncCursor) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sync_cursors (connection_id, last_synced_uid, uid_validity, last_sync_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(connection_id) DO UPDATE SET
                last_synced_uid = excluded.last_synced_uid,
                uid_validity = excluded.uid_validity,
                last_sync_at = excluded.last_sync_at",
            params![
                cursor.connection_id,
                cursor.last_synced_uid as i64,
                cursor.uid_validity as i64,
                cursor.last_sync_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn reset_cursor(&self, connection_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM sync_cursors WHERE connection_id = ?",
            [connection_id],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "DELETE FROM attachments;
             DELETE FROM messages;
             DELETE FROM sync_cursors;",
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_message(connection_id: &str, uid: u32) -> ImportedMessage {
        let id = MessageId::deterministic(connection_id, uid);
        let thread_id = ThreadId::deterministic(connection_id, uid);
        ImportedMessage {
            body_content_key: ContentKey::body(connection_id, &thread_id),
            id,
            thread_id,
            connection_id: connection_id.to_string(),
            message_id: format!("{}@example.com", uid),
            in_reply_to: None,
            subject: format!("Message {}", uid),
            from: Some(EmailAddress::with_name("Test User", "test@example.com")),
            to: vec![EmailAddress::new("dest@example.com")],
            cc: Vec::new(),
            bcc: Vec::new(),
            reply_to: Vec::new(),
            snippet: "Hello".to_string(),
            internal_date: Utc::now(),
            flags: MessageFlags {
                read: true,
                starred: false,
            },
            labels: vec!["inbox".to_string()],
            attachments: vec![AttachmentRef {
                id: AttachmentId::deterministic(connection_id, uid, 0),
                filename: Some("report.pdf".to_string()),
                content_type: "application/pdf".to_string(),
                size: 1024,
                content_id: None,
                content_key: None,
            }],
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> SqliteMetadataStore {
        SqliteMetadataStore::new(dir.path().join("meta.db")).unwrap()
    }

    #[test]
    fn test_upsert_and_get_message() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let message = make_message("conn", 5);
        store.upsert_message(message.clone()).unwrap();

        let loaded = store.get_message(&message.id).unwrap().unwrap();
        assert_eq!(loaded.id, message.id);
        assert_eq!(loaded.subject, message.subject);
        assert_eq!(loaded.from, message.from);
        assert_eq!(loaded.attachments.len(), 1);
        assert_eq!(loaded.attachments[0].content_key, None);
        assert_eq!(loaded.labels, vec!["inbox".to_string()]);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let message = make_message("conn", 5);
        store.upsert_message(message.clone()).unwrap();
        store.upsert_message(message.clone()).unwrap();

        assert_eq!(store.count_messages_for_connection("conn").unwrap(), 1);
        let loaded = store.get_message(&message.id).unwrap().unwrap();
        assert_eq!(loaded.attachments.len(), 1);
    }

    #[test]
    fn test_delete_messages_for_connection() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.upsert_message(make_message("conn-a", 1)).unwrap();
        store.upsert_message(make_message("conn-a", 2)).unwrap();
        store.upsert_message(make_message("conn-b", 1)).unwrap();

        store.delete_messages_for_connection("conn-a").unwrap();

        assert_eq!(store.count_messages_for_connection("conn-a").unwrap(), 0);
        assert_eq!(store.count_messages_for_connection("conn-b").unwrap(), 1);
    }

    #[test]
    fn test_cursor_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.get_cursor("conn").unwrap().is_none());

        store.set_cursor(SyncCursor::new("conn", 7, 100)).unwrap();
        let cursor = store.get_cursor("conn").unwrap().unwrap();
        assert_eq!(cursor.last_synced_uid, 7);
        assert_eq!(cursor.uid_validity, 100);

        // Upsert replaces
        store.set_cursor(SyncCursor::new("conn", 12, 100)).unwrap();
        let cursor = store.get_cursor("conn").unwrap().unwrap();
        assert_eq!(cursor.last_synced_uid, 12);

        store.reset_cursor("conn").unwrap();
        assert!(store.get_cursor("conn").unwrap().is_none());
    }
}
