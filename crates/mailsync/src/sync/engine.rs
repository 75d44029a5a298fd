//! Incremental sync pass over one mailbox connection
//!
//! A pass loads the stored cursor, locks the mailbox, checks the UID
//! validity token, streams messages above the cursor through the
//! per-message pipeline and writes the cursor back exactly once at the
//! end. The mailbox lock is released on every exit path.

use anyhow::{Context, Result};
use log::{info, warn};

use super::pipeline::{MessageError, MessageErrorKind, Processed, process_message};
use super::threading::{ThreadResolver, UidThreading};
use crate::config::MailboxConnection;
use crate::decompose::MessageDecomposer;
use crate::mailbox::{MailboxClient, MailboxSession};
use crate::models::SyncCursor;
use crate::storage::{ContentStore, MetadataStore};

/// Tunables for a sync pass
pub struct SyncOptions {
    /// Maximum snippet length in characters
    pub snippet_len: usize,
    /// Strategy for assigning messages to threads
    pub threading: Box<dyn ThreadResolver>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            snippet_len: 200,
            threading: Box::new(UidThreading),
        }
    }
}

/// Outcome of one sync pass
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Messages imported (new or re-imported)
    pub imported: usize,
    /// Messages skipped as permanently unusable
    pub skipped: usize,
    /// Highest UID seen above the cursor during this pass
    pub highest_uid: u32,
    /// Per-message failures accumulated during the pass
    pub errors: Vec<MessageError>,
}

/// Run one incremental sync pass for a connection
///
/// Connects, takes the mailbox lock, runs the pass and releases the lock
/// before logging out, whether the pass succeeded or not.
pub fn sync_connection(
    connection: &MailboxConnection,
    client: &dyn MailboxClient,
    metadata: &dyn MetadataStore,
    content: &dyn ContentStore,
    decomposer: &dyn MessageDecomposer,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let cursor = metadata.get_cursor(&connection.connection_id)?;

    let mut session = client
        .connect(connection)
        .with_context(|| format!("failed to connect for {}", connection.connection_id))?;
    session
        .lock(&connection.mailbox)
        .with_context(|| format!("failed to lock mailbox {}", connection.mailbox))?;

    // No early returns between lock and unlock
    let outcome = run_pass(
        session.as_mut(),
        cursor,
        connection,
        metadata,
        content,
        decomposer,
        options,
    );

    session.unlock();
    if let Err(err) = session.logout() {
        warn!("logout failed for {}: {:#}", connection.connection_id, err);
    }

    outcome
}

fn run_pass(
    session: &mut dyn MailboxSession,
    cursor: Option<SyncCursor>,
    connection: &MailboxConnection,
    metadata: &dyn MetadataStore,
    content: &dyn ContentStore,
    decomposer: &dyn MessageDecomposer,
    options: &SyncOptions,
) -> Result<SyncReport> {
    let connection_id = connection.connection_id.as_str();

    let status = session.status().context("failed to read mailbox status")?;
    let observed_validity = status.uid_validity;

    let (boundary, prior) = match cursor {
        Some(cursor) if !cursor.is_invalidated_by(observed_validity) => {
            (cursor.last_synced_uid, Some(cursor))
        }
        Some(cursor) => {
            info!(
                "uid validity for {} changed ({} -> {}), purging and resyncing from scratch",
                connection_id, cursor.uid_validity, observed_validity
            );
            metadata
                .reset_cursor(connection_id)
                .context("failed to reset sync cursor")?;
            metadata
                .delete_messages_for_connection(connection_id)
                .context("failed to purge message metadata")?;
            content
                .delete_all_for_connection(connection_id)
                .context("failed to purge message content")?;
            (0, None)
        }
        None => (0, None),
    };

    info!("syncing {} from uid {}", connection_id, boundary + 1);

    let mut report = SyncReport::default();
    let mut highest_processed: u32 = 0;
    let mut lowest_failed: Option<u32> = None;

    // Protocol delivery order is not guaranteed ascending; the stream is
    // finite and not restartable, so drain it and sort by UID
    let mut items: Vec<_> = session
        .fetch_from(boundary + 1)
        .context("failed to start message fetch")?
        .collect();
    items.sort_by_key(|item| match item {
        Ok(raw) => raw.uid,
        Err(err) => err.uid,
    });

    for item in items {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) => {
                warn!("fetch failed for {}: {}", connection_id, err);
                lowest_failed = Some(lowest_failed.map_or(err.uid, |low| low.min(err.uid)));
                report.errors.push(MessageError {
                    uid: err.uid,
                    kind: MessageErrorKind::Fetch,
                    detail: err.detail,
                });
                continue;
            }
        };

        // Servers may redeliver identities at or below the confirmed
        // boundary when fetch windows overlap
        if raw.uid <= boundary {
            continue;
        }

        report.highest_uid = report.highest_uid.max(raw.uid);

        let Some(source) = raw.source.as_deref() else {
            // Nothing to decompose and nothing will appear later
            report.skipped += 1;
            highest_processed = highest_processed.max(raw.uid);
            continue;
        };

        match process_message(
            &raw, source, connection, metadata, content, decomposer, options,
        ) {
            Ok(Processed::Imported) => {
                report.imported += 1;
                highest_processed = highest_processed.max(raw.uid);
            }
            Ok(Processed::SkippedMissingDate) => {
                report.skipped += 1;
                highest_processed = highest_processed.max(raw.uid);
            }
            Err(err) => {
                warn!("import failed for {}: {}", connection_id, err);
                lowest_failed = Some(lowest_failed.map_or(err.uid, |low| low.min(err.uid)));
                report.errors.push(err);
            }
        }
    }

    // The cursor never advances past a failed UID, so failures are retried
    // on the next pass; `advanced` keeps the boundary from regressing.
    let target = match lowest_failed {
        Some(failed) => highest_processed.min(failed.saturating_sub(1)),
        None => highest_processed,
    };
    let new_boundary = target.max(boundary);

    if report.highest_uid > 0 {
        let next = match prior {
            Some(prev) => prev.advanced(target),
            None => SyncCursor::new(connection_id.to_string(), target, observed_validity),
        };
        metadata
            .set_cursor(next)
            .context("failed to write sync cursor")?;
    } else if prior.is_none() && observed_validity != 0 {
        // Empty mailbox on first contact: pin the validity token so the
        // next pass can detect invalidation
        metadata
            .set_cursor(SyncCursor::new(
                connection_id.to_string(),
                0,
                observed_validity,
            ))
            .context("failed to write sync cursor")?;
    }

    info!(
        "synced {}: {} imported, {} skipped, {} failed, cursor at {}",
        connection_id,
        report.imported,
        report.skipped,
        report.errors.len(),
        new_boundary
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::MimeDecomposer;
    use crate::mailbox::{MemoryMailbox, RawMessage, RemoteFlags};
    use crate::models::MessageId;
    use crate::storage::{ContentKey, InMemoryContentStore, InMemoryMetadataStore};
    use chrono::Utc;

    fn connection() -> MailboxConnection {
        MailboxConnection::new("conn", "imap.example.com", "user", "secret")
    }

    fn raw_message(uid: u32) -> RawMessage {
        let source = format!(
            "From: alice@example.com\r\nTo: bob@example.com\r\n\
             Subject: Message {uid}\r\nDate: Tue, 14 Jan 2025 10:30:00 +0000\r\n\
             Message-ID: <m{uid}@example.com>\r\n\r\nBody of message {uid}.\r\n"
        );
        RawMessage {
            uid,
            source: Some(source.into_bytes()),
            internal_date: Some(Utc::now()),
            flags: RemoteFlags::default(),
        }
    }

    fn sync(
        mailbox: &MemoryMailbox,
        metadata: &InMemoryMetadataStore,
        content: &InMemoryContentStore,
    ) -> Result<SyncReport> {
        sync_connection(
            &connection(),
            mailbox,
            metadata,
            content,
            &MimeDecomposer::new(),
            &SyncOptions::default(),
        )
    }

    #[test]
    fn test_first_pass_imports_everything() {
        let mailbox = MemoryMailbox::new(1);
        for uid in [5, 9, 7] {
            mailbox.push(raw_message(uid));
        }
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 3);
        assert_eq!(report.highest_uid, 9);
        assert!(report.errors.is_empty());

        let cursor = metadata.get_cursor("conn").unwrap().unwrap();
        assert_eq!(cursor.last_synced_uid, 9);
        assert_eq!(cursor.uid_validity, 1);
        assert!(metadata.has_message(&MessageId::new("conn#5")).unwrap());
    }

    #[test]
    fn test_second_pass_resumes_above_cursor() {
        let mailbox = MemoryMailbox::new(1);
        mailbox.push(raw_message(3));
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(metadata.upsert_count(), 1);

        mailbox.push(raw_message(4));
        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 1);
        // Message 3 was not re-imported
        assert_eq!(metadata.upsert_count(), 2);
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            4
        );
    }

    #[test]
    fn test_uid_validity_change_purges_and_resyncs() {
        let mailbox = MemoryMailbox::new(10);
        for uid in [5, 6, 7] {
            mailbox.push(raw_message(uid));
        }
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(metadata.count_messages_for_connection("conn").unwrap(), 3);

        // Mailbox recreated under a new validity token with fewer messages
        mailbox.recreate(11);
        for uid in [1, 2] {
            mailbox.push(raw_message(uid));
        }

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(metadata.count_messages_for_connection("conn").unwrap(), 2);
        assert!(metadata.has_message(&MessageId::new("conn#1")).unwrap());
        assert!(!metadata.has_message(&MessageId::new("conn#5")).unwrap());

        let cursor = metadata.get_cursor("conn").unwrap().unwrap();
        assert_eq!(cursor.last_synced_uid, 2);
        assert_eq!(cursor.uid_validity, 11);
    }

    #[test]
    fn test_empty_mailbox_first_sync_pins_validity() {
        let mailbox = MemoryMailbox::new(42);
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 0);

        let cursor = metadata.get_cursor("conn").unwrap().unwrap();
        assert_eq!(cursor.last_synced_uid, 0);
        assert_eq!(cursor.uid_validity, 42);
    }

    #[test]
    fn test_failed_message_holds_cursor_for_retry() {
        let mailbox = MemoryMailbox::new(1);
        for uid in [5, 6, 7] {
            mailbox.push(raw_message(uid));
        }
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();
        // Body write for message 6 fails on the first pass
        content.inject_put_failure(&ContentKey::body("conn", &crate::models::ThreadId::new(
            "conn#6",
        )));

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].uid, 6);
        assert_eq!(report.errors[0].kind, MessageErrorKind::BodyWrite);

        // Cursor stops just below the failure so 6 and 7 are retried
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            5
        );

        content.heal_put_failures();
        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 2);
        assert!(report.errors.is_empty());
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            7
        );
    }

    #[test]
    fn test_cursor_holds_when_every_new_message_fails() {
        let mailbox = MemoryMailbox::new(1);
        for uid in [1, 2] {
            mailbox.push(raw_message(uid));
        }
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            2
        );

        // The only new message fails; the boundary must not move backwards
        mailbox.push(raw_message(3));
        content.inject_put_failure(&ContentKey::body("conn", &crate::models::ThreadId::new(
            "conn#3",
        )));

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            2
        );
    }

    #[test]
    fn test_fetch_item_failure_is_accumulated() {
        let mailbox = MemoryMailbox::new(1);
        mailbox.push(raw_message(4));
        mailbox.push(raw_message(5));
        mailbox.poison_uid(5);
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, MessageErrorKind::Fetch);
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            4
        );
    }

    #[test]
    fn test_lock_released_when_fetch_fails() {
        let mailbox = MemoryMailbox::new(1);
        mailbox.fail_next_fetch();
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        let result = sync(&mailbox, &metadata, &content);
        assert!(result.is_err());
        assert!(!mailbox.is_locked());

        // A subsequent pass can take the lock again
        mailbox.push(raw_message(1));
        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 1);
    }

    #[test]
    fn test_missing_source_is_skipped_and_cursor_advances() {
        let mailbox = MemoryMailbox::new(1);
        mailbox.push(RawMessage {
            uid: 2,
            source: None,
            internal_date: Some(Utc::now()),
            flags: RemoteFlags::default(),
        });
        let metadata = InMemoryMetadataStore::new();
        let content = InMemoryContentStore::new();

        let report = sync(&mailbox, &metadata, &content).unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            metadata.get_cursor("conn").unwrap().unwrap().last_synced_uid,
            2
        );
    }
}
