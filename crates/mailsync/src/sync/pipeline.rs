//! Per-message transform/persist pipeline
//!
//! One pipeline run makes one content store body write, zero or more
//! content store attachment writes and one metadata store upsert. Every
//! failure is caught into a typed per-message error so a bad message never
//! aborts the surrounding pass.

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use thiserror::Error;

use super::engine::SyncOptions;
use crate::config::MailboxConnection;
use crate::decompose::{DecomposedMessage, MessageDecomposer};
use crate::mailbox::RawMessage;
use crate::models::{
    AttachmentId, AttachmentRef, EmailAddress, ImportedMessage, MessageFlags, MessageId,
};
use crate::storage::{ContentKey, ContentStore, MetadataStore};

/// Which pipeline step a message failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MessageErrorKind {
    #[error("fetch failed")]
    Fetch,
    #[error("decomposition failed")]
    Decompose,
    #[error("body write failed")]
    BodyWrite,
    #[error("metadata upsert failed")]
    MetadataWrite,
}

/// Typed per-message error record
///
/// Accumulated into the pass report instead of being logged away, so
/// callers can assert on failure counts and retry the exact UIDs involved.
#[derive(Debug, Error)]
#[error("uid {uid}: {kind}: {detail}")]
pub struct MessageError {
    pub uid: u32,
    pub kind: MessageErrorKind,
    pub detail: String,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Processed {
    Imported,
    /// The message carries no usable timestamp; it is malformed input and
    /// will never become valid, so it is skipped for good
    SkippedMissingDate,
}

/// Body document persisted to the content store
#[derive(Debug, Serialize)]
struct BodyDocument<'a> {
    subject: &'a str,
    from: &'a Option<EmailAddress>,
    to: &'a [EmailAddress],
    cc: &'a [EmailAddress],
    bcc: &'a [EmailAddress],
    reply_to: &'a [EmailAddress],
    message_id: &'a str,
    in_reply_to: &'a Option<String>,
    date: DateTime<Utc>,
    text: &'a Option<String>,
    html: &'a Option<String>,
    snippet: &'a str,
}

/// Plain text preview: collapsed whitespace, truncated to `max` characters
fn derive_snippet(text: Option<&str>, max: usize) -> String {
    let Some(text) = text else {
        return String::new();
    };
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max).collect()
}

/// Run the per-message pipeline for one fetched message
///
/// Attachment persist failures are isolated: the failing attachment is
/// recorded with `content_key = None` and the message is imported anyway.
pub(crate) fn process_message(
    raw: &RawMessage,
    source: &[u8],
    connection: &MailboxConnection,
    metadata: &dyn MetadataStore,
    content: &dyn ContentStore,
    decomposer: &dyn MessageDecomposer,
    options: &SyncOptions,
) -> Result<Processed, MessageError> {
    let uid = raw.uid;
    let connection_id = connection.connection_id.as_str();

    let decomposed = decomposer.decompose(source).map_err(|err| MessageError {
        uid,
        kind: MessageErrorKind::Decompose,
        detail: err.to_string(),
    })?;

    // The protocol-reported delivery timestamp is authoritative; the Date
    // header is the fallback. Neither present means malformed input.
    let Some(internal_date) = raw.internal_date.or(decomposed.date) else {
        return Ok(Processed::SkippedMissingDate);
    };

    let thread_id = options.threading.resolve(connection_id, uid, &decomposed);
    // Parsed Message-IDs arrive without angle brackets; synthesized ones
    // use the same bare form so the column stays uniformly comparable
    let message_id = decomposed
        .message_id
        .clone()
        .unwrap_or_else(|| format!("{}@{}", thread_id.as_str(), connection.host));
    let snippet = derive_snippet(decomposed.text.as_deref(), options.snippet_len);

    let body = BodyDocument {
        subject: &decomposed.subject,
        from: &decomposed.from,
        to: &decomposed.to,
        cc: &decomposed.cc,
        bcc: &decomposed.bcc,
        reply_to: &decomposed.reply_to,
        message_id: &message_id,
        in_reply_to: &decomposed.in_reply_to,
        date: internal_date,
        text: &decomposed.text,
        html: &decomposed.html,
        snippet: &snippet,
    };
    let body_bytes = serde_json::to_vec(&body).map_err(|err| MessageError {
        uid,
        kind: MessageErrorKind::BodyWrite,
        detail: err.to_string(),
    })?;

    let body_key = content
        .put(
            &ContentKey::body(connection_id, &thread_id),
            &body_bytes,
            "application/json",
        )
        .map_err(|err| MessageError {
            uid,
            kind: MessageErrorKind::BodyWrite,
            detail: format!("{:#}", err),
        })?;

    let attachments = persist_attachments(&decomposed, connection_id, uid, &thread_id, content);

    let record = ImportedMessage {
        id: MessageId::deterministic(connection_id, uid),
        thread_id,
        connection_id: connection_id.to_string(),
        message_id,
        in_reply_to: decomposed.in_reply_to,
        subject: decomposed.subject,
        from: decomposed.from,
        to: decomposed.to,
        cc: decomposed.cc,
        bcc: decomposed.bcc,
        reply_to: decomposed.reply_to,
        snippet,
        body_content_key: body_key,
        internal_date,
        flags: MessageFlags {
            read: raw.flags.seen,
            starred: raw.flags.flagged,
        },
        labels: raw.flags.keywords.clone(),
        attachments,
    };

    metadata.upsert_message(record).map_err(|err| MessageError {
        uid,
        kind: MessageErrorKind::MetadataWrite,
        detail: format!("{:#}", err),
    })?;

    Ok(Processed::Imported)
}

/// Persist attachment payloads, isolating individual write failures
fn persist_attachments(
    decomposed: &DecomposedMessage,
    connection_id: &str,
    uid: u32,
    thread_id: &crate::models::ThreadId,
    content: &dyn ContentStore,
) -> Vec<AttachmentRef> {
    decomposed
        .attachments
        .iter()
        .enumerate()
        .map(|(index, attachment)| {
            let id = AttachmentId::deterministic(connection_id, uid, index);
            let content_key = if attachment.data.is_empty() {
                None
            } else {
                let key = ContentKey::attachment(connection_id, thread_id, &id);
                match content.put(&key, &attachment.data, &attachment.content_type) {
                    Ok(key) => Some(key),
                    Err(err) => {
                        // A single failed attachment never drops its message
                        warn!(
                            "failed to persist attachment {} of uid {}: {:#}",
                            id.as_str(),
                            uid,
                            err
                        );
                        None
                    }
                }
            };

            AttachmentRef {
                id,
                filename: attachment.filename.clone(),
                content_type: attachment.content_type.clone(),
                size: attachment.data.len(),
                content_id: attachment.content_id.clone(),
                content_key,
            }
        })
        .collect()
}
