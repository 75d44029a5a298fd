//! Imported message model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AttachmentId, MessageId, ThreadId};
use crate::storage::ContentKey;

/// An email address with optional display name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Parse an email address from a string like "John Doe <john@example.com>"
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        // Try to parse "Name <email>" format
        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        // Otherwise, treat the whole string as an email
        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Read/starred state of an imported message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub read: bool,
    pub starred: bool,
}

/// Reference to one attachment of an imported message
///
/// `content_key` is `None` when the attachment payload could not be persisted
/// to the content store. That is a recorded partial failure; the parent
/// message is imported regardless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub id: AttachmentId,
    pub filename: Option<String>,
    pub content_type: String,
    pub size: usize,
    pub content_id: Option<String>,
    pub content_key: Option<ContentKey>,
}

/// The durable metadata record for one remote message
///
/// Created at most once per remote UID: the deterministic `id` makes the
/// metadata upsert idempotent, so reprocessing the same remote message
/// overwrites the same record instead of duplicating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedMessage {
    /// Deterministic id, `{connection_id}#{uid}`
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub connection_id: String,
    /// RFC 5322 Message-ID header, or a synthesized one if the header is absent
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub subject: String,
    pub from: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    /// Plain text preview of the body
    pub snippet: String,
    /// Content store key of the persisted body document
    pub body_content_key: ContentKey,
    pub internal_date: DateTime<Utc>,
    pub flags: MessageFlags,
    pub labels: Vec<String>,
    pub attachments: Vec<AttachmentRef>,
}
