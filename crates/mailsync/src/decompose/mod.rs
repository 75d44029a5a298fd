//! Message decomposition boundary
//!
//! Turns raw RFC 5322 bytes into the structured parts the per-message
//! pipeline persists. The MIME library sits behind the trait so tests can
//! substitute scripted decomposers.

mod mime;

pub use mime::MimeDecomposer;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::EmailAddress;

/// Decomposition failure for one message
#[derive(Debug, Error)]
pub enum DecomposeError {
    #[error("message could not be parsed as MIME")]
    Malformed,
}

/// One attachment extracted from a message
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposedAttachment {
    pub filename: Option<String>,
    pub content_type: String,
    pub content_id: Option<String>,
    pub data: Vec<u8>,
}

/// Structured parts of one decomposed message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecomposedMessage {
    pub subject: String,
    pub from: Option<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    /// RFC 5322 Message-ID header, if present
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    /// Date header, used as a fallback when the remote reports no
    /// delivery timestamp
    pub date: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<DecomposedAttachment>,
}

/// Trait for MIME decomposition of raw message bytes
pub trait MessageDecomposer: Send + Sync {
    fn decompose(&self, raw: &[u8]) -> Result<DecomposedMessage, DecomposeError>;
}
