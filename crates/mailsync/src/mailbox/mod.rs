//! Mailbox client boundary
//!
//! The wire protocol itself lives outside this crate; these traits define
//! the connect/lock/status/fetch/logout surface the sync engine drives. The
//! in-memory implementation here is the reference remote used by tests.

mod memory;

pub use memory::MemoryMailbox;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::MailboxConnection;

/// Status of the monitored mailbox at session open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStatus {
    /// UIDVALIDITY generation token; a change means every previously
    /// observed UID belongs to a dead namespace
    pub uid_validity: u32,
}

/// Flag state reported by the remote for one message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteFlags {
    pub seen: bool,
    pub flagged: bool,
    /// Protocol keywords beyond the standard flags, imported as labels
    pub keywords: Vec<String>,
}

/// One message as fetched from the remote mailbox
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Remote UID, unique and increasing within one UIDVALIDITY generation
    pub uid: u32,
    /// Raw RFC 5322 source; None when the remote returned no body
    pub source: Option<Vec<u8>>,
    /// Delivery timestamp recorded by the remote
    pub internal_date: Option<DateTime<Utc>>,
    pub flags: RemoteFlags,
}

/// A fetch item that could not be retrieved
///
/// Carries the UID so the caller can record and later retry the exact
/// message that failed, without aborting the rest of the fetch.
#[derive(Debug, Error)]
#[error("failed to fetch message {uid}: {detail}")]
pub struct FetchItemError {
    pub uid: u32,
    pub detail: String,
}

/// Item yielded by the lazy fetch sequence
pub type FetchItem = std::result::Result<RawMessage, FetchItemError>;

/// Lazy, finite, non-restartable sequence of fetched messages
///
/// Delivery order is NOT guaranteed ascending; callers must not assume it.
pub type MessageStream<'a> = Box<dyn Iterator<Item = FetchItem> + 'a>;

/// One stateful session against a remote mailbox
///
/// The session and its exclusive mailbox lock are a single resource; the
/// lock must be released on every exit path, so `unlock` is infallible and
/// safe to call unconditionally.
pub trait MailboxSession {
    /// Acquire the exclusive lock on the named mailbox
    fn lock(&mut self, mailbox: &str) -> Result<()>;

    /// Release the mailbox lock; a no-op when not holding it
    fn unlock(&mut self);

    /// Read the current status of the locked mailbox
    fn status(&mut self) -> Result<MailboxStatus>;

    /// Fetch all messages with UID >= `start_uid` (envelope, raw source,
    /// flags). The returned stream is finite and cannot be restarted
    /// mid-iteration.
    fn fetch_from(&mut self, start_uid: u32) -> Result<MessageStream<'_>>;

    /// End the session
    fn logout(&mut self) -> Result<()>;
}

/// Factory for mailbox sessions
pub trait MailboxClient {
    /// Connect and authenticate against the remote endpoint
    fn connect(&self, connection: &MailboxConnection) -> Result<Box<dyn MailboxSession>>;
}
