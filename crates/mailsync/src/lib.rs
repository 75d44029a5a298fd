//! Mailsync crate - Incremental mailbox synchronization engine
//!
//! This crate provides platform-independent sync functionality including:
//! - Domain models (ImportedMessage, SyncCursor, deterministic ids)
//! - MIME decomposition of raw message source
//! - Metadata and content storage trait abstractions
//! - Resumable per-connection sync engine with UID validity handling
//! - Mailbox session abstraction with an in-memory test double
//!
//! The wire protocol itself lives behind the `MailboxClient` and
//! `MailboxSession` traits, so the engine can be driven by any transport.

pub mod config;
pub mod decompose;
pub mod mailbox;
pub mod models;
pub mod storage;
pub mod sync;

pub use config::MailboxConnection;
pub use decompose::{DecomposeError, DecomposedAttachment, DecomposedMessage, MessageDecomposer, MimeDecomposer};
pub use mailbox::{
    FetchItem, FetchItemError, MailboxClient, MailboxSession, MailboxStatus, MemoryMailbox,
    MessageStream, RawMessage, RemoteFlags,
};
pub use models::{
    AttachmentId, AttachmentRef, EmailAddress, ImportedMessage, MessageFlags, MessageId,
    SyncCursor, ThreadId,
};
pub use storage::{
    ContentKey, ContentStore, FileContentStore, InMemoryContentStore, InMemoryMetadataStore,
    MetadataStore, SqliteMetadataStore,
};
pub use sync::{
    MessageError, MessageErrorKind, SyncOptions, SyncReport, ThreadResolver, UidThreading,
    sync_connection,
};
