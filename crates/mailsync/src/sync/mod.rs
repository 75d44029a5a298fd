//! Incremental mailbox synchronization

mod engine;
mod pipeline;
mod threading;

pub use engine::{SyncOptions, SyncReport, sync_connection};
pub use pipeline::{MessageError, MessageErrorKind};
pub use threading::{ThreadResolver, UidThreading};
