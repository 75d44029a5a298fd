//! Domain models for imported mail

mod cursor;
mod ids;
mod message;

pub use cursor::SyncCursor;
pub use ids::{AttachmentId, MessageId, ThreadId};
pub use message::{AttachmentRef, EmailAddress, ImportedMessage, MessageFlags};
