//! Thread derivation
//!
//! Grouping by References/In-Reply-To is a larger feature that lives
//! outside this core; thread derivation is pluggable so it can be swapped
//! in without touching the pipeline.

use crate::decompose::DecomposedMessage;
use crate::models::ThreadId;

/// Pluggable derivation of a thread id for one remote message
pub trait ThreadResolver: Send + Sync {
    fn resolve(&self, connection_id: &str, uid: u32, message: &DecomposedMessage) -> ThreadId;
}

/// Default model: one message is its own thread
#[derive(Debug, Clone, Copy, Default)]
pub struct UidThreading;

impl ThreadResolver for UidThreading {
    fn resolve(&self, connection_id: &str, uid: u32, _message: &DecomposedMessage) -> ThreadId {
        ThreadId::deterministic(connection_id, uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_threading_is_deterministic() {
        let resolver = UidThreading;
        let message = DecomposedMessage::default();
        assert_eq!(
            resolver.resolve("conn", 5, &message),
            ThreadId::new("conn#5")
        );
        assert_eq!(
            resolver.resolve("conn", 5, &message),
            resolver.resolve("conn", 5, &message)
        );
    }
}
