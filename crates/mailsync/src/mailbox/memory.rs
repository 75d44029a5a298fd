//! In-memory mailbox implementation
//!
//! A scriptable remote used by the engine tests: messages can be added in
//! arbitrary delivery order, the UIDVALIDITY generation can be bumped to
//! simulate a recreated mailbox, and individual UIDs or whole fetches can
//! be made to fail.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};

use super::{FetchItemError, MailboxClient, MailboxSession, MailboxStatus, MessageStream, RawMessage};
use crate::config::MailboxConnection;

struct RemoteState {
    uid_validity: u32,
    /// Messages in delivery order, deliberately not sorted by UID
    messages: Vec<RawMessage>,
    /// UIDs whose fetch yields an item error
    poisoned_uids: HashSet<u32>,
    /// When set, the next fetch_from call fails outright
    fail_next_fetch: bool,
    locked: bool,
}

/// In-memory remote mailbox
///
/// Cloning shares the underlying state, so a test can keep a handle while
/// the engine drives sessions against the same mailbox.
#[derive(Clone)]
pub struct MemoryMailbox {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryMailbox {
    /// Create an empty mailbox with the given UIDVALIDITY
    pub fn new(uid_validity: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState {
                uid_validity,
                messages: Vec::new(),
                poisoned_uids: HashSet::new(),
                fail_next_fetch: false,
                locked: false,
            })),
        }
    }

    /// Append a message in delivery order
    pub fn push(&self, message: RawMessage) {
        self.state.lock().unwrap().messages.push(message);
    }

    /// Recreate the mailbox: new UIDVALIDITY, all previous messages gone
    pub fn recreate(&self, uid_validity: u32) {
        let mut state = self.state.lock().unwrap();
        state.uid_validity = uid_validity;
        state.messages.clear();
        state.poisoned_uids.clear();
    }

    /// Make fetching the given UID yield an item error
    pub fn poison_uid(&self, uid: u32) {
        self.state.lock().unwrap().poisoned_uids.insert(uid);
    }

    /// Stop poisoning the given UID
    pub fn heal_uid(&self, uid: u32) {
        self.state.lock().unwrap().poisoned_uids.remove(&uid);
    }

    /// Make the next fetch_from call fail outright
    pub fn fail_next_fetch(&self) {
        self.state.lock().unwrap().fail_next_fetch = true;
    }

    /// Whether a session currently holds the mailbox lock
    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().locked
    }
}

impl MailboxClient for MemoryMailbox {
    fn connect(&self, _connection: &MailboxConnection) -> Result<Box<dyn MailboxSession>> {
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
            holds_lock: false,
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<RemoteState>>,
    holds_lock: bool,
}

impl MailboxSession for MemorySession {
    fn lock(&mut self, _mailbox: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.locked {
            return Err(anyhow!("mailbox is already locked by another session"));
        }
        state.locked = true;
        self.holds_lock = true;
        Ok(())
    }

    fn unlock(&mut self) {
        if self.holds_lock {
            self.state.lock().unwrap().locked = false;
            self.holds_lock = false;
        }
    }

    fn status(&mut self) -> Result<MailboxStatus> {
        let state = self.state.lock().unwrap();
        Ok(MailboxStatus {
            uid_validity: state.uid_validity,
        })
    }

    fn fetch_from(&mut self, start_uid: u32) -> Result<MessageStream<'_>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_fetch {
            state.fail_next_fetch = false;
            return Err(anyhow!("fetch failed"));
        }

        // Snapshot in delivery order; the engine must handle unsorted UIDs
        let poisoned = state.poisoned_uids.clone();
        let items: Vec<RawMessage> = state
            .messages
            .iter()
            .filter(|m| m.uid >= start_uid)
            .cloned()
            .collect();

        Ok(Box::new(items.into_iter().map(move |message| {
            if poisoned.contains(&message.uid) {
                Err(FetchItemError {
                    uid: message.uid,
                    detail: "simulated fetch failure".to_string(),
                })
            } else {
                Ok(message)
            }
        })))
    }

    fn logout(&mut self) -> Result<()> {
        // Dropping a session that still holds the lock would wedge the
        // mailbox; release defensively.
        self.unlock();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::RemoteFlags;
    use chrono::Utc;

    fn connection() -> MailboxConnection {
        MailboxConnection::new("conn", "imap.example.com", "user", "secret")
    }

    fn raw(uid: u32) -> RawMessage {
        RawMessage {
            uid,
            source: Some(format!("Subject: m{}\r\n\r\nbody", uid).into_bytes()),
            internal_date: Some(Utc::now()),
            flags: RemoteFlags::default(),
        }
    }

    #[test]
    fn test_fetch_filters_by_start_uid() {
        let mailbox = MemoryMailbox::new(1);
        mailbox.push(raw(5));
        mailbox.push(raw(2));
        mailbox.push(raw(9));

        let mut session = mailbox.connect(&connection()).unwrap();
        session.lock("INBOX").unwrap();
        let uids: Vec<u32> = session
            .fetch_from(3)
            .unwrap()
            .map(|item| item.unwrap().uid)
            .collect();
        session.unlock();

        // Delivery order preserved, low uid filtered out
        assert_eq!(uids, vec![5, 9]);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let mailbox = MemoryMailbox::new(1);

        let mut first = mailbox.connect(&connection()).unwrap();
        first.lock("INBOX").unwrap();
        assert!(mailbox.is_locked());

        let mut second = mailbox.connect(&connection()).unwrap();
        assert!(second.lock("INBOX").is_err());

        first.unlock();
        assert!(!mailbox.is_locked());
        second.lock("INBOX").unwrap();
        second.unlock();
    }

    #[test]
    fn test_poisoned_uid_yields_item_error() {
        let mailbox = MemoryMailbox::new(1);
        mailbox.push(raw(1));
        mailbox.push(raw(2));
        mailbox.poison_uid(2);

        let mut session = mailbox.connect(&connection()).unwrap();
        session.lock("INBOX").unwrap();
        let items: Vec<_> = session.fetch_from(1).unwrap().collect();
        session.unlock();

        assert!(items[0].is_ok());
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.uid, 2);
    }

    #[test]
    fn test_logout_releases_lock() {
        let mailbox = MemoryMailbox::new(1);
        let mut session = mailbox.connect(&connection()).unwrap();
        session.lock("INBOX").unwrap();
        session.logout().unwrap();
        assert!(!mailbox.is_locked());
    }
}
