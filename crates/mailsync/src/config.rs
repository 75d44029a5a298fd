//! Mailbox connection configuration
//!
//! Connections are owned by the surrounding system's registry; this module
//! only loads them, from (in order of priority):
//! 1. JSON file (~/.config/mailsync/connections.json)
//! 2. Runtime environment variables (single-connection fallback)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Connections filename in the mailsync config directory
const CONNECTIONS_FILE: &str = "connections.json";

fn default_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

/// One remote mailbox endpoint plus credentials
///
/// Read-only to the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConnection {
    /// Stable identifier; deterministic message ids are derived from it
    pub connection_id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// The single monitored mailbox
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

/// Connections file format
#[derive(Deserialize)]
struct ConnectionsFile {
    connections: Vec<MailboxConnection>,
}

impl MailboxConnection {
    /// Create a connection with the default port and mailbox
    pub fn new(
        connection_id: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            host: host.into(),
            port: default_port(),
            username: username.into(),
            password: password.into(),
            mailbox: default_mailbox(),
        }
    }

    /// Load all configured connections using the following priority:
    /// 1. JSON file (~/.config/mailsync/connections.json)
    /// 2. Runtime environment variables
    pub fn load_all() -> Result<Vec<Self>> {
        if config::config_exists(CONNECTIONS_FILE) {
            let file: ConnectionsFile = config::load_json(CONNECTIONS_FILE)?;
            return Ok(file.connections);
        }

        Ok(vec![Self::from_env()?])
    }

    /// Load all connections from a specific JSON file
    pub fn load_from_file(path: &Path) -> Result<Vec<Self>> {
        let file: ConnectionsFile = config::load_json_file(path)?;
        Ok(file.connections)
    }

    /// Parse connections from a JSON string
    pub fn from_json(json: &str) -> Result<Vec<Self>> {
        let file: ConnectionsFile =
            serde_json::from_str(json).context("Failed to parse connections JSON")?;
        Ok(file.connections)
    }

    /// Load a single connection from environment variables
    pub fn from_env() -> Result<Self> {
        let host =
            std::env::var("MAILSYNC_HOST").context("MAILSYNC_HOST environment variable not set")?;
        let username = std::env::var("MAILSYNC_USERNAME")
            .context("MAILSYNC_USERNAME environment variable not set")?;
        let password = std::env::var("MAILSYNC_PASSWORD")
            .context("MAILSYNC_PASSWORD environment variable not set")?;
        let connection_id = std::env::var("MAILSYNC_CONNECTION_ID")
            .unwrap_or_else(|_| format!("{}@{}", username, host));

        let mut connection = Self::new(connection_id, host, username, password);
        if let Ok(port) = std::env::var("MAILSYNC_PORT") {
            connection.port = port.parse().context("MAILSYNC_PORT is not a valid port")?;
        }
        if let Ok(mailbox) = std::env::var("MAILSYNC_MAILBOX") {
            connection.mailbox = mailbox;
        }
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connections() {
        let json = r#"{
            "connections": [
                {
                    "connection_id": "work",
                    "host": "imap.example.com",
                    "username": "user@example.com",
                    "password": "hunter2"
                },
                {
                    "connection_id": "personal",
                    "host": "mail.example.org",
                    "port": 1993,
                    "username": "me",
                    "password": "secret",
                    "mailbox": "Archive"
                }
            ]
        }"#;

        let connections = MailboxConnection::from_json(json).unwrap();
        assert_eq!(connections.len(), 2);
        assert_eq!(connections[0].connection_id, "work");
        assert_eq!(connections[0].port, 993);
        assert_eq!(connections[0].mailbox, "INBOX");
        assert_eq!(connections[1].port, 1993);
        assert_eq!(connections[1].mailbox, "Archive");
    }

    #[test]
    fn test_invalid_json() {
        let json = r#"{ "other": [] }"#;
        assert!(MailboxConnection::from_json(json).is_err());
    }
}
