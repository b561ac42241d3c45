//! Chat transport capability
//!
//! The poll loop only talks to the chat service through [`ChatClient`], which keeps
//! the Instagram adapter swappable and lets tests substitute mocks.

/// Instagram Direct adapter
pub mod instagram;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by chat transports
#[derive(Debug, Error)]
pub enum ChatError {
    /// The service answered with a 5xx status; worth waiting and retrying
    #[error("Chat server error: {status}")]
    Server {
        /// HTTP status code
        status: u16,
    },
    /// Connection, DNS or timeout failure
    #[error("Chat network error: {0}")]
    Network(String),
    /// Session rejected or login failed
    #[error("Chat authentication failed: {0}")]
    Auth(String),
    /// Any other rejected request or undecodable response
    #[error("Chat API error: {0}")]
    Api(String),
}

impl ChatError {
    /// Whether the failure is a transient server-side error
    #[must_use]
    pub const fn is_server(&self) -> bool {
        matches!(self, Self::Server { .. })
    }
}

/// Kind of a chat item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Plain text
    Text,
    /// A shared music attachment whose link is not available as text
    MusicAttachment,
    /// Anything else (media, reactions, links previews, ...)
    Other,
}

/// A message fetched from the watched thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Opaque, ordered item identifier
    pub id: String,
    /// Sender's user id
    pub sender_id: String,
    /// Sender's username, when the transport knows it
    pub sender_display_name: Option<String>,
    /// Text body (empty for non-text items)
    pub body: String,
    /// Item kind
    pub kind: MessageKind,
}

impl Message {
    /// Name used in replies and as the cooldown key; falls back to the user id
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.sender_display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.sender_id)
    }
}

/// Interface for chat transports
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Fetch the single most recent item of a thread
    async fn fetch_latest(&self, thread_id: &str) -> Result<Option<Message>, ChatError>;
    /// Send a text message to a thread
    async fn send(&self, thread_id: &str, text: &str) -> Result<(), ChatError>;
    /// React to a message with a like
    async fn like(&self, thread_id: &str, message_id: &str) -> Result<(), ChatError>;
    /// Map of user id to username for every member of a thread
    async fn list_thread_members(
        &self,
        thread_id: &str,
    ) -> Result<HashMap<String, String>, ChatError>;
    /// Drop the current session and log in again
    async fn reestablish_session(&self) -> Result<(), ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(name: Option<&str>) -> Message {
        Message {
            id: "1".to_string(),
            sender_id: "42".to_string(),
            sender_display_name: name.map(str::to_string),
            body: String::new(),
            kind: MessageKind::Text,
        }
    }

    #[test]
    fn test_display_name_falls_back_to_id() {
        assert_eq!(message(Some("alice")).display_name(), "alice");
        assert_eq!(message(None).display_name(), "42");
        assert_eq!(message(Some("")).display_name(), "42");
    }

    #[test]
    fn test_is_server() {
        assert!(ChatError::Server { status: 502 }.is_server());
        assert!(!ChatError::Network("reset".to_string()).is_server());
    }
}
