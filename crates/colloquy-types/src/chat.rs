//! Chat session, message, and response variant types for Colloquy.
//!
//! A session exclusively owns its messages, and an assistant message
//! exclusively owns its list of response variants (original + retries).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::moderation::ContentFlags;

// Re-export MessageRole from llm module (it's used in both chat and llm contexts).
pub use crate::llm::MessageRole;

/// Title given to sessions before a suggested title replaces it.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// A chat session between one owner and the assistant.
///
/// `messages` is kept in append order. `version` increases by one on every
/// durable write and backs the repository compare-and-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    /// Create an empty session owned by `owner_id`.
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            owner_id: owner_id.into(),
            title: title.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
            version: 0,
            messages: Vec::new(),
        }
    }

    pub fn message(&self, message_id: &Uuid) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == *message_id)
    }

    pub fn message_mut(&mut self, message_id: &Uuid) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == *message_id)
    }

    /// Position of a message within `messages`.
    pub fn message_index(&self, message_id: &Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == *message_id)
    }

    /// Advance `updated_at` without ever moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }
}

/// Lifecycle status of a single message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Complete,
    /// The initial assistant response is still streaming.
    Streaming,
    /// At least one retry for this message is still streaming.
    Regenerating,
    /// The last stream for this message failed; partial content is kept.
    Errored,
    /// The initial stream was cancelled; content may be truncated.
    Cancelled,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageStatus::Complete => write!(f, "complete"),
            MessageStatus::Streaming => write!(f, "streaming"),
            MessageStatus::Regenerating => write!(f, "regenerating"),
            MessageStatus::Errored => write!(f, "errored"),
            MessageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "complete" => Ok(MessageStatus::Complete),
            "streaming" => Ok(MessageStatus::Streaming),
            "regenerating" => Ok(MessageStatus::Regenerating),
            "errored" => Ok(MessageStatus::Errored),
            "cancelled" => Ok(MessageStatus::Cancelled),
            other => Err(format!("invalid message status: '{other}'")),
        }
    }
}

/// A single turn within a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    /// Currently visible text. Mirrors the current variant once history exists.
    pub content: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set post-hoc by the moderation collaborator (user messages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_flags: Option<ContentFlags>,
    /// Original + retried responses (assistant messages only).
    #[serde(default)]
    pub response_history: Vec<ResponseVariant>,
    #[serde(default)]
    pub current_response_index: usize,
    #[serde(default)]
    pub status: MessageStatus,
    /// Error indicator of the last failed stream for this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role: MessageRole::User,
            content: content.into(),
            model: None,
            created_at: Utc::now(),
            content_flags: None,
            response_history: Vec::new(),
            current_response_index: 0,
            status: MessageStatus::Complete,
            error: None,
        }
    }

    /// Empty assistant placeholder that a stream will fill in.
    pub fn assistant_placeholder(model: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role: MessageRole::Assistant,
            content: String::new(),
            model: Some(model.into()),
            created_at: Utc::now(),
            content_flags: None,
            response_history: Vec::new(),
            current_response_index: 0,
            status: MessageStatus::Streaming,
            error: None,
        }
    }

    /// Whether any stream (initial or retry) is still writing to this message.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self.status,
            MessageStatus::Streaming | MessageStatus::Regenerating
        )
    }
}

/// Whether a variant is the first generation or a regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Original,
    Retry,
}

/// Where a variant's stream stands. Content is immutable once not `Streaming`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantState {
    Streaming,
    #[default]
    Complete,
    Errored,
    Cancelled,
}

/// One produced candidate for an assistant message slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseVariant {
    pub id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub kind: VariantKind,
    #[serde(default)]
    pub state: VariantState,
}

impl ResponseVariant {
    /// A fresh, empty retry variant about to be streamed into.
    pub fn pending_retry(id: Uuid) -> Self {
        Self {
            id,
            content: String::new(),
            created_at: Utc::now(),
            kind: VariantKind::Retry,
            state: VariantState::Streaming,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state != VariantState::Streaming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_status_roundtrip() {
        for status in [
            MessageStatus::Complete,
            MessageStatus::Streaming,
            MessageStatus::Regenerating,
            MessageStatus::Errored,
            MessageStatus::Cancelled,
        ] {
            let s = status.to_string();
            let parsed: MessageStatus = s.parse().unwrap();
            assert_eq!(status, parsed);
        }
    }

    #[test]
    fn test_message_status_default() {
        assert_eq!(MessageStatus::default(), MessageStatus::Complete);
    }

    #[test]
    fn test_new_session_is_empty_and_owned() {
        let session = ChatSession::new("owner-1", DEFAULT_SESSION_TITLE, "gpt-4o-mini");
        assert_eq!(session.owner_id, "owner-1");
        assert_eq!(session.title, "New Chat");
        assert!(session.messages.is_empty());
        assert_eq!(session.created_at, session.updated_at);
        assert_eq!(session.version, 0);
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut session = ChatSession::new("o", "t", "m");
        let future = Utc::now() + chrono::Duration::hours(1);
        session.updated_at = future;
        session.touch();
        assert_eq!(session.updated_at, future);
    }

    #[test]
    fn test_assistant_placeholder_is_streaming() {
        let msg = ChatMessage::assistant_placeholder("gpt-4o-mini");
        assert_eq!(msg.role, MessageRole::Assistant);
        assert!(msg.content.is_empty());
        assert!(msg.response_history.is_empty());
        assert!(msg.is_in_flight());
    }

    #[test]
    fn test_message_lookup_by_id() {
        let mut session = ChatSession::new("o", "t", "m");
        let user = ChatMessage::user("hello");
        let user_id = user.id;
        session.messages.push(user);
        session.messages.push(ChatMessage::assistant_placeholder("m"));

        assert_eq!(session.message_index(&user_id), Some(0));
        assert_eq!(session.message(&user_id).unwrap().content, "hello");
        assert!(session.message(&Uuid::now_v7()).is_none());
    }

    #[test]
    fn test_variant_serde_defaults_state() {
        let json = format!(
            r#"{{"id":"{}","content":"A","created_at":"2024-01-01T00:00:00Z","kind":"original"}}"#,
            Uuid::now_v7()
        );
        let variant: ResponseVariant = serde_json::from_str(&json).unwrap();
        assert_eq!(variant.state, VariantState::Complete);
        assert!(variant.is_finalized());
    }

    #[test]
    fn test_chat_session_serialize() {
        let mut session = ChatSession::new("owner", "Test chat", "gpt-4o-mini");
        session.messages.push(ChatMessage::user("Hello"));
        let json = serde_json::to_string(&session).unwrap();
        assert!(json.contains("\"role\":\"user\""));
        assert!(json.contains("\"status\":\"complete\""));
        assert!(!json.contains("content_flags"));
    }
}
