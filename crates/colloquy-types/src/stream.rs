//! Streaming update types handed to subscribers of an in-flight response.
//!
//! Every update carries the full accumulated text rather than a delta, so a
//! subscriber that misses intermediate updates still renders correctly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the single slot a stream writes into.
///
/// For an initial send `variant_id` is `None`; the stream writes the
/// message content directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamTarget {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub variant_id: Option<Uuid>,
}

impl StreamTarget {
    /// Key under which the live stream is tracked.
    pub fn stream_id(&self) -> Uuid {
        self.variant_id.unwrap_or(self.message_id)
    }
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StreamOutcome {
    Completed,
    Failed { error: String },
    Cancelled,
}

/// Latest published state of a stream: accumulated text plus phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSnapshot {
    pub content: String,
    /// `None` while the stream is still running.
    pub outcome: Option<StreamOutcome>,
}

impl StreamSnapshot {
    pub fn streaming(content: String) -> Self {
        Self {
            content,
            outcome: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Item of a response stream delivered to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamUpdate {
    /// Accumulated content so far.
    Snapshot { content: String },
    /// Final content; the stream is over.
    Completed { content: String },
    /// The source failed; `content` is what arrived before the failure.
    Failed { content: String, error: String },
    /// Interest was withdrawn; `content` is possibly truncated.
    Cancelled { content: String },
}

impl StreamUpdate {
    /// SSE event name for this update.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamUpdate::Snapshot { .. } => "snapshot",
            StreamUpdate::Completed { .. } => "completed",
            StreamUpdate::Failed { .. } => "failed",
            StreamUpdate::Cancelled { .. } => "cancelled",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            StreamUpdate::Snapshot { content }
            | StreamUpdate::Completed { content }
            | StreamUpdate::Failed { content, .. }
            | StreamUpdate::Cancelled { content } => content,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamUpdate::Snapshot { .. })
    }

    /// Terminal update for a finished snapshot, or `None` while streaming.
    pub fn terminal(snapshot: &StreamSnapshot) -> Option<Self> {
        let content = snapshot.content.clone();
        snapshot.outcome.as_ref().map(|outcome| match outcome {
            StreamOutcome::Completed => StreamUpdate::Completed { content },
            StreamOutcome::Failed { error } => StreamUpdate::Failed {
                content,
                error: error.clone(),
            },
            StreamOutcome::Cancelled => StreamUpdate::Cancelled { content },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_prefers_variant() {
        let message_id = Uuid::now_v7();
        let variant_id = Uuid::now_v7();
        let initial = StreamTarget {
            session_id: Uuid::now_v7(),
            message_id,
            variant_id: None,
        };
        let retry = StreamTarget {
            variant_id: Some(variant_id),
            ..initial
        };
        assert_eq!(initial.stream_id(), message_id);
        assert_eq!(retry.stream_id(), variant_id);
    }

    #[test]
    fn test_terminal_update_from_snapshot() {
        let running = StreamSnapshot::streaming("Hi".to_string());
        assert!(StreamUpdate::terminal(&running).is_none());

        let failed = StreamSnapshot {
            content: "Partial an".to_string(),
            outcome: Some(StreamOutcome::Failed {
                error: "reset".to_string(),
            }),
        };
        let update = StreamUpdate::terminal(&failed).unwrap();
        assert_eq!(update.kind(), "failed");
        assert_eq!(update.content(), "Partial an");
        assert!(update.is_terminal());
    }

    #[test]
    fn test_update_serde_tag() {
        let update = StreamUpdate::Snapshot {
            content: "Hi".to_string(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"type":"snapshot","content":"Hi"}"#);
    }
}
