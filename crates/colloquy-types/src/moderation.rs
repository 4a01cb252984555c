//! Content flag record attached to messages by the moderation collaborator.
//!
//! The record has a fixed shape: one optional boolean per category the
//! collaborator may report, plus an overall `flagged` verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moderation verdict for a single message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFlags {
    /// Overall verdict; true when any category tripped.
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harassment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_harm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sexual: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sexual_minors: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub violence: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illicit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ContentFlags {
    /// A verdict with no categories tripped.
    pub fn clean() -> Self {
        Self {
            checked_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Names of the categories reported as true.
    pub fn tripped_categories(&self) -> Vec<&'static str> {
        [
            ("harassment", self.harassment),
            ("hate", self.hate),
            ("self_harm", self.self_harm),
            ("sexual", self.sexual),
            ("sexual_minors", self.sexual_minors),
            ("violence", self.violence),
            ("illicit", self.illicit),
        ]
        .into_iter()
        .filter_map(|(name, value)| (value == Some(true)).then_some(name))
        .collect()
    }
}

/// Errors from the moderation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("moderation provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid moderation response: {0}")]
    InvalidResponse(String),
}
