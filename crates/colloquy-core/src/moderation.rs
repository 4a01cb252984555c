//! Content moderation collaborator.
//!
//! Classification runs off the send path; its result is attached to the user
//! message afterwards and never blocks or fails a send.

use colloquy_types::moderation::{ContentFlags, ModerationError};
use futures_util::future::BoxFuture;

/// Classifies user text into content flags.
pub trait ContentModerator: Send + Sync {
    fn moderate<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<ContentFlags, ModerationError>>;
}
