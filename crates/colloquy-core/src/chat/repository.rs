//! ChatRepository trait definition.
//!
//! Persists whole session aggregates (session row + ordered messages with
//! their response histories). Writes are compare-and-swap on
//! `ChatSession::version` so an aggregate is never partially overwritten by a
//! stale copy.

use colloquy_types::chat::ChatSession;
use colloquy_types::error::RepositoryError;
use uuid::Uuid;

/// Repository trait for chat session persistence.
///
/// Implementations live in colloquy-infra (e.g., `SqliteChatRepository`) and
/// in [`crate::chat::memory`]. Uses native async fn in traits (RPITIT,
/// Rust 2024 edition).
pub trait ChatRepository: Send + Sync {
    /// Insert a brand-new session (with whatever messages it already holds).
    fn insert_session(
        &self,
        session: &ChatSession,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a session with all of its messages.
    fn get_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ChatSession>, RepositoryError>> + Send;

    /// List an owner's sessions, ordered by `updated_at` DESC.
    fn list_sessions(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, RepositoryError>> + Send;

    /// Atomically replace a stored session aggregate.
    ///
    /// Succeeds only if the stored version equals `expected_version`; the
    /// caller is responsible for having bumped `session.version`. Returns
    /// `Conflict` on a version mismatch and `NotFound` if the session is gone.
    fn save_session(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a session and all of its messages.
    fn delete_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Count total sessions across all owners.
    fn count_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}

impl<T: ChatRepository> ChatRepository for std::sync::Arc<T> {
    fn insert_session(
        &self,
        session: &ChatSession,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).insert_session(session)
    }

    fn get_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ChatSession>, RepositoryError>> + Send {
        (**self).get_session(session_id)
    }

    fn list_sessions(
        &self,
        owner_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ChatSession>, RepositoryError>> + Send {
        (**self).list_sessions(owner_id)
    }

    fn save_session(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).save_session(session, expected_version)
    }

    fn delete_session(
        &self,
        session_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send {
        (**self).delete_session(session_id)
    }

    fn count_sessions(
        &self,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send {
        (**self).count_sessions()
    }
}
