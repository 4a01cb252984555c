//! In-memory chat repository.
//!
//! Fastest option but not persistent across restarts. Used for tests and
//! ephemeral deployments; honours the same version compare-and-swap as the
//! SQLite implementation.

use colloquy_types::chat::ChatSession;
use colloquy_types::error::RepositoryError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::repository::ChatRepository;

/// `DashMap`-backed implementation of [`ChatRepository`].
///
/// Sessions are cloned on read so no map guard outlives a call.
#[derive(Debug, Default)]
pub struct MemoryChatRepository {
    sessions: DashMap<Uuid, ChatSession>,
}

impl MemoryChatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChatRepository for MemoryChatRepository {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), RepositoryError> {
        match self.sessions.entry(session.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "session {} already exists",
                session.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<ChatSession>, RepositoryError> {
        Ok(self.sessions.get(session_id).map(|s| s.clone()))
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, RepositoryError> {
        let mut sessions: Vec<ChatSession> = self
            .sessions
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn save_session(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut stored = self
            .sessions
            .get_mut(&session.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "expected version {expected_version}, found {}",
                stored.version
            )));
        }
        *stored = session.clone();
        Ok(())
    }

    async fn delete_session(&self, session_id: &Uuid) -> Result<(), RepositoryError> {
        self.sessions
            .remove(session_id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn count_sessions(&self) -> Result<u64, RepositoryError> {
        Ok(self.sessions.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_types::chat::ChatMessage;

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = MemoryChatRepository::new();
        let session = ChatSession::new("owner", "New Chat", "model");
        repo.insert_session(&session).await.unwrap();

        let found = repo.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(found, session);
        assert!(repo.insert_session(&session).await.is_err());
    }

    #[tokio::test]
    async fn test_save_requires_matching_version() {
        let repo = MemoryChatRepository::new();
        let mut session = ChatSession::new("owner", "New Chat", "model");
        repo.insert_session(&session).await.unwrap();

        session.messages.push(ChatMessage::user("hi"));
        session.version = 1;
        repo.save_session(&session, 0).await.unwrap();

        // A stale writer still holding version 0 loses.
        let err = repo.save_session(&session, 0).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        let stored = repo.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_list_filters_owner_and_orders_by_update() {
        let repo = MemoryChatRepository::new();
        let older = ChatSession::new("alice", "a", "m");
        let mut newer = ChatSession::new("alice", "b", "m");
        newer.updated_at = older.updated_at + chrono::Duration::seconds(5);
        let other = ChatSession::new("bob", "c", "m");
        for s in [&older, &newer, &other] {
            repo.insert_session(s).await.unwrap();
        }

        let listed = repo.list_sessions("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
        assert_eq!(repo.count_sessions().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let repo = MemoryChatRepository::new();
        let err = repo.delete_session(&Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }
}
