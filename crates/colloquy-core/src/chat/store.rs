//! Session store: the single writer of durable chat state.
//!
//! Every mutation of a session runs load → modify → save while holding that
//! session's async mutex, and the save is a version compare-and-swap in the
//! repository. Different sessions never contend.

use std::sync::Arc;

use colloquy_types::chat::{ChatMessage, ChatSession};
use colloquy_types::error::ChatError;
use colloquy_types::moderation::ContentFlags;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::repository::ChatRepository;
use super::versions;

/// Owner-checked, serialized access to chat sessions.
pub struct SessionStore<R: ChatRepository> {
    repo: R,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<R: ChatRepository> SessionStore<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            locks: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    async fn lock(&self, session_id: &Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard guard is released before awaiting.
        let lock = self.locks.entry(*session_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Load a session without an ownership check.
    pub async fn session(&self, session_id: &Uuid) -> Result<ChatSession, ChatError> {
        self.repo
            .get_session(session_id)
            .await?
            .ok_or(ChatError::NotFound("session"))
    }

    fn check_owner(session: &ChatSession, owner_id: &str) -> Result<(), ChatError> {
        if session.owner_id != owner_id {
            tracing::warn!(
                session_id = %session.id,
                "session accessed by non-owner"
            );
            return Err(ChatError::Forbidden);
        }
        Ok(())
    }

    async fn commit(&self, mut session: ChatSession) -> Result<ChatSession, ChatError> {
        let expected = session.version;
        session.version = expected + 1;
        session.touch();
        self.repo.save_session(&session, expected).await?;
        Ok(session)
    }

    /// Serialized read-modify-write of one session.
    async fn mutate<F>(
        &self,
        session_id: &Uuid,
        owner_id: Option<&str>,
        f: F,
    ) -> Result<ChatSession, ChatError>
    where
        F: FnOnce(&mut ChatSession) -> Result<(), ChatError> + Send,
    {
        let _guard = self.lock(session_id).await;
        let mut session = self.session(session_id).await?;
        if let Some(owner_id) = owner_id {
            Self::check_owner(&session, owner_id)?;
        }
        f(&mut session)?;
        self.commit(session).await
    }

    pub async fn create_session(
        &self,
        owner_id: &str,
        title: &str,
        model: &str,
    ) -> Result<ChatSession, ChatError> {
        let session = ChatSession::new(owner_id, title, model);
        self.repo.insert_session(&session).await?;
        tracing::info!(session_id = %session.id, model, "created chat session");
        Ok(session)
    }

    /// The owner's sessions, most recently updated first.
    pub async fn sessions_for_owner(&self, owner_id: &str) -> Result<Vec<ChatSession>, ChatError> {
        Ok(self.repo.list_sessions(owner_id).await?)
    }

    pub async fn get_session(
        &self,
        session_id: &Uuid,
        owner_id: &str,
    ) -> Result<ChatSession, ChatError> {
        let session = self.session(session_id).await?;
        Self::check_owner(&session, owner_id)?;
        Ok(session)
    }

    /// Append `message` at the end of the session.
    pub async fn append_message(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        message: ChatMessage,
    ) -> Result<ChatSession, ChatError> {
        self.append_messages(session_id, owner_id, vec![message]).await
    }

    /// Append several messages in one write, keeping their order.
    pub async fn append_messages(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatSession, ChatError> {
        self.mutate(session_id, Some(owner_id), |session| {
            session.messages.extend(messages);
            Ok(())
        })
        .await
    }

    /// Replace one message with `f` applied to its stored state, in one
    /// atomic write under the session lock. Stream completion persists here.
    pub async fn replace_message<F>(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        f: F,
    ) -> Result<ChatSession, ChatError>
    where
        F: FnOnce(&mut ChatMessage) -> Result<(), ChatError> + Send,
    {
        self.mutate(session_id, None, |session| {
            let message = session
                .message_mut(message_id)
                .ok_or(ChatError::NotFound("message"))?;
            f(message)
        })
        .await
    }

    /// Owner-checked variant of [`Self::replace_message`].
    pub async fn update_owned_message<F>(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        message_id: &Uuid,
        f: F,
    ) -> Result<ChatSession, ChatError>
    where
        F: FnOnce(&mut ChatMessage) -> Result<(), ChatError> + Send,
    {
        self.mutate(session_id, Some(owner_id), |session| {
            let message = session
                .message_mut(message_id)
                .ok_or(ChatError::NotFound("message"))?;
            f(message)
        })
        .await
    }

    pub async fn rename_session(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        title: &str,
    ) -> Result<ChatSession, ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::InvalidRequest("title must not be empty".to_string()));
        }
        self.mutate(session_id, Some(owner_id), |session| {
            session.title = title.to_string();
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, session_id: &Uuid, owner_id: &str) -> Result<(), ChatError> {
        {
            let _guard = self.lock(session_id).await;
            let session = self.session(session_id).await?;
            Self::check_owner(&session, owner_id)?;
            self.repo.delete_session(session_id).await?;
        }
        self.locks.remove(session_id);
        tracing::info!(session_id = %session_id, "deleted chat session");
        Ok(())
    }

    /// Deep copy of a session under fresh session and message ids.
    ///
    /// Slots that were still streaming in the source are copied as
    /// interrupted: nothing will ever finish them in the copy.
    pub async fn duplicate_session(
        &self,
        session_id: &Uuid,
        owner_id: &str,
    ) -> Result<ChatSession, ChatError> {
        let source = self.get_session(session_id, owner_id).await?;

        let mut copy = ChatSession::new(owner_id, source.title.clone(), source.model.clone());
        copy.messages = source
            .messages
            .iter()
            .map(|m| {
                let mut m = m.clone();
                m.id = Uuid::now_v7();
                versions::settle_interrupted(&mut m);
                m
            })
            .collect();

        self.repo.insert_session(&copy).await?;
        tracing::info!(
            source_id = %session_id,
            session_id = %copy.id,
            messages = copy.messages.len(),
            "duplicated chat session"
        );
        Ok(copy)
    }

    /// Attach moderation results to a message after the fact.
    pub async fn attach_content_flags(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        flags: ContentFlags,
    ) -> Result<ChatSession, ChatError> {
        self.replace_message(session_id, message_id, |message| {
            message.content_flags = Some(flags);
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::memory::MemoryChatRepository;
    use colloquy_types::chat::MessageStatus;
    use colloquy_types::stream::StreamOutcome;

    fn store() -> SessionStore<MemoryChatRepository> {
        SessionStore::new(MemoryChatRepository::new())
    }

    #[tokio::test]
    async fn test_create_and_get_checks_owner() {
        let store = store();
        let session = store.create_session("alice", "New Chat", "m").await.unwrap();

        let found = store.get_session(&session.id, "alice").await.unwrap();
        assert_eq!(found.id, session.id);

        let err = store.get_session(&session.id, "bob").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));

        let err = store.get_session(&Uuid::now_v7(), "alice").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound("session")));
    }

    #[tokio::test]
    async fn test_append_keeps_order_and_bumps_updated_at() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();

        let first = store
            .append_message(&session.id, "alice", ChatMessage::user("one"))
            .await
            .unwrap();
        let second = store
            .append_message(&session.id, "alice", ChatMessage::user("two"))
            .await
            .unwrap();

        let contents: Vec<_> = second.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two"]);
        assert!(second.updated_at >= first.updated_at);
        assert!(first.updated_at >= session.updated_at);
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn test_append_by_non_owner_is_rejected_without_change() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();

        let err = store
            .append_message(&session.id, "mallory", ChatMessage::user("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden));
        assert!(store.session(&session.id).await.unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_lose_writes() {
        let store = Arc::new(store());
        let session = store.create_session("alice", "t", "m").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let id = session.id;
            handles.push(tokio::spawn(async move {
                store
                    .append_message(&id, "alice", ChatMessage::user(format!("m{i}")))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = store.session(&session.id).await.unwrap();
        assert_eq!(stored.messages.len(), 16);
        assert_eq!(stored.version, 16);
    }

    #[tokio::test]
    async fn test_replace_message_missing_message() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();
        let err = store
            .replace_message(&session.id, &Uuid::now_v7(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound("message")));
    }

    #[tokio::test]
    async fn test_replace_message() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();
        let msg = ChatMessage::assistant_placeholder("m");
        let msg_id = msg.id;
        store.append_message(&session.id, "alice", msg.clone()).await.unwrap();

        let saved = store
            .replace_message(&session.id, &msg_id, |m| {
                versions::finalize_initial(m, "done".to_string(), &StreamOutcome::Completed);
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(saved.messages[0].content, "done");
        assert_eq!(saved.messages[0].status, MessageStatus::Complete);
    }

    #[tokio::test]
    async fn test_rename_rejects_blank_title() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();
        assert!(matches!(
            store.rename_session(&session.id, "alice", "   ").await,
            Err(ChatError::InvalidRequest(_))
        ));
        let renamed = store
            .rename_session(&session.id, "alice", " Trip planning ")
            .await
            .unwrap();
        assert_eq!(renamed.title, "Trip planning");
    }

    #[tokio::test]
    async fn test_delete_session() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();
        assert!(matches!(
            store.delete_session(&session.id, "bob").await,
            Err(ChatError::Forbidden)
        ));
        store.delete_session(&session.id, "alice").await.unwrap();
        assert!(matches!(
            store.session(&session.id).await,
            Err(ChatError::NotFound("session"))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_copies_content_with_fresh_ids() {
        let store = store();
        let session = store.create_session("alice", "Trip", "m").await.unwrap();
        let mut answer = ChatMessage::assistant_placeholder("m");
        versions::finalize_initial(&mut answer, "A".to_string(), &StreamOutcome::Completed);
        let retry = Uuid::now_v7();
        versions::begin_retry(&mut answer, retry).unwrap();
        versions::finalize_variant(&mut answer, retry, "B".to_string(), &StreamOutcome::Completed)
            .unwrap();
        store
            .append_messages(&session.id, "alice", vec![ChatMessage::user("q"), answer])
            .await
            .unwrap();

        let source = store.session(&session.id).await.unwrap();
        let copy = store.duplicate_session(&session.id, "alice").await.unwrap();

        assert_ne!(copy.id, source.id);
        assert_eq!(copy.title, "Trip");
        assert_eq!(copy.messages.len(), 2);
        for (a, b) in source.messages.iter().zip(&copy.messages) {
            assert_ne!(a.id, b.id);
            assert_eq!(a.content, b.content);
            assert_eq!(a.response_history, b.response_history);
            assert_eq!(a.current_response_index, b.current_response_index);
        }
        assert_eq!(store.sessions_for_owner("alice").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_settles_streaming_slots() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();
        store
            .append_message(&session.id, "alice", ChatMessage::assistant_placeholder("m"))
            .await
            .unwrap();

        let copy = store.duplicate_session(&session.id, "alice").await.unwrap();
        assert_eq!(copy.messages[0].status, MessageStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_attach_content_flags() {
        let store = store();
        let session = store.create_session("alice", "t", "m").await.unwrap();
        let user = ChatMessage::user("hello");
        let user_id = user.id;
        store.append_message(&session.id, "alice", user).await.unwrap();

        let saved = store
            .attach_content_flags(&session.id, &user_id, ContentFlags::clean())
            .await
            .unwrap();
        let flags = saved.messages[0].content_flags.as_ref().unwrap();
        assert!(!flags.flagged);
        assert!(flags.checked_at.is_some());
    }
}
