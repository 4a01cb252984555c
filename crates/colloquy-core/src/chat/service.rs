//! Chat service orchestrating sends, retries, navigation and live reads.
//!
//! `ChatService` owns the per-session state machine: at most one new
//! response streams per session at a time, while any number of
//! regenerations may run. Every stream is ingested by its own task (see
//! [`crate::chat::ingestor`]) and reconciled into the session store when it
//! finishes. Reads overlay the latest live snapshot and never wait.

use std::sync::Arc;

use colloquy_types::chat::{ChatMessage, ChatSession, MessageRole, MessageStatus};
use colloquy_types::config::GlobalConfig;
use colloquy_types::error::ChatError;
use colloquy_types::llm::{CompletionRequest, Message};
use colloquy_types::moderation::ContentFlags;
use colloquy_types::stream::{StreamOutcome, StreamTarget};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::BoxFuture;
use serde::Serialize;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

use crate::chat::ingestor::{self, ResponseStream, StreamHandle};
use crate::chat::repository::ChatRepository;
use crate::chat::store::SessionStore;
use crate::chat::title::{LlmTitleSuggester, TitleSuggester};
use crate::chat::versions::{self, Direction, VariantPosition};
use crate::gate::{AllowAll, GenerationKind, UsageGate};
use crate::llm::box_provider::BoxInferenceSource;
use crate::moderation::ContentModerator;

/// What a session is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionActivity {
    Idle,
    Streaming { message_id: Uuid },
    Errored { message_id: Uuid },
}

/// Orchestrates chat sessions on top of a [`SessionStore`].
///
/// Generic over `ChatRepository` so colloquy-core never depends on
/// colloquy-infra.
pub struct ChatService<R: ChatRepository + 'static> {
    store: Arc<SessionStore<R>>,
    source: Arc<BoxInferenceSource>,
    gate: Arc<dyn UsageGate>,
    titler: Option<Arc<dyn TitleSuggester>>,
    moderator: Option<Arc<dyn ContentModerator>>,
    /// Running streams keyed by `StreamTarget::stream_id`.
    live: Arc<DashMap<Uuid, StreamHandle>>,
    /// Session id -> assistant message id of the send in progress.
    sending: Arc<DashMap<Uuid, Uuid>>,
    config: Arc<GlobalConfig>,
}

impl<R: ChatRepository + 'static> ChatService<R> {
    /// Create a service with an allow-all gate and, when enabled in config,
    /// an LLM title suggester on the same source.
    pub fn new(repo: R, source: BoxInferenceSource, config: GlobalConfig) -> Self {
        let source = Arc::new(source);
        let titler: Option<Arc<dyn TitleSuggester>> = config.title_suggestions.then(|| {
            Arc::new(LlmTitleSuggester::new(
                Arc::clone(&source),
                config.title_model.clone(),
            )) as Arc<dyn TitleSuggester>
        });
        Self {
            store: Arc::new(SessionStore::new(repo)),
            source,
            gate: Arc::new(AllowAll),
            titler,
            moderator: None,
            live: Arc::new(DashMap::new()),
            sending: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    pub fn with_gate(mut self, gate: Arc<dyn UsageGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_title_suggester(mut self, titler: Arc<dyn TitleSuggester>) -> Self {
        self.titler = Some(titler);
        self
    }

    pub fn without_title_suggester(mut self) -> Self {
        self.titler = None;
        self
    }

    pub fn with_moderator(mut self, moderator: Arc<dyn ContentModerator>) -> Self {
        self.moderator = Some(moderator);
        self
    }

    pub fn store(&self) -> &SessionStore<R> {
        &self.store
    }

    /// Number of streams currently running.
    pub fn live_streams(&self) -> usize {
        self.live.len()
    }

    // --- Session lifecycle ---

    pub async fn create_session(
        &self,
        owner_id: &str,
        model: Option<&str>,
    ) -> Result<ChatSession, ChatError> {
        let model = model.unwrap_or(&self.config.default_model);
        self.store
            .create_session(owner_id, &self.config.default_title, model)
            .await
    }

    /// The owner's sessions, most recently updated first.
    pub async fn list_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, ChatError> {
        self.store.sessions_for_owner(owner_id).await
    }

    /// Read a session with the latest partial content of its running streams.
    pub async fn get_session(
        &self,
        session_id: &Uuid,
        owner_id: &str,
    ) -> Result<ChatSession, ChatError> {
        // Grab receivers before reading the store: a stream that finishes in
        // between has already persisted, and overlay skips finished slots.
        let handles = self.handles_where(|t| t.session_id == *session_id);
        let mut session = self.store.get_session(session_id, owner_id).await?;
        for handle in handles {
            let snapshot = handle.snapshot();
            if let Some(message) = session.message_mut(&handle.target.message_id) {
                versions::overlay_partial(message, handle.target.variant_id, &snapshot.content);
            }
        }
        Ok(session)
    }

    pub async fn rename_session(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        title: &str,
    ) -> Result<ChatSession, ChatError> {
        self.store.rename_session(session_id, owner_id, title).await
    }

    /// Cancel the session's streams, then delete it.
    pub async fn delete_session(&self, session_id: &Uuid, owner_id: &str) -> Result<(), ChatError> {
        self.store.get_session(session_id, owner_id).await?;
        let cancelled = self.cancel_where(|t| t.session_id == *session_id);
        if cancelled > 0 {
            debug!(session_id = %session_id, cancelled, "cancelled streams before delete");
        }
        self.store.delete_session(session_id, owner_id).await?;
        self.sending.remove(session_id);
        Ok(())
    }

    pub async fn duplicate_session(
        &self,
        session_id: &Uuid,
        owner_id: &str,
    ) -> Result<ChatSession, ChatError> {
        self.store.duplicate_session(session_id, owner_id).await
    }

    /// What the session is doing: streaming a new response, errored on the
    /// last response, or idle.
    ///
    /// A last response still marked streaming with nothing streaming it was
    /// interrupted and counts as errored until the next retry settles it.
    pub async fn activity(
        &self,
        session_id: &Uuid,
        owner_id: &str,
    ) -> Result<SessionActivity, ChatError> {
        let session = self.store.get_session(session_id, owner_id).await?;
        if let Some(message_id) = self.sending.get(session_id).map(|m| *m) {
            return Ok(SessionActivity::Streaming { message_id });
        }
        Ok(match session.messages.last() {
            Some(last)
                if matches!(last.status, MessageStatus::Errored | MessageStatus::Streaming) =>
            {
                SessionActivity::Errored { message_id: last.id }
            }
            _ => SessionActivity::Idle,
        })
    }

    // --- Generation ---

    /// Append the user's text plus an empty assistant placeholder, and start
    /// streaming the answer into the placeholder.
    #[tracing::instrument(skip(self, owner_id, text), fields(session_id = %session_id))]
    pub async fn send_message(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        text: &str,
    ) -> Result<ResponseStream, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidRequest("message must not be empty".to_string()));
        }

        let session = self.store.get_session(session_id, owner_id).await?;
        if self.sending.contains_key(session_id) {
            return Err(ChatError::SessionBusy);
        }
        if !self.gate.allow(owner_id, GenerationKind::Send).await {
            info!(kind = GenerationKind::Send.as_str(), "generation denied by usage gate");
            return Err(ChatError::UsageDenied);
        }

        let user = ChatMessage::user(text);
        let placeholder = ChatMessage::assistant_placeholder(session.model.clone());
        let user_id = user.id;
        let message_id = placeholder.id;

        match self.sending.entry(*session_id) {
            Entry::Occupied(_) => {
                self.gate.refund(owner_id, GenerationKind::Send);
                return Err(ChatError::SessionBusy);
            }
            Entry::Vacant(slot) => {
                slot.insert(message_id);
            }
        }

        let session = match self
            .store
            .append_messages(session_id, owner_id, vec![user, placeholder])
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.sending.remove(session_id);
                self.gate.refund(owner_id, GenerationKind::Send);
                return Err(e);
            }
        };

        self.spawn_moderation(*session_id, user_id, text.to_string());

        let history_end = session.messages.len() - 1;
        let request = self.build_request(&session.model, &session.messages[..history_end], None);
        let target = StreamTarget {
            session_id: *session_id,
            message_id,
            variant_id: None,
        };

        let store = Arc::clone(&self.store);
        let live = Arc::clone(&self.live);
        let sending = Arc::clone(&self.sending);
        let titler = self.titler.clone();
        let default_title = self.config.default_title.clone();
        let sid = *session_id;

        let on_finish = move |content: String, outcome: StreamOutcome| -> BoxFuture<'static, StreamOutcome> {
            Box::pin(async move {
                let completed = outcome == StreamOutcome::Completed;
                let saved = persist_final(&store, &sid, &message_id, |message| {
                    versions::finalize_initial(message, content.clone(), &outcome);
                    Ok(())
                })
                .await;
                live.remove(&message_id);
                sending.remove_if(&sid, |_, m| *m == message_id);

                match saved {
                    Ok(session) => {
                        if let (true, Some(titler)) = (completed, titler) {
                            spawn_title_suggestion(store, titler, session, default_title);
                        }
                        outcome
                    }
                    Err(ChatError::NotFound(_)) => {
                        debug!(session_id = %sid, "session removed before stream finished");
                        outcome
                    }
                    Err(e) => {
                        warn!(session_id = %sid, error = %e, "failed to persist response");
                        unsaved(&e)
                    }
                }
            })
        };

        let stream = self.source.stream(request);
        Ok(self.start(target, stream, on_finish))
    }

    /// Regenerate an assistant message as a new variant.
    ///
    /// `prompt` replaces the text of the preceding user message in the
    /// request only; stored messages are never rewritten.
    #[tracing::instrument(skip(self, owner_id, prompt), fields(session_id = %session_id, message_id = %message_id))]
    pub async fn retry(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        message_id: &Uuid,
        prompt: Option<String>,
    ) -> Result<ResponseStream, ChatError> {
        let session = self.store.get_session(session_id, owner_id).await?;
        let index = session
            .message_index(message_id)
            .ok_or(ChatError::NotFound("message"))?;
        let message = &session.messages[index];
        if message.role != MessageRole::Assistant {
            return Err(ChatError::InvalidRequest(
                "only assistant messages can be regenerated".to_string(),
            ));
        }
        // A streaming slot nobody is streaming was left behind by a stream
        // that never finished; it is settled instead of blocking forever.
        let interrupted = message.status == MessageStatus::Streaming;
        if interrupted && self.is_sending(session_id, message_id) {
            return Err(ChatError::InvalidRequest(
                "the initial response is still streaming".to_string(),
            ));
        }
        if !self.gate.allow(owner_id, GenerationKind::Retry).await {
            info!(kind = GenerationKind::Retry.as_str(), "generation denied by usage gate");
            return Err(ChatError::UsageDenied);
        }

        let variant_id = Uuid::now_v7();
        let began = self
            .store
            .update_owned_message(session_id, owner_id, message_id, |message| {
                if interrupted && message.status == MessageStatus::Streaming {
                    versions::settle_interrupted(message);
                }
                versions::begin_retry(message, variant_id)
            })
            .await;
        let session = match began {
            Ok(session) => session,
            Err(e) => {
                self.gate.refund(owner_id, GenerationKind::Retry);
                return Err(e);
            }
        };
        if interrupted {
            info!("settled interrupted response before retry");
        }

        let request = self.build_request(
            &session.model,
            &session.messages[..index],
            prompt.as_deref(),
        );
        let target = StreamTarget {
            session_id: *session_id,
            message_id: *message_id,
            variant_id: Some(variant_id),
        };

        let store = Arc::clone(&self.store);
        let live = Arc::clone(&self.live);
        let sid = *session_id;
        let mid = *message_id;

        let on_finish = move |content: String, outcome: StreamOutcome| -> BoxFuture<'static, StreamOutcome> {
            Box::pin(async move {
                let saved = persist_final(&store, &sid, &mid, |message| {
                    versions::finalize_variant(message, variant_id, content.clone(), &outcome)
                })
                .await;
                live.remove(&variant_id);

                match saved {
                    Ok(_) => outcome,
                    Err(ChatError::NotFound(what)) => {
                        debug!(session_id = %sid, what, "retry target removed before stream finished");
                        outcome
                    }
                    Err(e) => {
                        warn!(session_id = %sid, error = %e, "failed to persist retry");
                        unsaved(&e)
                    }
                }
            })
        };

        let stream = self.source.stream(request);
        Ok(self.start(target, stream, on_finish))
    }

    /// Regenerate the response that follows `user_message_id`, using `text`
    /// as the prompt. The user message itself is left unchanged.
    pub async fn edit_and_resend(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        user_message_id: &Uuid,
        text: &str,
    ) -> Result<ResponseStream, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidRequest("message must not be empty".to_string()));
        }

        let session = self.store.get_session(session_id, owner_id).await?;
        let index = session
            .message_index(user_message_id)
            .ok_or(ChatError::NotFound("message"))?;
        if session.messages[index].role != MessageRole::User {
            return Err(ChatError::InvalidRequest(
                "only user messages can be edited".to_string(),
            ));
        }
        let response_id = session
            .messages
            .get(index + 1)
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| m.id)
            .ok_or_else(|| {
                ChatError::InvalidRequest("no response follows this message".to_string())
            })?;

        self.retry(session_id, owner_id, &response_id, Some(text.to_string()))
            .await
    }

    /// Cancel every running stream of one message. Returns how many were
    /// cancelled.
    pub async fn cancel(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        message_id: &Uuid,
    ) -> Result<usize, ChatError> {
        self.store.get_session(session_id, owner_id).await?;
        let cancelled =
            self.cancel_where(|t| t.session_id == *session_id && t.message_id == *message_id);
        info!(session_id = %session_id, message_id = %message_id, cancelled, "cancel requested");
        Ok(cancelled)
    }

    // --- Versions ---

    /// Step the visible variant of a message and return the message.
    pub async fn navigate(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        message_id: &Uuid,
        direction: Direction,
    ) -> Result<ChatMessage, ChatError> {
        let session = self.get_session(session_id, owner_id).await?;
        let mut message = session
            .message(message_id)
            .cloned()
            .ok_or(ChatError::NotFound("message"))?;
        if !versions::navigate(&mut message, direction) {
            return Ok(message);
        }

        let saved = self
            .store
            .update_owned_message(session_id, owner_id, message_id, |m| {
                versions::navigate(m, direction);
                Ok(())
            })
            .await?;
        saved
            .message(message_id)
            .cloned()
            .ok_or(ChatError::NotFound("message"))
    }

    pub async fn position(
        &self,
        session_id: &Uuid,
        owner_id: &str,
        message_id: &Uuid,
    ) -> Result<VariantPosition, ChatError> {
        let session = self.store.get_session(session_id, owner_id).await?;
        let message = session
            .message(message_id)
            .ok_or(ChatError::NotFound("message"))?;
        Ok(versions::position(message))
    }

    /// Attach moderation results to a message.
    pub async fn attach_content_flags(
        &self,
        session_id: &Uuid,
        message_id: &Uuid,
        flags: ContentFlags,
    ) -> Result<ChatSession, ChatError> {
        self.store
            .attach_content_flags(session_id, message_id, flags)
            .await
    }

    // --- Internals ---

    fn is_sending(&self, session_id: &Uuid, message_id: &Uuid) -> bool {
        self.sending
            .get(session_id)
            .is_some_and(|m| *m == *message_id)
    }

    fn start<F>(
        &self,
        target: StreamTarget,
        source: crate::llm::provider::EventStream,
        on_finish: F,
    ) -> ResponseStream
    where
        F: FnOnce(String, StreamOutcome) -> BoxFuture<'static, StreamOutcome> + Send + 'static,
    {
        let (handle, ingest) = ingestor::channel(target);
        self.live.insert(target.stream_id(), handle.clone());
        ingest.run(source, on_finish);
        handle.subscribe()
    }

    fn handles_where(&self, pred: impl Fn(&StreamTarget) -> bool) -> Vec<StreamHandle> {
        self.live
            .iter()
            .filter(|e| pred(&e.target))
            .map(|e| e.value().clone())
            .collect()
    }

    fn cancel_where(&self, pred: impl Fn(&StreamTarget) -> bool) -> usize {
        let handles = self.handles_where(pred);
        for handle in &handles {
            handle.cancel.cancel();
        }
        handles.len()
    }

    fn build_request(
        &self,
        model: &str,
        history: &[ChatMessage],
        prompt: Option<&str>,
    ) -> CompletionRequest {
        let mut messages: Vec<Message> = history
            .iter()
            .filter(|m| m.role == MessageRole::User || !m.content.is_empty())
            .map(|m| Message {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        if let Some(prompt) = prompt {
            match messages.iter_mut().rev().find(|m| m.role == MessageRole::User) {
                Some(last_user) => last_user.content = prompt.to_string(),
                None => messages.push(Message {
                    role: MessageRole::User,
                    content: prompt.to_string(),
                }),
            }
        }

        CompletionRequest {
            model: model.to_string(),
            messages,
            system: self.config.system_prompt.clone(),
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            stream: true,
        }
    }

    fn spawn_moderation(&self, session_id: Uuid, message_id: Uuid, text: String) {
        let Some(moderator) = self.moderator.clone() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let span = tracing::debug_span!("moderation", session_id = %session_id, message_id = %message_id);
        tokio::spawn(
            async move {
                match moderator.moderate(&text).await {
                    Ok(flags) => {
                        if flags.flagged {
                            info!(categories = ?flags.tripped_categories(), "message flagged");
                        }
                        if let Err(e) = store.attach_content_flags(&session_id, &message_id, flags).await {
                            debug!(error = %e, "could not attach content flags");
                        }
                    }
                    Err(e) => debug!(error = %e, "moderation failed"),
                }
            }
            .instrument(span),
        );
    }
}

/// Apply a stream's final result, re-reading once if another writer
/// committed in between.
async fn persist_final<R, F>(
    store: &SessionStore<R>,
    session_id: &Uuid,
    message_id: &Uuid,
    apply: F,
) -> Result<ChatSession, ChatError>
where
    R: ChatRepository,
    F: Fn(&mut ChatMessage) -> Result<(), ChatError> + Send + Sync,
{
    match store.replace_message(session_id, message_id, &apply).await {
        Err(ChatError::Conflict(reason)) => {
            debug!(session_id = %session_id, reason, "version conflict on final save, retrying");
            store.replace_message(session_id, message_id, &apply).await
        }
        other => other,
    }
}

/// Outcome published when the final result never reached the store.
fn unsaved(error: &ChatError) -> StreamOutcome {
    StreamOutcome::Failed {
        error: format!("response could not be saved: {error}"),
    }
}

/// Suggest a title once the first exchange has completed, if the session
/// still carries the placeholder title. Failures only log.
fn spawn_title_suggestion<R: ChatRepository + 'static>(
    store: Arc<SessionStore<R>>,
    titler: Arc<dyn TitleSuggester>,
    session: ChatSession,
    default_title: String,
) {
    if session.title != default_title || session.messages.len() < 2 {
        return;
    }
    let first_user = session
        .messages
        .iter()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.clone());
    let first_answer = session
        .messages
        .iter()
        .find(|m| m.role == MessageRole::Assistant && !m.content.is_empty())
        .map(|m| m.content.clone());
    let (Some(first_user), Some(first_answer)) = (first_user, first_answer) else {
        return;
    };

    tokio::spawn(async move {
        let title = match titler.suggest(&first_user, &first_answer, &session.model).await {
            Ok(title) => title,
            Err(e) => {
                debug!(session_id = %session.id, error = %e, "title suggestion failed");
                return;
            }
        };
        if title.is_empty() || title == session.title {
            return;
        }
        match store.rename_session(&session.id, &session.owner_id, &title).await {
            Ok(_) => info!(session_id = %session.id, title = %title, "session titled"),
            Err(e) => debug!(session_id = %session.id, error = %e, "could not apply suggested title"),
        }
    });
}
