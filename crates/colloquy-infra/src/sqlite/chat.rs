//! SQLite chat repository implementation.
//!
//! Implements `ChatRepository` from `colloquy-core` using sqlx with split
//! read/write pools: raw queries, private Row structs, JSON columns for the
//! response history and content flags. A session aggregate is saved in one
//! transaction guarded by its `version` column.

use chrono::{DateTime, SecondsFormat, Utc};
use colloquy_core::chat::repository::ChatRepository;
use colloquy_types::chat::{ChatMessage, ChatSession, MessageRole, MessageStatus, ResponseVariant};
use colloquy_types::error::RepositoryError;
use colloquy_types::moderation::ContentFlags;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ChatRepository`.
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// Messages of one session, read on the caller's connection so they come
/// from the same snapshot as the session row.
async fn load_messages(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> Result<Vec<ChatMessage>, RepositoryError> {
    let rows = sqlx::query("SELECT * FROM chat_messages WHERE session_id = ? ORDER BY position ASC")
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(query_error)?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in &rows {
        let msg_row = ChatMessageRow::from_row(row).map_err(query_error)?;
        messages.push(msg_row.into_message()?);
    }
    Ok(messages)
}

async fn load_session(
    conn: &mut SqliteConnection,
    row: &SqliteRow,
) -> Result<ChatSession, RepositoryError> {
    let session_row = ChatSessionRow::from_row(row).map_err(query_error)?;
    let messages = load_messages(conn, &session_row.id).await?;
    session_row.into_session(messages)
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatSessionRow {
    id: String,
    owner_id: String,
    title: String,
    model: String,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl ChatSessionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            title: row.try_get("title")?,
            model: row.try_get("model")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }

    fn into_session(self, messages: Vec<ChatMessage>) -> Result<ChatSession, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid session id: {e}")))?;

        Ok(ChatSession {
            id,
            owner_id: self.owner_id,
            title: self.title,
            model: self.model,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            version: self.version as u64,
            messages,
        })
    }
}

struct ChatMessageRow {
    id: String,
    role: String,
    content: String,
    model: Option<String>,
    created_at: String,
    status: String,
    error: Option<String>,
    current_response_index: i64,
    response_history: String,
    content_flags: Option<String>,
}

impl ChatMessageRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            model: row.try_get("model")?,
            created_at: row.try_get("created_at")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            current_response_index: row.try_get("current_response_index")?,
            response_history: row.try_get("response_history")?,
            content_flags: row.try_get("content_flags")?,
        })
    }

    fn into_message(self) -> Result<ChatMessage, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid message id: {e}")))?;
        let role: MessageRole = self.role.parse().map_err(RepositoryError::Query)?;
        let status: MessageStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let response_history: Vec<ResponseVariant> = serde_json::from_str(&self.response_history)
            .map_err(|e| RepositoryError::Query(format!("invalid response_history: {e}")))?;
        let content_flags: Option<ContentFlags> = self
            .content_flags
            .as_deref()
            .map(|raw| serde_json::from_str::<ContentFlags>(raw))
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid content_flags: {e}")))?;

        Ok(ChatMessage {
            id,
            role,
            content: self.content,
            model: self.model,
            created_at: parse_datetime(&self.created_at)?,
            content_flags,
            response_history,
            current_response_index: self.current_response_index as usize,
            status,
            error: self.error,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn insert_error(e: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return RepositoryError::Conflict(db.message().to_string());
        }
    }
    query_error(e)
}

async fn insert_messages(
    tx: &mut Transaction<'_, Sqlite>,
    session_id: &str,
    messages: &[ChatMessage],
) -> Result<(), RepositoryError> {
    for (position, message) in messages.iter().enumerate() {
        let history = serde_json::to_string(&message.response_history)
            .map_err(|e| RepositoryError::Query(format!("encode response_history: {e}")))?;
        let flags = message
            .content_flags
            .as_ref()
            .map(|flags| serde_json::to_string(flags))
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("encode content_flags: {e}")))?;

        sqlx::query(
            r#"INSERT INTO chat_messages (id, session_id, position, role, content, model, created_at, status, error, current_response_index, response_history, content_flags)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(message.id.to_string())
        .bind(session_id)
        .bind(position as i64)
        .bind(message.role.to_string())
        .bind(&message.content)
        .bind(&message.model)
        .bind(format_datetime(&message.created_at))
        .bind(message.status.to_string())
        .bind(&message.error)
        .bind(message.current_response_index as i64)
        .bind(history)
        .bind(flags)
        .execute(&mut **tx)
        .await
        .map_err(insert_error)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    async fn insert_session(&self, session: &ChatSession) -> Result<(), RepositoryError> {
        let id = session.id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO chat_sessions (id, owner_id, title, model, created_at, updated_at, version)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&id)
        .bind(&session.owner_id)
        .bind(&session.title)
        .bind(&session.model)
        .bind(format_datetime(&session.created_at))
        .bind(format_datetime(&session.updated_at))
        .bind(session.version as i64)
        .execute(&mut *tx)
        .await
        .map_err(insert_error)?;

        insert_messages(&mut tx, &id, &session.messages).await?;
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_session(&self, session_id: &Uuid) -> Result<Option<ChatSession>, RepositoryError> {
        // One read transaction: the row and its messages share a WAL snapshot.
        let mut tx = self.pool.reader.begin().await.map_err(query_error)?;
        let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_error)?;

        let session = match row {
            Some(row) => Some(load_session(&mut tx, &row).await?),
            None => None,
        };
        tx.commit().await.map_err(query_error)?;
        Ok(session)
    }

    async fn list_sessions(&self, owner_id: &str) -> Result<Vec<ChatSession>, RepositoryError> {
        let mut tx = self.pool.reader.begin().await.map_err(query_error)?;
        let rows = sqlx::query(
            "SELECT * FROM chat_sessions WHERE owner_id = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(query_error)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            sessions.push(load_session(&mut tx, row).await?);
        }
        tx.commit().await.map_err(query_error)?;
        Ok(sessions)
    }

    async fn save_session(
        &self,
        session: &ChatSession,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let id = session.id.to_string();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        let result = sqlx::query(
            r#"UPDATE chat_sessions
               SET title = ?, model = ?, updated_at = ?, version = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(&session.title)
        .bind(&session.model)
        .bind(format_datetime(&session.updated_at))
        .bind(session.version as i64)
        .bind(&id)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            let stored: Option<i64> = sqlx::query_scalar("SELECT version FROM chat_sessions WHERE id = ?")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(query_error)?;
            return Err(match stored {
                None => RepositoryError::NotFound,
                Some(found) => RepositoryError::Conflict(format!(
                    "expected version {expected_version}, found {found}"
                )),
            });
        }

        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        insert_messages(&mut tx, &id, &session.messages).await?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn count_sessions(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM chat_sessions")
            .fetch_one(&self.pool.reader)
            .await
            .map_err(query_error)?;
        let count: i64 = row.try_get("cnt").map_err(query_error)?;
        Ok(count as u64)
    }
}
