//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both CLI and REST API.
//! `ChatService` is generic over its repository; AppState pins it to SQLite.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use colloquy_core::chat::service::ChatService;
use colloquy_core::llm::box_provider::BoxInferenceSource;
use colloquy_infra::config::{load_global_config, resolve_api_key, resolve_data_dir};
use colloquy_infra::llm::create_source;
use colloquy_infra::quota::QuotaGate;
use colloquy_infra::sqlite::chat::SqliteChatRepository;
use colloquy_infra::sqlite::pool::{DatabasePool, database_url};
use colloquy_types::config::GlobalConfig;

pub type ConcreteChatService = ChatService<SqliteChatRepository>;

/// Shared application state holding all services.
///
/// Used by both CLI commands and REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Initialize the application state: load config, connect to DB, wire services.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_global_config(&data_dir).await;
        let source = create_source(&config.provider, resolve_api_key(&config.provider))?;
        Self::build(&data_dir, config, source).await
    }

    /// Wire the services over `{data_dir}/colloquy.db` with a given source.
    pub async fn build(
        data_dir: &Path,
        config: GlobalConfig,
        source: BoxInferenceSource,
    ) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(&database_url(data_dir)).await?;
        let gate = QuotaGate::new(config.max_generations_per_owner);

        let chat_service = ChatService::new(SqliteChatRepository::new(db_pool.clone()), source, config)
            .with_gate(Arc::new(gate));

        tracing::debug!(data_dir = %data_dir.display(), "application state ready");
        Ok(Self {
            chat_service: Arc::new(chat_service),
            data_dir: data_dir.to_path_buf(),
            db_pool,
        })
    }
}
