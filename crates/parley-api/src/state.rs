//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by the REST API.
//! Services are generic over the repository trait, but AppState pins them
//! to the SQLite implementation.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use parley_core::chat::orchestrator::{CompletionOrchestrator, CompletionSettings};
use parley_core::chat::service::ChatService;
use parley_core::llm::box_provider::BoxLlmProvider;
use parley_infra::config::{database_url, resolve_api_key};
use parley_infra::llm::create_provider;
use parley_infra::sqlite::chat::SqliteChatRepository;
use parley_infra::sqlite::pool::DatabasePool;
use parley_types::config::GlobalConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteChatService = ChatService<SqliteChatRepository>;

pub type ConcreteOrchestrator = CompletionOrchestrator<SqliteChatRepository>;

/// Shared application state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub orchestrator: Arc<ConcreteOrchestrator>,
    pub config: Arc<GlobalConfig>,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Wire services around an open database and a ready provider.
    pub fn new(config: GlobalConfig, db_pool: DatabasePool, provider: BoxLlmProvider) -> Self {
        let chat_repo = Arc::new(SqliteChatRepository::new(db_pool.clone()));
        let settings = CompletionSettings::from_config(&config);

        Self {
            chat_service: Arc::new(ChatService::new(Arc::clone(&chat_repo))),
            orchestrator: Arc::new(CompletionOrchestrator::new(
                chat_repo,
                Arc::new(provider),
                settings,
            )),
            config: Arc::new(config),
            db_pool,
        }
    }

    /// Initialize the full server state: database, provider, services.
    pub async fn init(config: GlobalConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let db_pool = open_database(data_dir).await?;
        let provider = build_provider(&config)?;
        Ok(Self::new(config, db_pool, provider))
    }
}

/// Open (and migrate) the chat database in `data_dir`, creating the directory if needed.
pub async fn open_database(data_dir: &Path) -> anyhow::Result<DatabasePool> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

    DatabasePool::new(&database_url(data_dir))
        .await
        .context("Failed to open chat database")
}

/// Chat service over the SQLite store, for commands that never call the provider.
pub fn chat_service(db_pool: DatabasePool) -> ConcreteChatService {
    ChatService::new(Arc::new(SqliteChatRepository::new(db_pool)))
}

/// Build the configured completion provider, resolving its API key from the environment.
pub fn build_provider(config: &GlobalConfig) -> anyhow::Result<BoxLlmProvider> {
    let api_key = resolve_api_key(&config.provider);
    if api_key.is_none() {
        anyhow::bail!(
            "No API key for provider '{}': set the {} environment variable",
            config.provider.name,
            config.provider.api_key_env
        );
    }

    create_provider(&config.provider, api_key)
        .with_context(|| format!("Failed to configure provider '{}'", config.provider.name))
}
