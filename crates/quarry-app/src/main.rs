//! Quarry application binary - composition root.
//!
//! 1. Load configuration from TOML, then environment and CLI overrides
//! 2. Open the chat database (SQLite + migrations)
//! 3. Build the generation-service client, schema summarizer and data gateway
//! 4. Start the idle-session sweep and the axum API server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quarry_api::AppState;
use quarry_chat::{ChatEngine, ChatStore, LlmClient, OpenAiClient, SchemaSummarizer};
use quarry_core::config::QuarryConfig;
use quarry_gateway::{DataGateway, SqlConnector};
use quarry_storage::{ChatRepository, Database, SchemaCacheRepository};

use crate::cli::{expand_home, CliArgs};

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically drop idle chats from memory; saved ones reload on demand.
async fn session_sweep_loop(engine: Arc<ChatEngine>, max_idle: Duration) {
    tracing::info!(max_idle_secs = max_idle.as_secs(), "Session sweep started");
    let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = engine.evict_idle_sessions(max_idle) {
            tracing::warn!(error = %e, "Session sweep failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = QuarryConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    if let Some(dir) = args.resolve_data_dir() {
        config.general.data_dir = dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }
    config.general.port = args.resolve_port(config.general.port);

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting quarry v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), model = %config.llm.model, "Configuration loaded");
    if config.llm.api_key.is_empty() {
        tracing::warn!("No API key configured; set OPENAI_API_KEY or llm.api_key");
    }

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("quarry.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    // Engine.
    let llm: Arc<dyn LlmClient> = Arc::new(OpenAiClient::new(&config.llm)?);
    let summarizer = SchemaSummarizer::new(
        Arc::clone(&llm),
        Arc::new(SchemaCacheRepository::new(Arc::clone(&db))),
        config.llm.summarizer_model.clone(),
        config.llm.temperature,
    );
    let local_roots: Vec<PathBuf> = config
        .data_source
        .local_roots
        .iter()
        .map(|root| expand_home(root))
        .collect();
    if !local_roots.is_empty() {
        tracing::info!(roots = ?local_roots, "Local database files enabled (read-only)");
    }
    let connector = SqlConnector::from_config(&config.data_source)
        .with_local_access(local_roots, vec![data_dir.clone()]);
    let gateway = Arc::new(DataGateway::new(Arc::new(connector)));
    let store: Arc<dyn ChatStore> = Arc::new(ChatRepository::new(db));
    let engine = ChatEngine::new(&config, llm, gateway, summarizer, Some(store));

    // API server.
    let port = config.general.port;
    let session_idle = Duration::from_secs(config.chat.session_idle_secs);
    let state = AppState::new(config, engine);

    let sweep_engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        session_sweep_loop(sweep_engine, session_idle).await;
    });
    if let Err(e) = quarry_api::start_server(port, state).await {
        tracing::error!(port, error = %e, "API server stopped");
        tracing::error!("Try: QUARRY_PORT={} quarry", port.saturating_add(1));
        return Err(e.into());
    }

    Ok(())
}
