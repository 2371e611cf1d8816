/// Server setup and initialization
///
/// Wires together all components: database, flow storage, registry, integrations, the
/// flow engine, and HTTP routes.

use crate::{
    api::{create_execution_routes, create_flow_routes, AppState},
    config::Config,
    db::Database,
    flow::{FlowRegistry, FlowStorage},
    integrations::{OpenAiCompatibleGenerator, SqliteDataStore},
    runtime::{ExecutionTracker, FlowEngine, NodeExecutor},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Connects the database, loads existing flows, and builds the engine with its
/// data store, HTTP client and optional text generation provider.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🗄️ Connecting to database: {}", config.database.url);
    let database = Database::connect(&config.database.url).await?;
    let pool = database.pool().clone();

    tracing::info!("📊 Initializing flow registry");
    let storage = FlowStorage::new(pool.clone());
    let registry = Arc::new(FlowRegistry::new(storage.clone()));
    registry
        .init_from_storage()
        .await
        .context("Failed to load flows from storage")?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.engine.http_timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    tracing::info!("⚙️ Initializing node executor");
    let mut executor = NodeExecutor::new(Arc::new(SqliteDataStore::new(pool.clone())), http.clone());
    match OpenAiCompatibleGenerator::from_config(&config.ai, http) {
        Some(generator) => {
            tracing::info!("🤖 Text generation enabled via {} ({})", config.ai.base_url, config.ai.model);
            executor = executor.with_text_generator(Arc::new(generator));
        }
        None => tracing::warn!("⚠️ CLINICFLOW_AI_API_KEY is not set; ai_analysis nodes will fail"),
    }

    tracing::info!("🚀 Initializing flow engine (max {} steps)", config.engine.max_steps);
    let engine = Arc::new(FlowEngine::new(
        Arc::new(executor),
        ExecutionTracker::new(pool),
        config.engine.max_steps,
    ));

    let app = build_router(AppState {
        storage,
        registry,
        engine,
    });

    tracing::info!("✅ Application initialized successfully");
    Ok(app)
}

/// Assemble the router around an existing state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_flow_routes())
        .merge(create_execution_routes())
        .with_state(state)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting clinicflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
