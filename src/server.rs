/// Server setup and initialization
///
/// Wires together storage, registry, executors, orchestrator and HTTP routes.
/// Provides the application factory used by `main` and the HTTP tests.

use crate::{
    api::{create_execution_routes, create_workflow_routes, AppState},
    config::Config,
    runtime::{
        checkpoint::SqliteCheckpointStore,
        engine::ExecutionOrchestrator,
        executor::ExecutorRegistry,
        provider::ProviderRouter,
    },
    workflow::{
        registry::WorkflowRegistry,
        service::WorkflowService,
        storage::{self, WorkflowStorage},
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Build the workflow service with all of its collaborators
pub async fn create_service(config: &Config) -> Result<Arc<WorkflowService>> {
    let db_path = config.database.database_path();
    tracing::info!("📁 Opening playground database: {}", db_path.display());
    let pool = storage::connect(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database {}: {}", db_path.display(), e))?;

    tracing::info!("📋 Initializing workflow storage");
    let workflow_storage = WorkflowStorage::new(pool.clone());
    workflow_storage.init_schema().await?;

    tracing::info!("💾 Initializing checkpoint store");
    let checkpoints = Arc::new(SqliteCheckpointStore::new(pool));
    checkpoints.init_schema().await?;

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new());
    registry
        .init_from_storage(&workflow_storage)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    let providers = ProviderRouter::simulated();
    tracing::info!("🤖 Registered providers: {:?}", providers.providers());

    tracing::info!("⚙️ Initializing node executors");
    let executors = Arc::new(ExecutorRegistry::with_defaults(
        Arc::new(providers),
        checkpoints.clone(),
    ));

    tracing::info!("🚀 Initializing execution orchestrator");
    let orchestrator = Arc::new(
        ExecutionOrchestrator::new(executors)
            .with_default_timeout(config.engine.run_timeout())
            .with_max_concurrency(config.engine.max_concurrency),
    );

    Ok(Arc::new(WorkflowService::new(
        workflow_storage,
        registry,
        orchestrator,
        checkpoints,
    )))
}

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    let service = create_service(&config).await?;
    Ok(create_router(service))
}

/// Router over an already built service
pub fn create_router(service: Arc<WorkflowService>) -> Router {
    let app_state = AppState { service };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_workflow_routes())
        .merge(create_execution_routes())
        .with_state(app_state)
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting AI PlayGround server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
