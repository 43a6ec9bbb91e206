use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use weft_core::config::GatewayConfig;
use weft_core::traits::WorkflowStore;
use weft_engine::WorkflowEngine;

use crate::routes;
use crate::state::AppState;

/// Route table shared by the server and in-process callers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route(
            "/api/workflows",
            get(routes::list_workflows).post(routes::save_workflow),
        )
        .route(
            "/api/workflows/{id}",
            get(routes::get_workflow).delete(routes::delete_workflow),
        )
        .route("/api/workflows/{id}/execute", post(routes::execute_workflow))
        .route("/api/executions/{id}", get(routes::get_execution))
        .route("/api/executions/{id}/resume", post(routes::resume_execution))
        .route("/api/executions/{id}/cancel", post(routes::cancel_execution))
        .route("/api/inbox/callback", post(routes::inbox_callback))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP front for the engine: workflow CRUD, runs and inbox callbacks.
pub struct GatewayServer {
    config: GatewayConfig,
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn WorkflowStore>,
}

impl GatewayServer {
    pub fn new(
        config: GatewayConfig,
        engine: Arc<WorkflowEngine>,
        store: Arc<dyn WorkflowStore>,
    ) -> Self {
        Self {
            config,
            engine,
            store,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let state = Arc::new(AppState::new(
            self.config.clone(),
            Arc::clone(&self.engine),
            Arc::clone(&self.store),
        ));

        let app = router(state);
        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        // Runs still in flight cannot be settled once the callback route is gone
        for id in self.engine.registry().ids() {
            self.engine.request_cancel(&id);
        }
        info!("Gateway shut down");
        Ok(())
    }
}
