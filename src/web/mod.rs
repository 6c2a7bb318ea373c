//! Web server module.

mod handlers;

pub use handlers::*;

use crate::engine::Engine;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// JSON query surface over the decision engine.
pub struct Server {
    port: u16,
    state: AppState,
}

impl Server {
    pub fn new(port: u16, engine: Arc<Engine>) -> Self {
        Self {
            port,
            state: AppState { engine },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/entities/{id}", get(handlers::handle_evaluate))
            .route("/api/entities/{id}/status", get(handlers::handle_current_status))
            .route("/api/entities/{id}/tickets", get(handlers::handle_entity_tickets))
            .route("/api/entities/{id}/actions", get(handlers::handle_action_log))
            .route("/api/tickets", get(handlers::handle_list_tickets).post(handlers::handle_create_ticket))
            .route("/api/tickets/{id}/status", patch(handlers::handle_update_ticket_status))
            .route("/api/tickets/{id}/note", post(handlers::handle_add_ticket_note))
            .route("/api/tickets/{id}/history", get(handlers::handle_ticket_history))
            .route("/api/trend/{id}", get(handlers::handle_trend))
            .route("/api/counts", get(handlers::handle_counts))
            .route("/api/status", get(handlers::handle_status))
            .route("/api/sweep", post(handlers::handle_sweep))
            .route("/api/reset", post(handlers::handle_reset))
            .route("/api/health", get(handlers::handle_health))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
