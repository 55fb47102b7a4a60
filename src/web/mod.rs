//! Control API for operators.
//!
//! Registers users and targets, exposes uptime and history, and forwards
//! immediate probe and report requests to the engine. There is no
//! authentication layer; bind it to a trusted interface.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::notify::NotificationTrigger;
use crate::scheduler::Scheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
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
    pub store: Arc<Store>,
    pub scheduler: Arc<Scheduler>,
    pub notifications: Arc<NotificationTrigger>,
}

/// Web server for the control API.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route(
                "/api/targets",
                get(handlers::handle_get_targets).post(handlers::handle_create_target),
            )
            .route(
                "/api/targets/{id}",
                get(handlers::handle_get_target).delete(handlers::handle_delete_target),
            )
            .route("/api/targets/{id}/category", put(handlers::handle_update_category))
            .route("/api/targets/{id}/uptime", get(handlers::handle_get_uptime))
            .route("/api/targets/{id}/history", get(handlers::handle_get_history))
            .route("/api/probe", post(handlers::handle_probe_now))
            .route("/api/users", post(handlers::handle_create_user))
            .route("/api/users/{id}/summary", get(handlers::handle_get_summary))
            .route("/api/users/{id}/report", post(handlers::handle_send_report))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve on the configured port until `shutdown` resolves.
    pub async fn start<F>(
        &self,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.routes();

        tracing::info!("Control API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
