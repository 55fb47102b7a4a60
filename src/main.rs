//! Uptime Monitor - periodic HTTP uptime probing with rolling 24h statistics.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use notify::{LogNotifier, NotificationTrigger, Notifier, WebhookNotifier};
use scheduler::Scheduler;
use web::{AppState, Server};

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Pick up a .env file before anything reads the environment
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptime_monitor=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting uptime monitor on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    let notifier: Arc<dyn Notifier> = match &cfg.webhook_url {
        Some(url) => {
            tracing::info!("Delivering uptime reports to {}", url);
            Arc::new(WebhookNotifier::new(url.clone(), Duration::from_secs(30))?)
        }
        None => {
            tracing::warn!("No webhook configured - uptime reports will only be logged");
            Arc::new(LogNotifier)
        }
    };
    let notifications = Arc::new(NotificationTrigger::new(store.clone(), notifier));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        notifications.clone(),
        cfg.scheduler_config(),
    ));
    scheduler.start()?;

    let server = Server::new(
        cfg,
        AppState {
            store,
            scheduler: scheduler.clone(),
            notifications,
        },
    );
    let result = server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await;

    if scheduler.is_running() {
        scheduler.stop()?;
    }
    result
}
