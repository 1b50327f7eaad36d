// photo-check-server: durable prompt queue and push dispatch over HTTP
//
// POST /api/schedule-notifications writes two pending tasks per workout start.
// GET /api/send-notifications runs one dispatch pass; call it from cron.

use anyhow::{Context, Result};
use photo_check_lib::{
    dispatch::{gateway_from_settings, DispatchWorker},
    logging,
    queue::{JsonTaskStore, TaskStore},
    server::{serve, ServerState},
    session::config::{Config, ServerSettings, WorkoutSettings},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");

    let config = Config::from_env();
    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    let settings = ServerSettings::from_env();
    let workout = WorkoutSettings::from_env();

    let store: Arc<dyn TaskStore> = Arc::new(
        JsonTaskStore::open(config.tasks_file())
            .with_context(|| format!("Failed to open task store {}", config.tasks_file().display()))?,
    );
    let worker = DispatchWorker::new(Arc::clone(&store), gateway_from_settings(&settings));
    let state = ServerState::new(store, worker, workout, settings.cron_secret.clone());

    let listener = TcpListener::bind(&settings.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.listen_addr))?;

    serve(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down server...");
    })
    .await
}
