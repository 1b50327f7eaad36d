// photo-check-daemon: background execution context for workout prompts
//
// Responsibilities:
// - Own the background scheduler (two named prompt timers per workout)
// - Raise a system notification when a prompt becomes due
// - Expose the Unix socket protocol to the foreground
// - Broadcast PHOTO_REQUESTED to every subscribed foreground
//
// State is in-memory only. A restarted daemon has no timers until the
// foreground re-arms them.

use anyhow::{Context, Result};
use chrono::Utc;
use photo_check_lib::{
    logging,
    session::{
        background::BackgroundScheduler,
        config::{notifications_enabled, Config},
        notify::{Notifier, SilentNotifier, SystemNotifier},
        protocol::{
            deserialize_message, parse_prompt_link, serialize_message, DaemonErrorCode,
            DaemonNotification, DaemonRequest, DaemonResponse, MAX_REQUEST_FRAME_SIZE,
            PROTOCOL_VERSION,
        },
    },
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Daemon state shared across all client connections
struct DaemonState {
    scheduler: Mutex<BackgroundScheduler>,
    /// Prompt signals fanned out to every connection
    updates_tx: broadcast::Sender<DaemonNotification>,
}

impl DaemonState {
    fn new(notifier: Arc<dyn Notifier>) -> Self {
        let (updates_tx, _) = broadcast::channel(16);
        Self {
            scheduler: Mutex::new(BackgroundScheduler::new(updates_tx.clone(), notifier)),
            updates_tx,
        }
    }
}

/// Handle a single client connection
async fn handle_client(
    state: Arc<DaemonState>,
    mut stream: UnixStream,
    shutdown_tx: mpsc::Sender<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    let mut handshaken = false;

    let mut updates_rx = state.updates_tx.subscribe();

    loop {
        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        let response = if line.len() > MAX_REQUEST_FRAME_SIZE {
                            invalid(format!(
                                "Request frame too large: {} bytes (max {})",
                                line.len(),
                                MAX_REQUEST_FRAME_SIZE
                            ))
                        } else {
                            match deserialize_message::<DaemonRequest>(line.as_bytes()) {
                                Ok(DaemonRequest::Handshake { client_version }) => {
                                    let response = handshake(client_version);
                                    handshaken = matches!(response, DaemonResponse::Handshake { .. });
                                    response
                                }
                                Ok(_) if !handshaken => {
                                    invalid("Handshake required before other requests".to_string())
                                }
                                Ok(request) => handle_request(&state, request).await,
                                Err(e) => invalid(format!("Failed to parse request: {}", e)),
                            }
                        };

                        let bytes = serialize_message(&response)?;
                        writer.write_all(&bytes).await?;
                        writer.flush().await?;

                        // Signal only once the acknowledgement is on the wire
                        if matches!(response, DaemonResponse::ShuttingDown) {
                            let _ = shutdown_tx.send(()).await;
                        }

                        line.clear();
                    }
                    Err(e) => {
                        warn!("Error reading from client: {}", e);
                        break;
                    }
                }
            }

            result = updates_rx.recv() => {
                match result {
                    // Only subscribed (handshaken) connections receive prompt signals
                    Ok(notification) if handshaken => {
                        let bytes = serialize_message(&notification)?;
                        if writer.write_all(&bytes).await.is_err() {
                            break;
                        }
                        let _ = writer.flush().await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "client lagging behind prompt signals");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}

fn invalid(message: String) -> DaemonResponse {
    DaemonResponse::Error {
        code: DaemonErrorCode::InvalidRequest,
        message,
    }
}

fn handshake(client_version: u32) -> DaemonResponse {
    if client_version != PROTOCOL_VERSION {
        let message = if client_version < PROTOCOL_VERSION {
            "Daemon is newer than photo-check, please update photo-check.".to_string()
        } else {
            "Daemon is outdated, please restart it.".to_string()
        };
        return DaemonResponse::Error {
            code: DaemonErrorCode::VersionMismatch,
            message,
        };
    }
    DaemonResponse::Handshake {
        protocol_version: PROTOCOL_VERSION,
    }
}

/// Handle a single post-handshake request
async fn handle_request(state: &Arc<DaemonState>, request: DaemonRequest) -> DaemonResponse {
    match request {
        DaemonRequest::Handshake { client_version } => handshake(client_version),

        DaemonRequest::StartWorkout {
            start_time,
            offsets,
        } => {
            let due_at = state
                .scheduler
                .lock()
                .await
                .start_workout(start_time, offsets, Utc::now());
            info!(%start_time, offsets = ?offsets.as_secs(), "workout armed");
            DaemonResponse::WorkoutArmed { due_at }
        }

        DaemonRequest::StopWorkout => {
            let cancelled = state.scheduler.lock().await.stop_workout();
            DaemonResponse::WorkoutStopped { cancelled }
        }

        DaemonRequest::OpenLink { link } => match parse_prompt_link(&link) {
            Some(slot_index) => {
                let receivers = state.scheduler.lock().await.forward(slot_index);
                debug!(%slot_index, receivers, "forwarded prompt link");
                DaemonResponse::LinkForwarded { slot_index }
            }
            None => invalid(format!("Not a photo prompt link: {}", link)),
        },

        DaemonRequest::Ping => DaemonResponse::Pong,

        DaemonRequest::Shutdown => DaemonResponse::ShuttingDown,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");

    let config = Config::from_env();

    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    if config.socket_exists() {
        if config.is_daemon_running() {
            error!("Daemon already running (PID: {:?})", config.read_pid());
            std::process::exit(1);
        }
        config
            .remove_socket()
            .context("Failed to remove stale socket")?;
    }

    config.write_pid().context("Failed to write PID file")?;

    let notifier: Arc<dyn Notifier> = if notifications_enabled() {
        Arc::new(SystemNotifier)
    } else {
        info!("System notifications disabled");
        Arc::new(SilentNotifier)
    };
    let state = Arc::new(DaemonState::new(notifier));

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    info!("Daemon listening on {}", config.socket_path.display());

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = shutdown_tx_clone.send(()).await;
    });

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown_tx = shutdown_tx.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(state, stream, shutdown_tx).await {
                                warn!("Client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                info!("Shutting down daemon...");
                break;
            }
        }
    }

    state.scheduler.lock().await.stop_workout();
    config.remove_pid().ok();
    config.remove_socket().ok();

    info!("Daemon stopped");
    Ok(())
}
