// Daemon client - the foreground's side of the background channel
// Short-lived request connections (blocking, with auto-start) plus one
// long-lived async subscription that receives PHOTO_REQUESTED broadcasts.

use super::config::Config;
use super::protocol::{
    deserialize_message, serialize_message, DaemonErrorCode, DaemonNotification, DaemonRequest,
    DaemonResponse, SlotIndex, MAX_RESPONSE_FRAME_SIZE, PROTOCOL_VERSION,
};
use super::foreground::BackgroundChannel;
use super::sampler::PromptOffsets;
use crate::cli_paths::resolve_daemon_path;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to the daemon, starting it if necessary
fn connect_or_start_daemon(config: &Config) -> Result<UnixStream> {
    if let Ok(stream) = UnixStream::connect(&config.socket_path) {
        return Ok(stream);
    }

    info!("Daemon not running, attempting to start...");

    let daemon_path = resolve_daemon_path().ok_or_else(|| {
        anyhow::anyhow!("Could not find photo-check-daemon binary. Is it installed next to photo-check?")
    })?;

    // Detached; the daemon outlives this foreground
    Command::new(&daemon_path)
        .env(super::config::DIR_ENV, config.runtime_dir())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to start daemon at {}", daemon_path.display()))?;

    // Wait for the socket to appear (up to 2 seconds)
    for _ in 0..20 {
        std::thread::sleep(Duration::from_millis(100));
        if config.socket_path.exists() {
            if let Ok(stream) = UnixStream::connect(&config.socket_path) {
                info!("Daemon started successfully");
                return Ok(stream);
            }
        }
    }

    Err(anyhow::anyhow!(
        "Daemon did not start within 2 seconds (socket not found at: {})",
        config.socket_path.display()
    ))
}

fn write_frame(stream: &mut UnixStream, msg: &DaemonRequest) -> Result<()> {
    let bytes = serialize_message(msg).context("Failed to serialize request")?;
    stream
        .write_all(&bytes)
        .context("Failed to send request to daemon")?;
    stream.flush().context("Failed to flush stream")?;
    Ok(())
}

fn check_handshake(response: DaemonResponse) -> Result<()> {
    match response {
        DaemonResponse::Handshake { .. } => Ok(()),
        DaemonResponse::Error {
            code: DaemonErrorCode::VersionMismatch,
            message,
        } => Err(anyhow::anyhow!("Protocol version mismatch: {}", message)),
        other => Err(anyhow::anyhow!(
            "Expected handshake response, got: {:?}",
            other
        )),
    }
}

/// Send one request to the daemon and receive its response.
///
/// When `auto_start` is set a missing daemon is spawned first.
pub fn send_request(
    config: &Config,
    request: DaemonRequest,
    auto_start: bool,
) -> Result<DaemonResponse> {
    let mut stream = if auto_start {
        connect_or_start_daemon(config)?
    } else {
        UnixStream::connect(&config.socket_path).with_context(|| {
            format!(
                "Daemon not reachable at {}",
                config.socket_path.display()
            )
        })?
    };

    stream
        .set_read_timeout(Some(READ_TIMEOUT))
        .context("Failed to set read timeout")?;

    write_frame(
        &mut stream,
        &DaemonRequest::Handshake {
            client_version: PROTOCOL_VERSION,
        },
    )?;
    let mut reader = BufReader::new(stream.try_clone().context("Failed to clone stream")?);
    check_handshake(read_response(&mut reader).context("Handshake failed")?)?;

    write_frame(&mut stream, &request)?;
    read_response(&mut reader)
}

/// Read the next response, skipping broadcast notifications and enforcing frame size limits
fn read_response<R: BufRead>(reader: &mut R) -> Result<DaemonResponse> {
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => return Err(anyhow::anyhow!("Daemon closed connection unexpectedly")),
            Ok(_) => {
                if line.len() > MAX_RESPONSE_FRAME_SIZE {
                    return Err(anyhow::anyhow!(
                        "Response frame too large: {} bytes (max {})",
                        line.len(),
                        MAX_RESPONSE_FRAME_SIZE
                    ));
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                return Err(anyhow::anyhow!("Daemon read timeout"));
            }
            Err(e) => return Err(e).context("Failed to read response from daemon"),
        }

        // Broadcasts reach every connection; request connections ignore them
        if deserialize_message::<DaemonNotification>(line.as_bytes()).is_ok() {
            debug!("Skipping daemon notification on request connection");
            continue;
        }

        return deserialize_message::<DaemonResponse>(line.as_bytes()).with_context(|| {
            format!("Failed to parse daemon response (line: {})", line.trim())
        });
    }
}

/// Hold a subscription open and forward every `PHOTO_REQUESTED` slot to `tx`.
///
/// Returns when the daemon goes away or `tx` is closed. Does not start the daemon.
pub async fn subscribe(config: &Config, tx: mpsc::Sender<SlotIndex>) -> Result<()> {
    let stream = tokio::net::UnixStream::connect(&config.socket_path)
        .await
        .with_context(|| format!("Daemon not reachable at {}", config.socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = tokio::io::BufReader::new(reader).lines();

    let handshake = serialize_message(&DaemonRequest::Handshake {
        client_version: PROTOCOL_VERSION,
    })?;
    writer
        .write_all(&handshake)
        .await
        .context("Failed to send handshake")?;

    let first = lines
        .next_line()
        .await
        .context("Failed to read handshake response")?
        .ok_or_else(|| anyhow::anyhow!("Daemon closed connection during handshake"))?;
    check_handshake(deserialize_message(first.as_bytes())?)?;
    debug!("Subscribed to daemon prompt signals");

    while let Some(line) = lines.next_line().await.context("Daemon subscription failed")? {
        if line.len() > MAX_RESPONSE_FRAME_SIZE {
            warn!("Dropping oversized daemon frame ({} bytes)", line.len());
            continue;
        }
        match deserialize_message::<DaemonNotification>(line.as_bytes()) {
            Ok(DaemonNotification::PhotoRequested { slot_index }) => {
                if tx.send(slot_index).await.is_err() {
                    return Ok(());
                }
            }
            Err(_) => debug!("Ignoring non-notification frame: {}", line.trim()),
        }
    }

    Ok(())
}

/// Background channel backed by the daemon socket
#[derive(Debug, Clone)]
pub struct DaemonChannel {
    config: Config,
}

impl DaemonChannel {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    async fn request(&self, request: DaemonRequest, auto_start: bool) -> Result<DaemonResponse> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || send_request(&config, request, auto_start))
            .await
            .context("Daemon request task failed")?
    }
}

#[async_trait]
impl BackgroundChannel for DaemonChannel {
    async fn arm(&self, start_time: DateTime<Utc>, offsets: PromptOffsets) -> Result<()> {
        let request = DaemonRequest::StartWorkout {
            start_time,
            offsets,
        };
        match self.request(request, true).await? {
            DaemonResponse::WorkoutArmed { due_at } => {
                debug!(?due_at, "Daemon armed prompt timers");
                Ok(())
            }
            DaemonResponse::Error { code, message } => {
                Err(anyhow::anyhow!("Daemon refused to arm ({:?}): {}", code, message))
            }
            other => Err(anyhow::anyhow!("Unexpected daemon response: {:?}", other)),
        }
    }

    async fn disarm(&self) -> Result<()> {
        // Nothing to cancel when the daemon is gone
        if !self.config.socket_exists() {
            return Ok(());
        }
        match self.request(DaemonRequest::StopWorkout, false).await? {
            DaemonResponse::WorkoutStopped { cancelled } => {
                debug!(cancelled, "Daemon cancelled prompt timers");
                Ok(())
            }
            DaemonResponse::Error { code, message } => {
                Err(anyhow::anyhow!("Daemon refused to stop ({:?}): {}", code, message))
            }
            other => Err(anyhow::anyhow!("Unexpected daemon response: {:?}", other)),
        }
    }
}
