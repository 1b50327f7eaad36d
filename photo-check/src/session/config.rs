// Environment configuration helpers
// Handles platform-specific paths for sockets, PID files and state, plus the
// workout/prompt settings shared by the foreground, daemon and server.

use crate::session::sampler::{PromptWindow, WindowPair};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Overrides both the runtime and the state directory
pub const DIR_ENV: &str = "PHOTO_CHECK_DIR";

/// Configuration for daemon paths and on-disk state
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for storing runtime files (socket, PID)
    pub runtime_dir: PathBuf,
    /// Directory for storing persistent state (task store, active session, workout log)
    pub state_dir: PathBuf,
    /// Path to the daemon Unix socket
    pub socket_path: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        let runtime_dir = Self::default_runtime_dir();
        let state_dir = Self::default_state_dir();

        Self {
            socket_path: runtime_dir.join("daemon.sock"),
            pid_file: runtime_dir.join("daemon.pid"),
            runtime_dir,
            state_dir,
        }
    }

    /// Create configuration rooted at a single directory
    pub fn in_dir(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            socket_path: base.join("daemon.sock"),
            pid_file: base.join("daemon.pid"),
            runtime_dir: base.clone(),
            state_dir: base,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        match std::env::var(DIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => Self::in_dir(dir),
            _ => Self::default_paths(),
        }
    }

    fn default_runtime_dir() -> PathBuf {
        #[cfg(target_os = "linux")]
        {
            // Linux: prefer XDG_RUNTIME_DIR if set, else fall back to state_dir
            if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
                return PathBuf::from(runtime_dir).join("photo-check");
            }
        }

        Self::default_state_dir()
    }

    fn default_state_dir() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".photo-check"))
            .unwrap_or_else(|| PathBuf::from("/tmp/photo-check"))
    }

    pub fn runtime_dir(&self) -> &PathBuf {
        &self.runtime_dir
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Durable notification task store (server)
    pub fn tasks_file(&self) -> PathBuf {
        self.state_dir.join("notification_tasks.json")
    }

    /// Snapshot of the in-progress session (foreground)
    pub fn active_session_file(&self) -> PathBuf {
        self.state_dir.join("active_session.json")
    }

    /// Local log of submitted workouts (foreground)
    pub fn workout_log_file(&self) -> PathBuf {
        self.state_dir.join("workouts.jsonl")
    }

    /// Ensure both runtime and state directories exist with appropriate permissions
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.runtime_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.runtime_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the daemon PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    /// Read the daemon PID from the PID file
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    pub fn remove_pid(&self) -> std::io::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)
        } else {
            Ok(())
        }
    }

    pub fn remove_socket(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
        } else {
            Ok(())
        }
    }

    /// Check if the daemon socket exists (indicating daemon may be running)
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Check if a process with the stored PID is still running
    #[cfg(unix)]
    pub fn is_daemon_running(&self) -> bool {
        if let Some(pid) = self.read_pid() {
            // Signal 0 only checks for existence
            unsafe { libc::kill(pid as i32, 0) == 0 }
        } else {
            false
        }
    }

    #[cfg(not(unix))]
    pub fn is_daemon_running(&self) -> bool {
        self.socket_exists()
    }
}

/// Timing rules of a workout session
#[derive(Debug, Clone, PartialEq)]
pub struct WorkoutSettings {
    /// Nominal workout length the prompt windows are fractions of
    pub workout_duration: Duration,
    /// Shortest session that may be submitted
    pub minimum_duration: Duration,
    pub windows: WindowPair,
    /// How long the success state is shown before returning to idle
    pub success_reset: Duration,
}

impl Default for WorkoutSettings {
    fn default() -> Self {
        Self {
            workout_duration: Duration::from_secs(40 * 60),
            minimum_duration: Duration::from_secs(40 * 60),
            windows: WindowPair::default(),
            success_reset: Duration::from_secs(5),
        }
    }
}

impl WorkoutSettings {
    /// Read `PHOTO_CHECK_*` overrides; invalid values keep the default
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(duration) = env_minutes("PHOTO_CHECK_WORKOUT_MINUTES") {
            settings.workout_duration = duration;
        }
        if let Some(duration) = env_minutes("PHOTO_CHECK_MIN_MINUTES") {
            settings.minimum_duration = duration;
        }
        if let Some(secs) = env_parse::<u64>("PHOTO_CHECK_SUCCESS_RESET_SECS") {
            settings.success_reset = Duration::from_secs(secs);
        }

        let first = env_parse::<PromptWindow>("PHOTO_CHECK_WINDOW_1");
        let second = env_parse::<PromptWindow>("PHOTO_CHECK_WINDOW_2");
        if first.is_some() || second.is_some() {
            let candidate = WindowPair {
                first: first.unwrap_or(settings.windows.first),
                second: second.unwrap_or(settings.windows.second),
            };
            match candidate.validate() {
                Ok(()) => settings.windows = candidate,
                Err(e) => warn!("Ignoring prompt window override: {}", e),
            }
        }

        settings
    }
}

/// Foreground identity and channel endpoints
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub user_id: String,
    /// Push registration; `None` when notification permission was not granted
    pub device_token: Option<String>,
    /// Base URL of the scheduling server; `None` disables the push channel
    pub server_url: Option<String>,
}

impl ClientSettings {
    pub fn from_env() -> Self {
        let user_id = env_string("PHOTO_CHECK_USER")
            .or_else(|| env_string("USER"))
            .unwrap_or_else(|| "local".to_string());
        Self {
            user_id,
            device_token: env_string("PHOTO_CHECK_DEVICE_TOKEN"),
            server_url: env_string("PHOTO_CHECK_SERVER_URL"),
        }
    }
}

/// Scheduling/dispatch server settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: String,
    /// Bearer credential required by the dispatch trigger
    pub cron_secret: Option<String>,
    /// Push relay endpoint; `None` selects the dry-run gateway
    pub push_endpoint: Option<String>,
    pub push_key: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            cron_secret: None,
            push_endpoint: None,
            push_key: None,
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: env_string("PHOTO_CHECK_LISTEN").unwrap_or(defaults.listen_addr),
            cron_secret: env_string("PHOTO_CHECK_CRON_SECRET"),
            push_endpoint: env_string("PHOTO_CHECK_PUSH_ENDPOINT"),
            push_key: env_string("PHOTO_CHECK_PUSH_KEY"),
        }
    }
}

/// Whether the daemon may raise system notifications
pub fn notifications_enabled() -> bool {
    !matches!(
        env_string("PHOTO_CHECK_NOTIFICATIONS").as_deref(),
        Some("off") | Some("0") | Some("false")
    )
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env_string(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

fn env_minutes(key: &str) -> Option<Duration> {
    minutes(key, env_parse::<u64>(key)?)
}

fn minutes(key: &str, minutes: u64) -> Option<Duration> {
    match minutes.checked_mul(60) {
        Some(secs) => Some(Duration::from_secs(secs)),
        None => {
            warn!("Ignoring {}={}: too many minutes", key, minutes);
            None
        }
    }
}
