use photo_check_lib::session::config::{Config, DIR_ENV};
use super::polling::assert_eventually_bool;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// RAII wrapper that kills the daemon process on drop.
pub struct DaemonGuard {
    child: Child,
    config: Config,
}

impl DaemonGuard {
    /// Start the compiled daemon in `data_dir` and wait for its socket.
    pub async fn start(data_dir: &Path) -> Self {
        let child = Command::new(env!("CARGO_BIN_EXE_photo-check-daemon"))
            .env(DIR_ENV, data_dir)
            .env("PHOTO_CHECK_NOTIFICATIONS", "off")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn photo-check-daemon");

        let guard = Self {
            child,
            config: Config::in_dir(data_dir),
        };

        let config = guard.config.clone();
        assert_eventually_bool(
            "daemon socket and pid file",
            READY_TIMEOUT,
            Duration::from_millis(50),
            || {
                let config = config.clone();
                async move { config.socket_exists() && config.read_pid().is_some() }
            },
        )
        .await;

        guard
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Whether the process has exited (reaping it if so)
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        if let Err(err) = self.child.kill() {
            eprintln!(
                "Failed to terminate photo-check-daemon pid {}: {}",
                self.child.id(),
                err
            );
            return;
        }

        let _ = self.child.wait();
    }
}
