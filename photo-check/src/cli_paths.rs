// Binary discovery for the background daemon
// The foreground starts `photo-check-daemon` on demand, so it needs to find it.

use std::path::PathBuf;

pub const DAEMON_BINARY: &str = "photo-check-daemon";

/// Overrides discovery entirely (tests, custom installs)
pub const DAEMON_PATH_ENV: &str = "PHOTO_CHECK_DAEMON_BIN";

fn daemon_file_name() -> String {
    if cfg!(windows) {
        format!("{}.exe", DAEMON_BINARY)
    } else {
        DAEMON_BINARY.to_string()
    }
}

/// Platform-specific fallback locations to search for installed binaries
pub fn fallback_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();

    if let Some(home) = dirs::home_dir() {
        locations.push(home.join(".cargo/bin"));
        locations.push(home.join(".local/bin"));
    }

    #[cfg(unix)]
    {
        locations.push(PathBuf::from("/usr/local/bin"));
        locations.push(PathBuf::from("/usr/bin"));
    }

    locations
}

/// Try to find the daemon binary using fallback heuristics
pub fn find_daemon_binary() -> Option<PathBuf> {
    let binary_name = daemon_file_name();
    fallback_locations()
        .into_iter()
        .map(|dir| dir.join(&binary_name))
        .find(|candidate| candidate.is_file())
}

/// Resolve the `photo-check-daemon` binary path for the current process.
///
/// Resolution order:
/// 1) `PHOTO_CHECK_DAEMON_BIN`
/// 2) Next to `current_exe()` (cargo target dir / installed together)
/// 3) Platform fallback locations
pub fn resolve_daemon_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(DAEMON_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Some(path);
        }
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join(daemon_file_name());
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    find_daemon_binary()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_locations_not_empty() {
        assert!(!fallback_locations().is_empty());
    }

    #[test]
    fn test_env_override_wins() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let fake = temp_dir.path().join("daemon-bin");
        std::fs::write(&fake, b"").unwrap();

        std::env::set_var(DAEMON_PATH_ENV, &fake);
        assert_eq!(resolve_daemon_path(), Some(fake));
        std::env::remove_var(DAEMON_PATH_ENV);
    }
}
