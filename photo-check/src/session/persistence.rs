// Persistence helpers for the foreground
// The running session is snapshotted to $STATE/active_session.json so a
// restarted foreground resumes it; finished workouts go to $STATE/workouts.jsonl.

use crate::session::config::Config;
use crate::session::controller::{Submission, WorkoutSession};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// On-disk snapshot of a running session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSessionRecord {
    pub session: WorkoutSession,
    pub saved_at: DateTime<Utc>,
}

impl ActiveSessionRecord {
    pub fn new(session: WorkoutSession, saved_at: DateTime<Utc>) -> Self {
        Self { session, saved_at }
    }

    /// Load the snapshot, `None` when no session is in progress
    pub fn load(config: &Config) -> Result<Option<Self>> {
        let path = config.active_session_file();
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read active session: {}", path.display()))?;
        if contents.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&contents)
            .map(Some)
            .with_context(|| format!("Failed to parse active session: {}", path.display()))
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let path = config.active_session_file();
        ensure_parent(&path)?;
        let contents = serde_json::to_string_pretty(self)
            .with_context(|| "Failed to serialize active session")?;
        atomic_write(&path, &contents)
    }

    /// Remove the snapshot (discard or successful submission)
    pub fn clear(config: &Config) -> Result<()> {
        let path = config.active_session_file();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove active session: {}", path.display())),
        }
    }
}

/// Append-only log of submitted workouts, one JSON object per line
#[derive(Debug, Clone)]
pub struct WorkoutLog {
    path: PathBuf,
}

impl WorkoutLog {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.workout_log_file(),
        }
    }

    pub fn append(&self, submission: &Submission) -> Result<()> {
        ensure_parent(&self.path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open workout log: {}", self.path.display()))?;

        file.lock_exclusive()
            .with_context(|| "Failed to acquire exclusive lock on workout log")?;

        let mut line =
            serde_json::to_string(submission).with_context(|| "Failed to serialize workout")?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| "Failed to write workout log")?;

        // Lock is released when file is dropped
        Ok(())
    }

    /// Start instants of every logged workout. Unparseable lines are skipped.
    pub fn history(&self) -> Result<Vec<DateTime<Utc>>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to open workout log: {}", self.path.display()))
            }
        };
        file.lock_shared()
            .with_context(|| "Failed to acquire shared lock on workout log")?;

        let mut starts = Vec::new();
        for line in BufReader::new(&file).lines() {
            let line = line.with_context(|| "Failed to read workout log")?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Submission>(&line) {
                Ok(submission) => starts.push(submission.start_time),
                Err(e) => tracing::warn!("Skipping malformed workout log line: {}", e),
            }
        }
        Ok(starts)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Atomically save data to a file using write-to-temp + rename
pub fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    // Temp file in the same directory keeps the rename on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
