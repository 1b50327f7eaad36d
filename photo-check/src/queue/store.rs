// Task store - the only resource shared between scheduling and dispatch
// Tasks are persisted to $STATE/notification_tasks.json. Every operation runs
// under an in-process mutex plus an exclusive fs2 lock on a sibling .lock file,
// so concurrent dispatch passes (even from separate processes) see each other's marks.

use crate::queue::task::{NotificationTask, TaskStatus};
use crate::session::persistence::atomic_write;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("task store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error(transparent)]
    Persist(#[from] anyhow::Error),
    #[error("task store lock poisoned")]
    Poisoned,
}

/// Durable storage for notification tasks.
///
/// Status changes are conditional on the task still being `pending`; the
/// returned bool says whether this caller made the change.
pub trait TaskStore: Send + Sync {
    /// Insert all tasks in one atomic write
    fn insert_batch(&self, tasks: Vec<NotificationTask>) -> Result<(), QueueError>;
    /// Pending tasks with `send_at <= now`, earliest first
    fn due_pending(&self, now: DateTime<Utc>) -> Result<Vec<NotificationTask>, QueueError>;
    fn mark_sent(&self, id: Uuid) -> Result<bool, QueueError>;
    fn mark_error(&self, id: Uuid) -> Result<bool, QueueError>;
    /// Delete in one atomic write; returns how many existed
    fn delete(&self, ids: &[Uuid]) -> Result<usize, QueueError>;
    fn all(&self) -> Result<Vec<NotificationTask>, QueueError>;
}

#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl JsonTaskStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = path.with_extension("lock");
        Ok(Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` over the full task list under both locks; writes back when `f` says so
    fn with_tasks<T>(
        &self,
        f: impl FnOnce(&mut Vec<NotificationTask>) -> (T, bool),
    ) -> Result<T, QueueError> {
        let _guard = self.guard.lock().map_err(|_| QueueError::Poisoned)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)?;
        lock_file.lock_exclusive()?;

        let mut tasks = self.read_tasks()?;
        let (value, dirty) = f(&mut tasks);
        if dirty {
            let contents = serde_json::to_string_pretty(&tasks)?;
            atomic_write(&self.path, &contents)?;
        }

        // Lock is released when lock_file is dropped
        Ok(value)
    }

    fn read_tasks(&self) -> Result<Vec<NotificationTask>, QueueError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn transition(&self, id: Uuid, to: TaskStatus) -> Result<bool, QueueError> {
        self.with_tasks(|tasks| {
            match tasks
                .iter_mut()
                .find(|t| t.id == id && t.status == TaskStatus::Pending)
            {
                Some(task) => {
                    task.status = to;
                    (true, true)
                }
                None => (false, false),
            }
        })
    }
}

impl TaskStore for JsonTaskStore {
    fn insert_batch(&self, new_tasks: Vec<NotificationTask>) -> Result<(), QueueError> {
        if new_tasks.is_empty() {
            return Ok(());
        }
        self.with_tasks(|tasks| {
            tasks.extend(new_tasks);
            ((), true)
        })
    }

    fn due_pending(&self, now: DateTime<Utc>) -> Result<Vec<NotificationTask>, QueueError> {
        self.with_tasks(|tasks| {
            let mut due: Vec<NotificationTask> =
                tasks.iter().filter(|t| t.is_due(now)).cloned().collect();
            due.sort_by_key(|t| t.send_at);
            (due, false)
        })
    }

    fn mark_sent(&self, id: Uuid) -> Result<bool, QueueError> {
        self.transition(id, TaskStatus::Sent)
    }

    fn mark_error(&self, id: Uuid) -> Result<bool, QueueError> {
        self.transition(id, TaskStatus::Error)
    }

    fn delete(&self, ids: &[Uuid]) -> Result<usize, QueueError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.with_tasks(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| !ids.contains(&t.id));
            let removed = before - tasks.len();
            (removed, removed > 0)
        })
    }

    fn all(&self) -> Result<Vec<NotificationTask>, QueueError> {
        self.with_tasks(|tasks| (tasks.clone(), false))
    }
}
