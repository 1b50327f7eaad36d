// Dispatch worker - one pass per external trigger
//
// query due pending -> send each -> mark sent/error (only if still pending)
// -> delete what this pass marked sent, in one batch.

use crate::dispatch::gateway::{MessagingGateway, PushMessage};
use crate::queue::store::{QueueError, TaskStore};
use crate::queue::task::NotificationTask;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Tasks this pass moved from pending to sent
    pub sent: usize,
    /// Tasks this pass moved from pending to error
    pub failed: usize,
    /// Tasks another pass had already settled by the time this one marked them
    pub duplicates: usize,
}

#[derive(Clone)]
pub struct DispatchWorker {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn MessagingGateway>,
}

impl DispatchWorker {
    pub fn new(store: Arc<dyn TaskStore>, gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { store, gateway }
    }

    pub fn collect_due(&self, now: DateTime<Utc>) -> Result<Vec<NotificationTask>, QueueError> {
        self.store.due_pending(now)
    }

    /// Send `tasks` and settle each; never sends a task twice within one pass.
    ///
    /// A store failure stops the pass, but whatever this pass already marked
    /// `sent` is still deleted before the error is returned.
    pub async fn deliver(&self, tasks: Vec<NotificationTask>) -> Result<DispatchReport, QueueError> {
        let mut report = DispatchReport::default();
        let mut sent_ids = Vec::new();
        let mut store_error = None;

        for task in tasks {
            let message = PushMessage::from_task(&task);
            let settled = match self.gateway.send(&message).await {
                Ok(message_id) => self.store.mark_sent(task.id).map(|marked| {
                    if marked {
                        debug!(task_id = %task.id, %message_id, user_id = %task.user_id, "push sent");
                        sent_ids.push(task.id);
                        report.sent += 1;
                    } else {
                        report.duplicates += 1;
                    }
                }),
                Err(e) => {
                    warn!(task_id = %task.id, user_id = %task.user_id, "push failed: {}", e);
                    self.store.mark_error(task.id).map(|marked| {
                        if marked {
                            report.failed += 1;
                        } else {
                            report.duplicates += 1;
                        }
                    })
                }
            };
            if let Err(e) = settled {
                error!(task_id = %task.id, "failed to settle task: {}", e);
                store_error = Some(e);
                break;
            }
        }

        if !sent_ids.is_empty() {
            let deleted = self.store.delete(&sent_ids);
            if store_error.is_none() {
                deleted?;
            } else if let Err(e) = deleted {
                error!("failed to delete sent tasks: {}", e);
            }
        }

        match store_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<DispatchReport, QueueError> {
        let due = self.collect_due(now)?;
        if due.is_empty() {
            debug!("no notifications due");
            return Ok(DispatchReport::default());
        }
        let report = self.deliver(due).await?;
        info!(
            sent = report.sent,
            failed = report.failed,
            duplicates = report.duplicates,
            "dispatch pass complete"
        );
        Ok(report)
    }
}
