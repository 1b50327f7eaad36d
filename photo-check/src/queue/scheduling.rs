// Task creation for a session start: exactly two pending tasks, one per slot.

use crate::queue::store::{QueueError, TaskStore};
use crate::queue::task::{NotificationPayload, NotificationTask};
use crate::session::config::WorkoutSettings;
use crate::session::protocol::SlotIndex;
use crate::session::sampler::{sample_offsets, PromptOffsets, SamplerError};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Body of `POST /api/schedule-notifications`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub device_token: String,
    /// Session start; defaults to the time the request is handled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// The session's stored offsets; sampled server-side when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offsets: Option<PromptOffsets>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Write the two pending tasks for a session start in one batch.
pub fn schedule_notifications<R: Rng + ?Sized>(
    store: &dyn TaskStore,
    request: &ScheduleRequest,
    settings: &WorkoutSettings,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Vec<NotificationTask>, ScheduleError> {
    if request.user_id.trim().is_empty() {
        return Err(ScheduleError::MissingField("userId"));
    }
    if request.device_token.trim().is_empty() {
        return Err(ScheduleError::MissingField("deviceToken"));
    }

    let start_time = request.start_time.unwrap_or(now);
    let offsets = match request.offsets {
        Some(offsets) => offsets,
        None => sample_offsets(settings.workout_duration, &settings.windows, rng)?,
    };

    let tasks: Vec<NotificationTask> = SlotIndex::ALL
        .into_iter()
        .map(|slot| {
            NotificationTask::pending(
                &request.user_id,
                &request.device_token,
                NotificationPayload::for_slot(slot, &request.user_id, start_time),
                offsets.due_at(start_time, slot),
                now,
            )
        })
        .collect();

    store.insert_batch(tasks.clone())?;
    info!(
        user_id = %request.user_id,
        first_send_at = %tasks[0].send_at,
        second_send_at = %tasks[1].send_at,
        "scheduled photo notifications"
    );
    Ok(tasks)
}
