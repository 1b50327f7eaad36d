use crate::session::protocol::SlotIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Sent,
    /// Gateway rejected the send; kept for inspection, never retried
    Error,
}

/// What the push shows and where tapping it leads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub slot_index: SlotIndex,
    /// Deep link back into the slot's capture prompt
    pub link: String,
    /// Collapse key so re-deliveries replace instead of stacking
    pub tag: String,
}

impl NotificationPayload {
    pub fn for_slot(slot: SlotIndex, user_id: &str, start_time: DateTime<Utc>) -> Self {
        let (title, body) = match slot {
            SlotIndex::First => (
                "Workout check - Photo 1",
                "Time for your first verification photo! Tap to open the camera.",
            ),
            SlotIndex::Second => (
                "Workout check - Photo 2",
                "Last check! Tap to take your second photo.",
            ),
        };
        Self {
            title: title.to_string(),
            body: body.to_string(),
            slot_index: slot,
            link: slot.deep_link(),
            tag: collapse_tag(slot, user_id, start_time),
        }
    }
}

/// `photo-request-<n>-<12 hex chars>`, unique per user, session and slot
pub fn collapse_tag(slot: SlotIndex, user_id: &str, start_time: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(start_time.timestamp().to_be_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("photo-request-{}-{}", slot.number(), &digest[..12])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationTask {
    pub id: Uuid,
    pub user_id: String,
    pub device_token: String,
    pub payload: NotificationPayload,
    pub send_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

impl NotificationTask {
    pub fn pending(
        user_id: &str,
        device_token: &str,
        payload: NotificationPayload,
        send_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            device_token: device_token.to_string(),
            payload,
            send_at,
            status: TaskStatus::Pending,
            created_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.send_at <= now
    }
}
