// Background channel protocol - shared structs for foreground <-> daemon communication
// Uses framed JSON messages over Unix sockets

use crate::session::sampler::PromptOffsets;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol version, bumped on incompatible message changes
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted request frame (1MB)
pub const MAX_REQUEST_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum accepted response frame (1MB)
pub const MAX_RESPONSE_FRAME_SIZE: usize = 1024 * 1024;

/// Scheme used for prompt deep links carried by push notifications
pub const DEEP_LINK_PREFIX: &str = "photocheck://dashboard?photo_prompt=";

/// One of the two photo verification checkpoints of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SlotIndex {
    First,
    Second,
}

impl SlotIndex {
    pub const ALL: [SlotIndex; 2] = [SlotIndex::First, SlotIndex::Second];

    pub fn index(self) -> usize {
        match self {
            SlotIndex::First => 0,
            SlotIndex::Second => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(SlotIndex::First),
            1 => Some(SlotIndex::Second),
            _ => None,
        }
    }

    /// Human-facing 1-based number ("photo 1", "photo 2")
    pub fn number(self) -> usize {
        self.index() + 1
    }

    /// Deep link that reopens the foreground on this slot's prompt
    pub fn deep_link(self) -> String {
        format!("{}{}", DEEP_LINK_PREFIX, self.number())
    }
}

impl TryFrom<u8> for SlotIndex {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SlotIndex::from_index(value as usize).ok_or_else(|| format!("Invalid slot index: {}", value))
    }
}

impl From<SlotIndex> for u8 {
    fn from(slot: SlotIndex) -> Self {
        slot.index() as u8
    }
}

impl std::fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "photo {}", self.number())
    }
}

/// Extract the target slot from a prompt deep link
pub fn parse_prompt_link(link: &str) -> Option<SlotIndex> {
    let number: usize = link.trim().strip_prefix(DEEP_LINK_PREFIX)?.parse().ok()?;
    number.checked_sub(1).and_then(SlotIndex::from_index)
}

// ============================================================================
// Foreground -> Daemon requests
// ============================================================================

/// Request message from the foreground to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Must be the first message on every connection
    Handshake { client_version: u32 },
    /// (Re-)arm both prompt timers for a session
    StartWorkout {
        /// Absolute session start
        start_time: DateTime<Utc>,
        /// Stored offsets of the session, never re-sampled by the daemon
        offsets: PromptOffsets,
    },
    /// Cancel all armed timers
    StopWorkout,
    /// Forward a push deep link to every subscribed foreground
    OpenLink { link: String },
    /// Ping to check if daemon is alive
    Ping,
    /// Request daemon to shut down gracefully
    Shutdown,
}

// ============================================================================
// Daemon -> Foreground responses
// ============================================================================

/// Structured error codes returned by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonErrorCode {
    VersionMismatch,
    InvalidRequest,
    DaemonUnavailable,
    Timeout,
    Internal,
}

/// Response message from daemon to the foreground
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonResponse {
    Handshake { protocol_version: u32 },
    /// Timers armed; due instants in slot order
    WorkoutArmed { due_at: Vec<DateTime<Utc>> },
    /// Timers cancelled
    WorkoutStopped { cancelled: usize },
    /// Deep link accepted and broadcast
    LinkForwarded { slot_index: SlotIndex },
    Pong,
    ShuttingDown,
    Error {
        code: DaemonErrorCode,
        message: String,
    },
}

// ============================================================================
// Daemon -> Foreground push signals (broadcast)
// ============================================================================

/// Signal from daemon to subscribed foregrounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonNotification {
    /// A slot's prompt became due (timer fire or forwarded deep link)
    PhotoRequested { slot_index: SlotIndex },
}

// ============================================================================
// Helpers for message framing
// ============================================================================

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(
    bytes: &[u8],
) -> Result<T, serde_json::Error> {
    let trimmed = if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    };
    serde_json::from_slice(trimmed)
}
