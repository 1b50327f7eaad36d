// Session controller - foreground state machine for a workout session
//
// Owns the session lifecycle, the elapsed-time display and capture-prompt
// triggering. Elapsed time is always derived from `now - start_time`, so a
// tick after any suspension reconciles on its own.

use crate::session::config::WorkoutSettings;
use crate::session::protocol::SlotIndex;
use crate::session::sampler::{sample_offsets, PromptOffsets, SamplerError};
use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    Stopped,
    Submitting,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Start,
    Tick,
    Stop,
    Discard,
    Submit,
    PersistOk,
    PersistFailed,
    ResetTimeout,
    /// A restarted process picks up a session that was stopped but not submitted
    Restore,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{event:?} is not allowed while {from:?}")]
pub struct TransitionError {
    pub from: SessionStatus,
    pub event: SessionEvent,
}

/// The only place that decides which status changes are legal.
pub fn transition(from: SessionStatus, event: SessionEvent) -> Result<SessionStatus, TransitionError> {
    use SessionEvent as E;
    use SessionStatus as S;

    match (from, event) {
        (S::Idle, E::Start) => Ok(S::Running),
        (S::Running, E::Tick) => Ok(S::Running),
        (S::Running, E::Stop) => Ok(S::Stopped),
        (S::Stopped, E::Discard) => Ok(S::Idle),
        (S::Stopped, E::Submit) => Ok(S::Submitting),
        (S::Submitting, E::PersistOk) => Ok(S::Success),
        (S::Submitting, E::PersistFailed) => Ok(S::Stopped),
        (S::Success, E::ResetTimeout) => Ok(S::Idle),
        (S::Idle, E::Restore) => Ok(S::Stopped),
        _ => Err(TransitionError { from, event }),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StartError {
    #[error("a workout was already completed today")]
    AlreadyTrainedToday,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
}

/// A photo filling one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedPhoto {
    /// Reference to the captured image (file path or data URL)
    pub image: String,
    pub captured_at: DateTime<Utc>,
}

/// How a capture prompt was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureResult {
    Filled,
    /// Slot was filled earlier; the photo is dropped
    AlreadyFilled,
    /// Slot stays empty and will be offered again
    Cancelled,
    NotRunning,
}

/// The in-progress session. `start_time` and `offsets` never change once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSession {
    pub start_time: DateTime<Utc>,
    pub offsets: PromptOffsets,
    pub slots: [Option<CapturedPhoto>; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl WorkoutSession {
    pub fn new(start_time: DateTime<Utc>, offsets: PromptOffsets) -> Self {
        Self {
            start_time,
            offsets,
            slots: [None, None],
            stopped_at: None,
        }
    }

    pub fn is_filled(&self, slot: SlotIndex) -> bool {
        self.slots[slot.index()].is_some()
    }

    pub fn missing_slots(&self) -> Vec<SlotIndex> {
        SlotIndex::ALL
            .into_iter()
            .filter(|slot| !self.is_filled(*slot))
            .collect()
    }

    /// Elapsed time at `now`, or frozen at the stop instant
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let end = self.stopped_at.unwrap_or(now);
        (end - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }

    fn is_due(&self, slot: SlotIndex, now: DateTime<Utc>) -> bool {
        self.elapsed(now) >= self.offsets.get(slot)
    }
}

/// What the workout sink receives on submit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub photos: [CapturedPhoto; 2],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    TooShort { elapsed: Duration, minimum: Duration },
    Incomplete { missing: Vec<SlotIndex> },
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscardReason::TooShort { elapsed, minimum } => write!(
                f,
                "workout too short ({} of {} required), discarded",
                format_elapsed(*elapsed),
                format_elapsed(*minimum)
            ),
            DiscardReason::Incomplete { missing } => {
                let names: Vec<String> = missing.iter().map(|s| s.to_string()).collect();
                write!(
                    f,
                    "missing {}, workout discarded; start again",
                    names.join(" and ")
                )
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    ReadyToSubmit { elapsed: Duration },
    Discarded(DiscardReason),
}

/// Result of one tick (or visibility reconciliation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub elapsed: Duration,
    /// Slot whose prompt was opened by this tick
    pub prompt: Option<SlotIndex>,
    /// The success screen timed out and the controller is idle again
    pub reset_to_idle: bool,
}

/// True when `history` holds a completed workout on the local day of `now`
pub fn trained_on_same_day(history: &[DateTime<Utc>], now: DateTime<Utc>) -> bool {
    let today = now.with_timezone(&Local).date_naive();
    history
        .iter()
        .any(|done| done.with_timezone(&Local).date_naive() == today)
}

#[derive(Debug)]
pub struct SessionController {
    settings: WorkoutSettings,
    status: SessionStatus,
    session: Option<WorkoutSession>,
    open_prompt: Option<SlotIndex>,
    success_at: Option<DateTime<Utc>>,
}

impl SessionController {
    pub fn new(settings: WorkoutSettings) -> Self {
        Self {
            settings,
            status: SessionStatus::Idle,
            session: None,
            open_prompt: None,
            success_at: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session(&self) -> Option<&WorkoutSession> {
        self.session.as_ref()
    }

    pub fn open_prompt(&self) -> Option<SlotIndex> {
        self.open_prompt
    }

    pub fn settings(&self) -> &WorkoutSettings {
        &self.settings
    }

    fn apply(&mut self, event: SessionEvent) -> Result<(), TransitionError> {
        let next = transition(self.status, event)?;
        if next != self.status {
            debug!(from = ?self.status, to = ?next, ?event, "session transition");
        }
        self.status = next;
        Ok(())
    }

    /// Start a session at `now`, sampling fresh offsets.
    ///
    /// `history` holds the start instants of completed workouts.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        now: DateTime<Utc>,
        history: &[DateTime<Utc>],
        rng: &mut R,
    ) -> Result<&WorkoutSession, StartError> {
        // Legality first so a running session is never re-sampled
        transition(self.status, SessionEvent::Start)?;
        if trained_on_same_day(history, now) {
            return Err(StartError::AlreadyTrainedToday);
        }
        let offsets = sample_offsets(
            self.settings.workout_duration,
            &self.settings.windows,
            rng,
        )?;
        Ok(self.start_with_offsets(now, offsets)?)
    }

    pub fn start_with_offsets(
        &mut self,
        now: DateTime<Utc>,
        offsets: PromptOffsets,
    ) -> Result<&WorkoutSession, TransitionError> {
        let session = self.begin_running(WorkoutSession::new(now, offsets))?;
        info!(
            start_time = %now,
            first_offset = offsets.secs(SlotIndex::First),
            second_offset = offsets.secs(SlotIndex::Second),
            "workout started"
        );
        Ok(session)
    }

    /// Resume a persisted session and reconcile immediately.
    ///
    /// A session persisted after its stop comes back `stopped` with the
    /// elapsed time frozen, ready for retry or discard.
    pub fn resume(
        &mut self,
        session: WorkoutSession,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, TransitionError> {
        if let Some(stopped_at) = session.stopped_at {
            self.apply(SessionEvent::Restore)?;
            info!(start_time = %session.start_time, %stopped_at, "restoring stopped workout");
            self.open_prompt = None;
            self.success_at = None;
            self.session = Some(session);
            return Ok(self.tick(now));
        }
        info!(start_time = %session.start_time, "resuming workout");
        self.begin_running(session)?;
        Ok(self.tick(now))
    }

    fn begin_running(&mut self, session: WorkoutSession) -> Result<&WorkoutSession, TransitionError> {
        self.apply(SessionEvent::Start)?;
        self.open_prompt = None;
        self.success_at = None;
        Ok(self.session.insert(session))
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        match self.status {
            SessionStatus::Running | SessionStatus::Stopped | SessionStatus::Submitting => self
                .session
                .as_ref()
                .map(|s| s.elapsed(now))
                .unwrap_or_default(),
            SessionStatus::Idle | SessionStatus::Success => Duration::ZERO,
        }
    }

    /// One-second tick. Opens the earliest due, unfilled slot's prompt when none is open.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let mut outcome = TickOutcome {
            elapsed: self.elapsed(now),
            ..TickOutcome::default()
        };

        match self.status {
            SessionStatus::Running => {
                if self.apply(SessionEvent::Tick).is_err() {
                    return outcome;
                }
                if self.open_prompt.is_none() {
                    let due = self.session.as_ref().and_then(|session| {
                        SlotIndex::ALL
                            .into_iter()
                            .find(|slot| !session.is_filled(*slot) && session.is_due(*slot, now))
                    });
                    if let Some(slot) = due {
                        self.open_prompt = Some(slot);
                        outcome.prompt = Some(slot);
                        info!(%slot, elapsed = outcome.elapsed.as_secs(), "photo prompt due");
                    }
                }
            }
            SessionStatus::Success => {
                let timed_out = self.success_at.map_or(true, |at| {
                    (now - at).to_std().unwrap_or(Duration::ZERO) >= self.settings.success_reset
                });
                if timed_out && self.apply(SessionEvent::ResetTimeout).is_ok() {
                    self.success_at = None;
                    outcome.reset_to_idle = true;
                }
            }
            _ => {}
        }

        outcome
    }

    /// Visibility reconciliation: recompute everything from `now - start_time`
    pub fn on_visible(&mut self, now: DateTime<Utc>) -> TickOutcome {
        debug!("foreground visible, reconciling");
        self.tick(now)
    }

    /// Prompt request from another channel (background timer or push deep link).
    ///
    /// Gated exactly like a tick: running, slot unfilled, no prompt open, and
    /// the slot's own offset already elapsed.
    pub fn request_prompt(&mut self, slot: SlotIndex, now: DateTime<Utc>) -> Option<SlotIndex> {
        if self.status != SessionStatus::Running || self.open_prompt.is_some() {
            return None;
        }
        let session = self.session.as_ref()?;
        if session.is_filled(slot) {
            debug!(%slot, "ignoring prompt request for filled slot");
            return None;
        }
        if !session.is_due(slot, now) {
            debug!(%slot, "ignoring early prompt request");
            return None;
        }
        self.open_prompt = Some(slot);
        Some(slot)
    }

    /// Resolve a capture prompt. Each slot is written at most once.
    pub fn resolve_prompt(
        &mut self,
        slot: SlotIndex,
        outcome: CaptureOutcome,
        now: DateTime<Utc>,
    ) -> CaptureResult {
        if self.open_prompt == Some(slot) {
            self.open_prompt = None;
        }
        if self.status != SessionStatus::Running {
            return CaptureResult::NotRunning;
        }
        let Some(session) = self.session.as_mut() else {
            return CaptureResult::NotRunning;
        };

        match outcome {
            CaptureOutcome::Cancelled => CaptureResult::Cancelled,
            CaptureOutcome::Captured(_) if session.is_filled(slot) => {
                debug!(%slot, "slot already filled, dropping photo");
                CaptureResult::AlreadyFilled
            }
            CaptureOutcome::Captured(image) => {
                session.slots[slot.index()] = Some(CapturedPhoto {
                    image,
                    captured_at: now,
                });
                info!(%slot, "photo captured");
                CaptureResult::Filled
            }
        }
    }

    /// Stop the session. Discards it when too short or incomplete.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<StopOutcome, TransitionError> {
        self.apply(SessionEvent::Stop)?;
        self.open_prompt = None;

        let Some(session) = self.session.as_mut() else {
            self.apply(SessionEvent::Discard)?;
            return Ok(StopOutcome::Discarded(DiscardReason::Incomplete {
                missing: SlotIndex::ALL.to_vec(),
            }));
        };
        session.stopped_at = Some(now);
        let elapsed = session.elapsed(now);

        let reason = if elapsed < self.settings.minimum_duration {
            Some(DiscardReason::TooShort {
                elapsed,
                minimum: self.settings.minimum_duration,
            })
        } else {
            let missing = session.missing_slots();
            (!missing.is_empty()).then_some(DiscardReason::Incomplete { missing })
        };

        match reason {
            Some(reason) => {
                self.discard()?;
                info!(%reason, "workout discarded");
                Ok(StopOutcome::Discarded(reason))
            }
            None => Ok(StopOutcome::ReadyToSubmit { elapsed }),
        }
    }

    /// Drop a stopped session and return to idle
    pub fn discard(&mut self) -> Result<(), TransitionError> {
        self.apply(SessionEvent::Discard)?;
        self.session = None;
        Ok(())
    }

    pub fn begin_submit(&mut self) -> Result<Submission, TransitionError> {
        let submission = self.session.as_ref().and_then(|session| {
            let [Some(first), Some(second)] = session.slots.clone() else {
                return None;
            };
            Some(Submission {
                start_time: session.start_time,
                duration_secs: session
                    .elapsed(session.stopped_at.unwrap_or(session.start_time))
                    .as_secs(),
                photos: [first, second],
            })
        });
        // A stopped session always has both photos; anything else is an illegal submit
        let Some(submission) = submission else {
            return Err(TransitionError {
                from: self.status,
                event: SessionEvent::Submit,
            });
        };
        self.apply(SessionEvent::Submit)?;
        Ok(submission)
    }

    pub fn submit_succeeded(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.apply(SessionEvent::PersistOk)?;
        self.session = None;
        self.success_at = Some(now);
        info!("workout submitted");
        Ok(())
    }

    /// Back to stopped with both photos kept for a retry
    pub fn submit_failed(&mut self) -> Result<(), TransitionError> {
        self.apply(SessionEvent::PersistFailed)
    }
}

/// `HH:MM:SS`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
