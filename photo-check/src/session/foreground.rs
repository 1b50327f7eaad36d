// Foreground runtime - drives the session controller from a 1s tick, user
// input and daemon signals, and fans session start/stop out to the other channels.
//
// Every outbound channel is best effort: failures are logged and swallowed so
// the local tick keeps working on its own.

use crate::queue::scheduling::ScheduleRequest;
use crate::session::config::{ClientSettings, Config};
use crate::session::controller::{
    CaptureOutcome, CaptureResult, DiscardReason, SessionController, SessionStatus, StopOutcome,
    Submission, TickOutcome,
};
use crate::session::persistence::{ActiveSessionRecord, WorkoutLog};
use crate::session::protocol::SlotIndex;
use crate::session::sampler::PromptOffsets;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Arms and cancels the background context's prompt timers
#[async_trait]
pub trait BackgroundChannel: Send + Sync {
    async fn arm(&self, start_time: DateTime<Utc>, offsets: PromptOffsets) -> Result<()>;
    async fn disarm(&self) -> Result<()>;
}

/// Asks the server to enqueue the session's two push tasks
#[async_trait]
pub trait TaskScheduling: Send + Sync {
    async fn schedule(&self, request: &ScheduleRequest) -> Result<()>;
}

/// External collaborator receiving finished workouts
#[async_trait]
pub trait WorkoutSink: Send + Sync {
    async fn submit(&self, submission: &Submission) -> Result<()>;
    /// Start instants of completed workouts
    async fn history(&self) -> Result<Vec<DateTime<Utc>>>;
}

#[async_trait]
impl WorkoutSink for WorkoutLog {
    async fn submit(&self, submission: &Submission) -> Result<()> {
        self.append(submission)
    }

    async fn history(&self) -> Result<Vec<DateTime<Utc>>> {
        WorkoutLog::history(self)
    }
}

/// `POST {server}/api/schedule-notifications`
pub struct HttpTaskScheduler {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTaskScheduler {
    pub fn new(server_url: &str) -> Self {
        Self {
            endpoint: format!(
                "{}/api/schedule-notifications",
                server_url.trim_end_matches('/')
            ),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TaskScheduling for HttpTaskScheduler {
    async fn schedule(&self, request: &ScheduleRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(10))
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("scheduling failed ({status}): {body}");
        }
        Ok(())
    }
}

/// Inputs the runtime reacts to, besides its own tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForegroundInput {
    Start,
    /// Process became visible again (resumed after suspension)
    Visible,
    /// Background timer or forwarded push asked for a prompt
    PhotoRequested(SlotIndex),
    CaptureResolved {
        slot: SlotIndex,
        outcome: CaptureOutcome,
    },
    Stop,
    /// Retry a failed submission
    Retry,
    /// Abandon a stopped session
    Discard,
    Quit,
}

/// What the display should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Started { offsets: PromptOffsets },
    Resumed { start_time: DateTime<Utc> },
    Elapsed { elapsed: Duration, status: SessionStatus },
    PromptOpened(SlotIndex),
    Captured(SlotIndex),
    Notice(String),
    Discarded(DiscardReason),
    Submitted,
    SubmitFailed(String),
    Idle,
}

pub struct Foreground {
    controller: SessionController,
    client: ClientSettings,
    config: Config,
    background: Option<Arc<dyn BackgroundChannel>>,
    scheduler: Option<Arc<dyn TaskScheduling>>,
    sink: Arc<dyn WorkoutSink>,
    rng: StdRng,
}

impl Foreground {
    pub fn new(
        controller: SessionController,
        client: ClientSettings,
        config: Config,
        sink: Arc<dyn WorkoutSink>,
    ) -> Self {
        Self {
            controller,
            client,
            config,
            background: None,
            scheduler: None,
            sink,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_background(mut self, background: Arc<dyn BackgroundChannel>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduling>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Pick up a session persisted by an earlier foreground process
    pub async fn resume(&mut self, now: DateTime<Utc>) -> Vec<UiEvent> {
        let record = match ActiveSessionRecord::load(&self.config) {
            Ok(Some(record)) => record,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Ignoring unreadable active session: {:#}", e);
                return Vec::new();
            }
        };

        let session = record.session;
        let (start_time, offsets) = (session.start_time, session.offsets);
        let outcome = match self.controller.resume(session, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Cannot resume session: {}", e);
                return Vec::new();
            }
        };

        let status = self.controller.status();
        let mut events = vec![
            UiEvent::Resumed { start_time },
            UiEvent::Elapsed {
                elapsed: outcome.elapsed,
                status,
            },
        ];

        if status == SessionStatus::Stopped {
            // Stopped before the restart: only the submission is outstanding
            events.push(UiEvent::Notice(
                "workout was stopped but not submitted; `retry` or `discard`".to_string(),
            ));
            return events;
        }

        // The daemon may have been restarted with empty state
        self.arm_background(start_time, offsets).await;
        events.extend(outcome.prompt.map(UiEvent::PromptOpened));
        events
    }

    pub async fn handle(&mut self, input: ForegroundInput, now: DateTime<Utc>) -> Vec<UiEvent> {
        match input {
            ForegroundInput::Start => self.start(now).await,
            ForegroundInput::Visible => {
                let outcome = self.controller.on_visible(now);
                self.tick_events(outcome)
            }
            ForegroundInput::PhotoRequested(slot) => self
                .controller
                .request_prompt(slot, now)
                .map(UiEvent::PromptOpened)
                .into_iter()
                .collect(),
            ForegroundInput::CaptureResolved { slot, outcome } => {
                self.capture(slot, outcome, now)
            }
            ForegroundInput::Stop => self.stop(now).await,
            ForegroundInput::Retry => {
                if self.controller.status() == SessionStatus::Stopped {
                    self.submit(now).await
                } else {
                    vec![UiEvent::Notice("nothing to retry".to_string())]
                }
            }
            ForegroundInput::Discard => match self.controller.discard() {
                Ok(()) => {
                    self.clear_snapshot();
                    vec![UiEvent::Notice("workout discarded".to_string()), UiEvent::Idle]
                }
                Err(e) => vec![UiEvent::Notice(e.to_string())],
            },
            ForegroundInput::Quit => Vec::new(),
        }
    }

    /// One-second tick
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<UiEvent> {
        let outcome = self.controller.tick(now);
        self.tick_events(outcome)
    }

    fn tick_events(&self, outcome: TickOutcome) -> Vec<UiEvent> {
        let mut events = vec![UiEvent::Elapsed {
            elapsed: outcome.elapsed,
            status: self.controller.status(),
        }];
        events.extend(outcome.prompt.map(UiEvent::PromptOpened));
        if outcome.reset_to_idle {
            events.push(UiEvent::Idle);
        }
        events
    }

    async fn start(&mut self, now: DateTime<Utc>) -> Vec<UiEvent> {
        let history = match self.sink.history().await {
            Ok(history) => history,
            Err(e) => {
                warn!("Workout history unavailable: {:#}", e);
                Vec::new()
            }
        };

        let offsets = match self.controller.start(now, &history, &mut self.rng) {
            Ok(session) => session.offsets,
            Err(e) => return vec![UiEvent::Notice(e.to_string())],
        };

        self.save_snapshot(now);
        self.arm_background(now, offsets).await;
        self.schedule_push(now, offsets).await;

        vec![UiEvent::Started { offsets }]
    }

    fn capture(
        &mut self,
        slot: SlotIndex,
        outcome: CaptureOutcome,
        now: DateTime<Utc>,
    ) -> Vec<UiEvent> {
        match self.controller.resolve_prompt(slot, outcome, now) {
            CaptureResult::Filled => {
                self.save_snapshot(now);
                vec![UiEvent::Captured(slot)]
            }
            CaptureResult::AlreadyFilled => {
                vec![UiEvent::Notice(format!("{} already taken", slot))]
            }
            CaptureResult::Cancelled => {
                vec![UiEvent::Notice(format!("{} cancelled, it will be asked again", slot))]
            }
            CaptureResult::NotRunning => Vec::new(),
        }
    }

    async fn stop(&mut self, now: DateTime<Utc>) -> Vec<UiEvent> {
        let outcome = match self.controller.stop(now) {
            Ok(outcome) => outcome,
            Err(e) => return vec![UiEvent::Notice(e.to_string())],
        };

        // Durable push tasks are left alone; stale pushes are gated by the controller
        self.disarm_background().await;

        match outcome {
            StopOutcome::Discarded(reason) => {
                self.clear_snapshot();
                vec![UiEvent::Discarded(reason), UiEvent::Idle]
            }
            StopOutcome::ReadyToSubmit { .. } => {
                self.save_snapshot(now);
                self.submit(now).await
            }
        }
    }

    async fn submit(&mut self, now: DateTime<Utc>) -> Vec<UiEvent> {
        let submission = match self.controller.begin_submit() {
            Ok(submission) => submission,
            Err(e) => return vec![UiEvent::Notice(e.to_string())],
        };

        match self.sink.submit(&submission).await {
            Ok(()) => {
                if let Err(e) = self.controller.submit_succeeded(now) {
                    return vec![UiEvent::Notice(e.to_string())];
                }
                self.clear_snapshot();
                vec![UiEvent::Submitted]
            }
            Err(e) => {
                warn!("Submitting workout failed: {:#}", e);
                if let Err(e) = self.controller.submit_failed() {
                    return vec![UiEvent::Notice(e.to_string())];
                }
                vec![UiEvent::SubmitFailed(format!("{:#}", e))]
            }
        }
    }

    async fn arm_background(&self, start_time: DateTime<Utc>, offsets: PromptOffsets) {
        let Some(background) = &self.background else {
            debug!("background channel disabled");
            return;
        };
        if let Err(e) = background.arm(start_time, offsets).await {
            warn!("Background timers not armed: {:#}", e);
        }
    }

    async fn disarm_background(&self) {
        if let Some(background) = &self.background {
            if let Err(e) = background.disarm().await {
                warn!("Background timers not cancelled: {:#}", e);
            }
        }
    }

    async fn schedule_push(&self, start_time: DateTime<Utc>, offsets: PromptOffsets) {
        let (Some(scheduler), Some(device_token)) = (&self.scheduler, &self.client.device_token)
        else {
            debug!("push channel disabled (no server or no device token)");
            return;
        };

        let request = ScheduleRequest {
            user_id: self.client.user_id.clone(),
            device_token: device_token.clone(),
            start_time: Some(start_time),
            offsets: Some(offsets),
        };
        match scheduler.schedule(&request).await {
            Ok(()) => info!("push notifications scheduled"),
            Err(e) => warn!("Push notifications not scheduled: {:#}", e),
        }
    }

    fn save_snapshot(&self, now: DateTime<Utc>) {
        let Some(session) = self.controller.session() else {
            return;
        };
        if let Err(e) = ActiveSessionRecord::new(session.clone(), now).save(&self.config) {
            warn!("Failed to persist active session: {:#}", e);
        }
    }

    fn clear_snapshot(&self) {
        if let Err(e) = ActiveSessionRecord::clear(&self.config) {
            warn!("Failed to remove active session: {:#}", e);
        }
    }

    /// Drive the session until `Quit` or the input channel closes.
    pub async fn run(
        mut self,
        mut inputs: mpsc::Receiver<ForegroundInput>,
        ui: mpsc::Sender<UiEvent>,
    ) -> Result<()> {
        for event in self.resume(Utc::now()).await {
            if ui.send(event).await.is_err() {
                return Ok(());
            }
        }

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let events = tokio::select! {
                _ = ticker.tick() => self.tick(Utc::now()),
                input = inputs.recv() => match input {
                    Some(ForegroundInput::Quit) | None => break,
                    Some(input) => self.handle(input, Utc::now()).await,
                },
            };
            for event in events {
                if ui.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }

        debug!("foreground loop finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::config::WorkoutSettings;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingBackground {
        armed: Mutex<Vec<(DateTime<Utc>, PromptOffsets)>>,
        disarmed: Mutex<usize>,
        fail: bool,
    }

    #[async_trait]
    impl BackgroundChannel for RecordingBackground {
        async fn arm(&self, start_time: DateTime<Utc>, offsets: PromptOffsets) -> Result<()> {
            if self.fail {
                anyhow::bail!("daemon unavailable");
            }
            self.armed.lock().unwrap().push((start_time, offsets));
            Ok(())
        }

        async fn disarm(&self) -> Result<()> {
            *self.disarmed.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingScheduler {
        requests: Mutex<Vec<ScheduleRequest>>,
    }

    #[async_trait]
    impl TaskScheduling for RecordingScheduler {
        async fn schedule(&self, request: &ScheduleRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemorySink {
        submitted: Mutex<Vec<Submission>>,
        history: Vec<DateTime<Utc>>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl WorkoutSink for MemorySink {
        async fn submit(&self, submission: &Submission) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("network down");
            }
            self.submitted.lock().unwrap().push(submission.clone());
            Ok(())
        }

        async fn history(&self) -> Result<Vec<DateTime<Utc>>> {
            Ok(self.history.clone())
        }
    }

    struct Harness {
        foreground: Foreground,
        background: Arc<RecordingBackground>,
        scheduler: Arc<RecordingScheduler>,
        sink: Arc<MemorySink>,
        config: Config,
        _temp: TempDir,
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::minutes(minutes)
    }

    fn client(device_token: Option<&str>) -> ClientSettings {
        ClientSettings {
            user_id: "u1".to_string(),
            device_token: device_token.map(str::to_string),
            server_url: Some("http://localhost:8787".to_string()),
        }
    }

    fn harness_in(temp: TempDir, device_token: Option<&str>) -> Harness {
        let config = Config::in_dir(temp.path());
        let background = Arc::new(RecordingBackground::default());
        let scheduler = Arc::new(RecordingScheduler::default());
        let sink = Arc::new(MemorySink::default());
        let foreground = Foreground::new(
            SessionController::new(WorkoutSettings::default()),
            client(device_token),
            config.clone(),
            sink.clone(),
        )
        .with_background(background.clone())
        .with_scheduler(scheduler.clone())
        .with_rng(StdRng::seed_from_u64(3));
        Harness {
            foreground,
            background,
            scheduler,
            sink,
            config,
            _temp: temp,
        }
    }

    fn harness() -> Harness {
        harness_in(TempDir::new().unwrap(), Some("tok"))
    }

    fn offsets_of(events: &[UiEvent]) -> PromptOffsets {
        events
            .iter()
            .find_map(|e| match e {
                UiEvent::Started { offsets } => Some(*offsets),
                _ => None,
            })
            .expect("session started")
    }

    async fn capture(h: &mut Harness, slot: SlotIndex, minutes: i64) {
        let events = h
            .foreground
            .handle(
                ForegroundInput::CaptureResolved {
                    slot,
                    outcome: CaptureOutcome::Captured(format!("{}.jpg", slot.number())),
                },
                at(minutes),
            )
            .await;
        assert_eq!(events, vec![UiEvent::Captured(slot)]);
    }

    #[tokio::test]
    async fn start_fans_out_the_same_offsets_to_every_channel() {
        let mut h = harness();
        let events = h.foreground.handle(ForegroundInput::Start, t0()).await;
        let offsets = offsets_of(&events);

        assert_eq!(*h.background.armed.lock().unwrap(), vec![(t0(), offsets)]);

        let requests = h.scheduler.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_id, "u1");
        assert_eq!(requests[0].start_time, Some(t0()));
        assert_eq!(requests[0].offsets, Some(offsets));

        let record = ActiveSessionRecord::load(&h.config).unwrap().unwrap();
        assert_eq!(record.session.offsets, offsets);
    }

    #[tokio::test]
    async fn missing_device_token_skips_push_but_keeps_tick() {
        let mut h = harness_in(TempDir::new().unwrap(), None);
        let events = h.foreground.handle(ForegroundInput::Start, t0()).await;
        let offsets = offsets_of(&events);
        assert!(h.scheduler.requests.lock().unwrap().is_empty());

        let due = t0() + chrono::Duration::seconds(offsets.secs(SlotIndex::First) as i64);
        let events = h.foreground.tick(due);
        assert!(events.contains(&UiEvent::PromptOpened(SlotIndex::First)));
    }

    #[tokio::test]
    async fn failing_background_does_not_block_start() {
        let temp = TempDir::new().unwrap();
        let config = Config::in_dir(temp.path());
        let mut foreground = Foreground::new(
            SessionController::new(WorkoutSettings::default()),
            client(Some("tok")),
            config,
            Arc::new(MemorySink::default()),
        )
        .with_background(Arc::new(RecordingBackground {
            fail: true,
            ..Default::default()
        }));

        let events = foreground.handle(ForegroundInput::Start, t0()).await;
        assert!(matches!(events[0], UiEvent::Started { .. }));
        assert_eq!(foreground.controller().status(), SessionStatus::Running);
    }

    #[tokio::test]
    async fn stop_too_early_discards_and_disarms() {
        let mut h = harness();
        h.foreground.handle(ForegroundInput::Start, t0()).await;

        let events = h.foreground.handle(ForegroundInput::Stop, at(20)).await;
        assert!(matches!(
            events[0],
            UiEvent::Discarded(DiscardReason::TooShort { .. })
        ));
        assert_eq!(*h.background.disarmed.lock().unwrap(), 1);
        assert!(h.sink.submitted.lock().unwrap().is_empty());
        assert!(ActiveSessionRecord::load(&h.config).unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_submit_keeps_photos_and_retry_succeeds() {
        let mut h = harness();
        h.foreground.handle(ForegroundInput::Start, t0()).await;
        h.foreground.tick(at(35));
        capture(&mut h, SlotIndex::First, 35).await;
        h.foreground.tick(at(36));
        capture(&mut h, SlotIndex::Second, 36).await;

        h.sink.failing.store(true, Ordering::SeqCst);
        let events = h.foreground.handle(ForegroundInput::Stop, at(41)).await;
        assert!(matches!(events[0], UiEvent::SubmitFailed(_)));
        assert_eq!(h.foreground.controller().status(), SessionStatus::Stopped);

        h.sink.failing.store(false, Ordering::SeqCst);
        let events = h.foreground.handle(ForegroundInput::Retry, at(42)).await;
        assert_eq!(events, vec![UiEvent::Submitted]);

        let submitted = h.sink.submitted.lock().unwrap().clone();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].duration_secs, 41 * 60);
        assert_eq!(submitted[0].photos[0].image, "1.jpg");
        assert!(ActiveSessionRecord::load(&h.config).unwrap().is_none());
    }

    #[tokio::test]
    async fn already_trained_today_refuses_start() {
        let temp = TempDir::new().unwrap();
        let config = Config::in_dir(temp.path());
        let sink = Arc::new(MemorySink {
            history: vec![t0()],
            ..Default::default()
        });
        let mut foreground = Foreground::new(
            SessionController::new(WorkoutSettings::default()),
            client(Some("tok")),
            config,
            sink,
        );

        let events = foreground.handle(ForegroundInput::Start, t0()).await;
        assert!(matches!(events[0], UiEvent::Notice(_)));
        assert_eq!(foreground.controller().status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn restarted_foreground_resumes_and_rearms() {
        let mut first = harness();
        first.foreground.handle(ForegroundInput::Start, t0()).await;
        let temp = first._temp;

        // New process, same state dir, well past the first offset
        let mut second = harness_in(temp, Some("tok"));
        let events = second.foreground.resume(at(32)).await;

        assert_eq!(events[0], UiEvent::Resumed { start_time: t0() });
        assert!(events.contains(&UiEvent::PromptOpened(SlotIndex::First)));
        assert_eq!(second.background.armed.lock().unwrap().len(), 1);
        // Push tasks are durable; resume does not enqueue again
        assert!(second.scheduler.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn restarted_foreground_keeps_failed_submission_stopped() {
        let mut first = harness();
        first.foreground.handle(ForegroundInput::Start, t0()).await;
        first.foreground.tick(at(35));
        capture(&mut first, SlotIndex::First, 35).await;
        first.foreground.tick(at(36));
        capture(&mut first, SlotIndex::Second, 36).await;
        first.sink.failing.store(true, Ordering::SeqCst);
        let events = first.foreground.handle(ForegroundInput::Stop, at(41)).await;
        assert!(matches!(events[0], UiEvent::SubmitFailed(_)));
        let temp = first._temp;

        let mut second = harness_in(temp, Some("tok"));
        let events = second.foreground.resume(at(90)).await;
        assert_eq!(events[0], UiEvent::Resumed { start_time: t0() });
        assert_eq!(
            events[1],
            UiEvent::Elapsed {
                elapsed: Duration::from_secs(41 * 60),
                status: SessionStatus::Stopped,
            }
        );
        assert!(matches!(events[2], UiEvent::Notice(_)));
        assert_eq!(second.foreground.controller().status(), SessionStatus::Stopped);
        assert!(second.background.armed.lock().unwrap().is_empty());

        // The clock stays frozen and retry submits the stopped duration
        let events = second.foreground.tick(at(95));
        assert_eq!(
            events,
            vec![UiEvent::Elapsed {
                elapsed: Duration::from_secs(41 * 60),
                status: SessionStatus::Stopped,
            }]
        );
        let events = second.foreground.handle(ForegroundInput::Retry, at(95)).await;
        assert_eq!(events, vec![UiEvent::Submitted]);
        let submitted = second.sink.submitted.lock().unwrap().clone();
        assert_eq!(submitted[0].duration_secs, 41 * 60);
    }

    #[tokio::test]
    async fn daemon_signal_is_gated_by_controller() {
        let mut h = harness();
        let offsets = offsets_of(&h.foreground.handle(ForegroundInput::Start, t0()).await);

        let early = h
            .foreground
            .handle(ForegroundInput::PhotoRequested(SlotIndex::First), at(1))
            .await;
        assert!(early.is_empty());

        let due = t0() + chrono::Duration::seconds(offsets.secs(SlotIndex::First) as i64);
        let events = h
            .foreground
            .handle(ForegroundInput::PhotoRequested(SlotIndex::First), due)
            .await;
        assert_eq!(events, vec![UiEvent::PromptOpened(SlotIndex::First)]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_reports_start_and_exits_on_quit() {
        let h = harness();
        let (input_tx, input_rx) = mpsc::channel(8);
        let (ui_tx, mut ui_rx) = mpsc::channel(64);
        let handle = tokio::spawn(h.foreground.run(input_rx, ui_tx));

        input_tx.send(ForegroundInput::Start).await.unwrap();
        let mut started = false;
        while let Some(event) = ui_rx.recv().await {
            if matches!(event, UiEvent::Started { .. }) {
                started = true;
                break;
            }
        }
        assert!(started);

        // Either the quit or the closed display ends the loop
        drop(ui_rx);
        let _ = input_tx.send(ForegroundInput::Quit).await;
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn http_scheduler_posts_request() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/schedule-notifications"))
            .and(body_partial_json(serde_json::json!({
                "userId": "u1",
                "deviceToken": "tok",
                "offsets": [840, 1800]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .expect(1)
            .mount(&server)
            .await;

        let scheduler = HttpTaskScheduler::new(&format!("{}/", server.uri()));
        scheduler
            .schedule(&ScheduleRequest {
                user_id: "u1".to_string(),
                device_token: "tok".to_string(),
                start_time: Some(t0()),
                offsets: Some(PromptOffsets::new(840, 1800).unwrap()),
            })
            .await
            .unwrap();
    }
}
