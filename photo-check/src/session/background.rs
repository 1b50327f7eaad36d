// Background scheduler - the daemon's best-effort prompt timers
//
// One object owns at most two named timer handles, one per slot. Arming always
// cancels first, so START_WORKOUT is idempotent. Nothing here survives a daemon
// restart; the foreground tick and the push queue cover that.

use crate::session::notify::{NotificationDebouncer, Notifier};
use crate::session::protocol::{DaemonNotification, SlotIndex};
use crate::session::sampler::PromptOffsets;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct ArmedTimer {
    due_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

pub struct BackgroundScheduler {
    timers: [Option<ArmedTimer>; 2],
    notifications: broadcast::Sender<DaemonNotification>,
    notifier: Arc<dyn Notifier>,
    debouncer: Arc<Mutex<NotificationDebouncer>>,
}

impl BackgroundScheduler {
    pub fn new(
        notifications: broadcast::Sender<DaemonNotification>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            timers: [None, None],
            notifications,
            notifier,
            debouncer: Arc::new(Mutex::new(NotificationDebouncer::new())),
        }
    }

    /// Cancel any armed timers, then arm one per slot at `start + offset`.
    ///
    /// Returns the due instants in slot order. A due instant already in the
    /// past fires right away.
    pub fn start_workout(
        &mut self,
        start: DateTime<Utc>,
        offsets: PromptOffsets,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        self.cancel_timers();

        SlotIndex::ALL
            .into_iter()
            .map(|slot| {
                let due_at = offsets.due_at(start, slot);
                let delay = (due_at - now).to_std().unwrap_or(Duration::ZERO);
                let handle = self.spawn_timer(slot, delay);
                debug!(%slot, %due_at, delay_secs = delay.as_secs(), "armed prompt timer");
                self.timers[slot.index()] = Some(ArmedTimer { due_at, handle });
                due_at
            })
            .collect()
    }

    /// Cancel all timers and clear state. Returns how many had not fired yet.
    pub fn stop_workout(&mut self) -> usize {
        let cancelled = self.cancel_timers();
        if let Ok(mut debouncer) = self.debouncer.lock() {
            debouncer.reset();
        }
        info!(cancelled, "workout timers cleared");
        cancelled
    }

    /// Pending (not yet fired) timers and their due instants
    pub fn armed(&self) -> Vec<(SlotIndex, DateTime<Utc>)> {
        SlotIndex::ALL
            .into_iter()
            .filter_map(|slot| {
                self.timers[slot.index()]
                    .as_ref()
                    .filter(|timer| !timer.handle.is_finished())
                    .map(|timer| (slot, timer.due_at))
            })
            .collect()
    }

    /// Broadcast a prompt request without a system notification (forwarded deep link)
    pub fn forward(&self, slot: SlotIndex) -> usize {
        self.notifications
            .send(DaemonNotification::PhotoRequested { slot_index: slot })
            .unwrap_or(0)
    }

    fn spawn_timer(&self, slot: SlotIndex, delay: Duration) -> JoinHandle<()> {
        let notifications = self.notifications.clone();
        let notifier = Arc::clone(&self.notifier);
        let debouncer = Arc::clone(&self.debouncer);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let alert = debouncer
                .lock()
                .map(|mut d| d.should_notify(slot))
                .unwrap_or(true);
            if alert {
                notifier.photo_due(slot);
            }

            // No subscribers is fine: the system notification already went out
            let receivers = notifications
                .send(DaemonNotification::PhotoRequested { slot_index: slot })
                .unwrap_or(0);
            info!(%slot, receivers, "prompt timer fired");
        })
    }

    fn cancel_timers(&mut self) -> usize {
        let mut cancelled = 0;
        for timer in self.timers.iter_mut().filter_map(Option::take) {
            if !timer.handle.is_finished() {
                cancelled += 1;
            }
            timer.handle.abort();
        }
        cancelled
    }
}

impl Drop for BackgroundScheduler {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<SlotIndex>>,
    }

    impl Notifier for RecordingNotifier {
        fn photo_due(&self, slot: SlotIndex) {
            self.alerts.lock().unwrap().push(slot);
        }
    }

    fn scheduler() -> (
        BackgroundScheduler,
        broadcast::Receiver<DaemonNotification>,
        Arc<RecordingNotifier>,
    ) {
        let (tx, rx) = broadcast::channel(16);
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = BackgroundScheduler::new(tx, notifier.clone());
        (scheduler, rx, notifier)
    }

    fn requested(slot: SlotIndex) -> DaemonNotification {
        DaemonNotification::PhotoRequested { slot_index: slot }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_each_slot_once_in_order() {
        let (mut scheduler, mut rx, notifier) = scheduler();
        let now = Utc::now();

        let due = scheduler.start_workout(now, PromptOffsets::new(60, 120).unwrap(), now);
        assert_eq!(due[0], now + chrono::Duration::seconds(60));
        assert_eq!(scheduler.armed().len(), 2);

        assert_eq!(rx.recv().await.unwrap(), requested(SlotIndex::First));
        assert_eq!(rx.recv().await.unwrap(), requested(SlotIndex::Second));
        assert_eq!(
            *notifier.alerts.lock().unwrap(),
            vec![SlotIndex::First, SlotIndex::Second]
        );

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(scheduler.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_existing_timers() {
        let (mut scheduler, mut rx, _notifier) = scheduler();
        let now = Utc::now();
        let offsets = PromptOffsets::new(60, 120).unwrap();

        scheduler.start_workout(now, offsets, now);
        scheduler.start_workout(now, offsets, now);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(rx.try_recv().unwrap(), requested(SlotIndex::First));
        assert_eq!(rx.try_recv().unwrap(), requested(SlotIndex::Second));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_timers() {
        let (mut scheduler, mut rx, notifier) = scheduler();
        let now = Utc::now();
        scheduler.start_workout(now, PromptOffsets::new(60, 120).unwrap(), now);

        assert_eq!(scheduler.stop_workout(), 2);
        assert!(scheduler.armed().is_empty());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(notifier.alerts.lock().unwrap().is_empty());

        // Stopping again is a no-op
        assert_eq!(scheduler.stop_workout(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn past_due_fires_immediately() {
        let (mut scheduler, mut rx, _notifier) = scheduler();
        let now = Utc::now();
        let start = now - chrono::Duration::seconds(90);

        scheduler.start_workout(start, PromptOffsets::new(60, 120).unwrap(), now);

        tokio::task::yield_now().await;
        assert_eq!(rx.recv().await.unwrap(), requested(SlotIndex::First));
        // Slot 2 is still 30s out
        assert_eq!(
            scheduler.armed(),
            vec![(SlotIndex::Second, start + chrono::Duration::seconds(120))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_aborts_timers() {
        let (mut scheduler, mut rx, _notifier) = scheduler();
        let now = Utc::now();
        scheduler.start_workout(now, PromptOffsets::new(60, 120).unwrap(), now);
        drop(scheduler);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn forward_broadcasts_without_alert() {
        let (scheduler, mut rx, notifier) = scheduler();
        assert_eq!(scheduler.forward(SlotIndex::Second), 1);
        assert_eq!(rx.recv().await.unwrap(), requested(SlotIndex::Second));
        assert!(notifier.alerts.lock().unwrap().is_empty());
    }
}
