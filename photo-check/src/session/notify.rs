//! System notifications and sound alerts for due photo prompts.
//!
//! The daemon raises a desktop notification (plus a short sound) when a prompt
//! timer fires; the foreground emits terminal escape codes when it opens a
//! prompt, so either context can get the user's attention.

use std::io::{self, Write};
use std::process::Command;
use std::time::{Duration, Instant};

use crate::session::protocol::SlotIndex;

/// Minimum time between notifications for the same slot
const DEBOUNCE_DURATION: Duration = Duration::from_secs(5);

pub const NOTIFICATION_TITLE: &str = "Workout check";

/// Body shown for a due prompt
pub fn prompt_message(slot: SlotIndex) -> String {
    format!("Time for {}! Open the app to take your verification photo.", slot)
}

/// Raises user-visible alerts for due prompts
pub trait Notifier: Send + Sync {
    fn photo_due(&self, slot: SlotIndex);
}

/// Desktop notification plus sound, spawned detached
#[derive(Debug, Default)]
pub struct SystemNotifier;

impl Notifier for SystemNotifier {
    fn photo_due(&self, slot: SlotIndex) {
        let message = prompt_message(slot);
        show_desktop_notification(NOTIFICATION_TITLE, &message);
        play_prompt_sound();
    }
}

/// Used when notification permission is denied
#[derive(Debug, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn photo_due(&self, slot: SlotIndex) {
        tracing::debug!(%slot, "notifications disabled, not alerting");
    }
}

/// Tracks the last notification time per slot for debouncing
#[derive(Debug, Default)]
pub struct NotificationDebouncer {
    last_notify: [Option<Instant>; 2],
}

impl NotificationDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if enough time has passed since the last notification for `slot`
    pub fn should_notify(&mut self, slot: SlotIndex) -> bool {
        let now = Instant::now();
        match self.last_notify[slot.index()] {
            Some(last) if now.duration_since(last) < DEBOUNCE_DURATION => false,
            _ => {
                self.last_notify[slot.index()] = Some(now);
                true
            }
        }
    }

    /// Resets the debouncer (e.g., when the workout stops)
    pub fn reset(&mut self) {
        self.last_notify = [None, None];
    }
}

/// Emits terminal notification escape codes to stdout.
///
/// Writes several sequences to cover common terminal emulators:
/// - BEL (`\x07`) - Universal terminal bell
/// - OSC 9 (iTerm2) - Desktop notification
/// - OSC 777 (Konsole/VTE/Gnome Terminal) - Desktop notification
/// - OSC 99 (kitty) - Desktop notification
pub fn emit_terminal_notifications(title: &str, message: &str) {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(terminal_sequences(title, message).as_bytes());
    let _ = stdout.flush();
}

fn terminal_sequences(title: &str, message: &str) -> String {
    let title = escape_osc(title);
    let message = escape_osc(message);
    let mut out = String::from("\x07");
    // OSC 9: ESC ] 9 ; message BEL
    out.push_str(&format!("\x1b]9;{}\x07", message));
    // OSC 777: ESC ] 777 ; notify ; title ; message BEL
    out.push_str(&format!("\x1b]777;notify;{};{}\x07", title, message));
    // OSC 99: i=1 unique id, d=0 no sound, p=title/body payload
    out.push_str(&format!(
        "\x1b]99;i=1:d=0:p=title;{}\x1b\\\x1b]99;i=1:d=0:p=body;{}\x1b\\",
        title, message
    ));
    out
}

/// Escapes special characters for OSC sequences
fn escape_osc(s: &str) -> String {
    // OSC sequences are terminated by BEL or ST
    s.replace('\x07', "")
        .replace('\x1b', "")
        .replace('\n', " ")
        .replace('\r', "")
}

fn show_desktop_notification(title: &str, message: &str) {
    #[cfg(target_os = "macos")]
    {
        let script = format!(
            "display notification {:?} with title {:?}",
            message, title
        );
        if let Err(e) = Command::new("osascript").arg("-e").arg(script).spawn() {
            tracing::warn!("Failed to spawn osascript: {}", e);
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Err(e) = Command::new("notify-send")
            .arg("--app-name=photo-check")
            .arg(title)
            .arg(message)
            .spawn()
        {
            tracing::warn!("Failed to spawn notify-send: {}", e);
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        let _ = (title, message);
    }
}

/// Plays a short system sound, detached and ignoring errors
fn play_prompt_sound() {
    #[cfg(target_os = "macos")]
    {
        let _ = Command::new("afplay")
            .arg("/System/Library/Sounds/Glass.aiff")
            .arg("-v")
            .arg("0.5")
            .spawn();
    }

    #[cfg(target_os = "linux")]
    {
        let sound_file = [
            "/usr/share/sounds/freedesktop/stereo/message-new-instant.oga",
            "/usr/share/sounds/gnome/default/alerts/drip.ogg",
        ]
        .into_iter()
        .find(|path| std::path::Path::new(path).exists());

        if let Some(path) = sound_file {
            // paplay (PulseAudio) first, then aplay (ALSA)
            if Command::new("paplay").arg(path).spawn().is_err() {
                let _ = Command::new("aplay").arg("-q").arg(path).spawn();
            }
        }
    }
}
