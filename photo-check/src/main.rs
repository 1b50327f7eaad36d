// photo-check: foreground CLI for workout photo verification
//
// `photo-check run` drives one workout interactively: a one-second elapsed
// display, capture prompts when a slot becomes due, and submission on stop.
// The remaining commands talk to the daemon or run a dispatch pass.

use anyhow::{anyhow, Context, Result};
use chrono::{Local, Utc};
use photo_check_lib::{
    dispatch::{gateway_from_settings, DispatchWorker},
    logging,
    queue::{JsonTaskStore, TaskStore},
    session::{
        config::{notifications_enabled, ClientSettings, Config, ServerSettings, WorkoutSettings},
        controller::{format_elapsed, CaptureOutcome, SessionController, SessionStatus},
        daemon_client::{send_request, subscribe, DaemonChannel},
        foreground::{Foreground, ForegroundInput, HttpTaskScheduler, UiEvent, WorkoutSink},
        notify::{emit_terminal_notifications, prompt_message, NOTIFICATION_TITLE},
        persistence::{ActiveSessionRecord, WorkoutLog},
        protocol::{DaemonRequest, DaemonResponse, SlotIndex},
    },
};
#[cfg(unix)]
use signal_hook::{
    consts::signal::SIGCONT,
    iterator::{Handle as SignalHandle, Signals},
};
use std::{
    env,
    io::{self, BufRead, Write},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const SUBSCRIBE_RETRY: Duration = Duration::from_secs(2);

fn print_help() {
    println!("photo-check - randomised photo checks during a workout");
    println!();
    println!("USAGE:");
    println!("    photo-check <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    run                 Start the interactive workout display");
    println!("    status              Show the workout in progress, if any");
    println!("    open <link>         Forward a push deep link to the running display");
    println!("    ping                Check whether the daemon is alive");
    println!("    stop-daemon         Ask the daemon to shut down");
    println!("    dispatch            Send due push notifications once");
    println!("    help                Show this help");
    println!();
    println!("INTERACTIVE COMMANDS (inside `run`):");
    println!("    start               Begin a workout");
    println!("    capture <image>     Answer the open photo prompt");
    println!("    cancel              Dismiss the open photo prompt");
    println!("    stop                Finish the workout and submit it");
    println!("    retry               Retry a failed submission");
    println!("    discard             Abandon a stopped workout");
    println!("    quit                Leave the display (the workout keeps running)");
    println!();
    println!("ENVIRONMENT:");
    println!("    PHOTO_CHECK_DIR             Runtime and state directory");
    println!("    PHOTO_CHECK_SERVER_URL      Scheduling server for push prompts");
    println!("    PHOTO_CHECK_DEVICE_TOKEN    Push device token");
    println!("    PHOTO_CHECK_NOTIFICATIONS   `off` disables daemon alerts");
}

fn main() -> Result<()> {
    logging::init("warn");

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let config = Config::from_env();

    match args[1].as_str() {
        "run" => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(run_foreground(config))
        }
        "status" => show_status(&config),
        "open" => {
            let link = args
                .get(2)
                .ok_or_else(|| anyhow!("Usage: photo-check open <link>"))?;
            match send_request(
                &config,
                DaemonRequest::OpenLink { link: link.clone() },
                false,
            )? {
                DaemonResponse::LinkForwarded { slot_index } => {
                    println!("Forwarded {} request", slot_index);
                    Ok(())
                }
                other => Err(unexpected(other)),
            }
        }
        "ping" => match send_request(&config, DaemonRequest::Ping, false)? {
            DaemonResponse::Pong => {
                println!("Daemon is running (PID: {:?})", config.read_pid());
                Ok(())
            }
            other => Err(unexpected(other)),
        },
        "stop-daemon" => match send_request(&config, DaemonRequest::Shutdown, false)? {
            DaemonResponse::ShuttingDown => {
                println!("Daemon shutting down");
                Ok(())
            }
            other => Err(unexpected(other)),
        },
        "dispatch" => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(dispatch_once(&config))
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    }
}

fn unexpected(response: DaemonResponse) -> anyhow::Error {
    match response {
        DaemonResponse::Error { code, message } => anyhow!("Daemon error ({:?}): {}", code, message),
        other => anyhow!("Unexpected daemon response: {:?}", other),
    }
}

fn show_status(config: &Config) -> Result<()> {
    let Some(record) = ActiveSessionRecord::load(config)? else {
        println!("No workout in progress");
        return Ok(());
    };
    let session = record.session;
    println!(
        "Started:  {}",
        session.start_time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    println!("Elapsed:  {}", format_elapsed(session.elapsed(Utc::now())));
    for slot in SlotIndex::ALL {
        let state = if session.is_filled(slot) { "taken" } else { "pending" };
        println!("{}:  {}", slot, state);
    }
    Ok(())
}

async fn dispatch_once(config: &Config) -> Result<()> {
    let settings = ServerSettings::from_env();
    let store: Arc<dyn TaskStore> = Arc::new(
        JsonTaskStore::open(config.tasks_file()).context("Failed to open task store")?,
    );
    let worker = DispatchWorker::new(store, gateway_from_settings(&settings));
    let report = worker.run_pass(Utc::now()).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

async fn run_foreground(config: Config) -> Result<()> {
    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    let client = ClientSettings::from_env();
    let sink: Arc<dyn WorkoutSink> = Arc::new(WorkoutLog::new(&config));
    let mut foreground = Foreground::new(
        SessionController::new(WorkoutSettings::from_env()),
        client.clone(),
        config.clone(),
        sink,
    );

    let notifications = notifications_enabled();
    if notifications {
        foreground = foreground.with_background(Arc::new(DaemonChannel::new(config.clone())));
    }
    if let Some(url) = client.server_url.as_deref() {
        foreground = foreground.with_scheduler(Arc::new(HttpTaskScheduler::new(url)));
    }

    let (inputs_tx, inputs_rx) = mpsc::channel(32);
    let (ui_tx, mut ui_rx) = mpsc::channel(64);
    let open_prompt = Arc::new(Mutex::new(None::<SlotIndex>));

    spawn_stdin_reader(inputs_tx.clone(), Arc::clone(&open_prompt));
    let watcher = ResumeWatcher::start(inputs_tx.clone())?;
    if notifications {
        tokio::spawn(forward_daemon_prompts(config, inputs_tx.clone()));
    }
    drop(inputs_tx);

    println!("Type `start` to begin a workout, `help` for commands.");
    let runner = tokio::spawn(foreground.run(inputs_rx, ui_tx));
    while let Some(event) = ui_rx.recv().await {
        render(&event, &open_prompt);
    }
    println!();

    watcher.stop();
    runner.await.context("Foreground task failed")?
}

/// Keep a daemon subscription open, reconnecting while the display runs
async fn forward_daemon_prompts(config: Config, inputs: mpsc::Sender<ForegroundInput>) {
    let (slot_tx, mut slot_rx) = mpsc::channel(4);
    let forward = tokio::spawn(async move {
        while let Some(slot) = slot_rx.recv().await {
            if inputs
                .send(ForegroundInput::PhotoRequested(slot))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    while !forward.is_finished() {
        if let Err(e) = subscribe(&config, slot_tx.clone()).await {
            debug!("Daemon subscription unavailable: {:#}", e);
        }
        tokio::time::sleep(SUBSCRIBE_RETRY).await;
    }
}

fn spawn_stdin_reader(
    inputs: mpsc::Sender<ForegroundInput>,
    open_prompt: Arc<Mutex<Option<SlotIndex>>>,
) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let open = open_prompt.lock().map(|slot| *slot).unwrap_or(None);
            let input = match parse_input(&line, open) {
                Ok(Some(input)) => input,
                Ok(None) => continue,
                Err(message) => {
                    println!("{}", message);
                    continue;
                }
            };
            if matches!(input, ForegroundInput::CaptureResolved { .. }) {
                if let Ok(mut slot) = open_prompt.lock() {
                    *slot = None;
                }
            }
            let quit = input == ForegroundInput::Quit;
            if inputs.blocking_send(input).is_err() || quit {
                return;
            }
        }
        let _ = inputs.blocking_send(ForegroundInput::Quit);
    });
}

/// Map one line of interactive input. `Ok(None)` means nothing to do.
fn parse_input(line: &str, open: Option<SlotIndex>) -> Result<Option<ForegroundInput>, String> {
    let line = line.trim();
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));

    let input = match command {
        "" => return Ok(None),
        "start" => ForegroundInput::Start,
        "stop" => ForegroundInput::Stop,
        "retry" => ForegroundInput::Retry,
        "discard" => ForegroundInput::Discard,
        "quit" | "exit" => ForegroundInput::Quit,
        "capture" | "cancel" => {
            let slot = open.ok_or_else(|| "No photo prompt is open".to_string())?;
            let outcome = if command == "cancel" {
                CaptureOutcome::Cancelled
            } else if rest.is_empty() {
                return Err("Usage: capture <image>".to_string());
            } else {
                CaptureOutcome::Captured(rest.to_string())
            };
            ForegroundInput::CaptureResolved { slot, outcome }
        }
        "help" => {
            print_help();
            return Ok(None);
        }
        other => return Err(format!("Unknown command: {} (try `help`)", other)),
    };
    Ok(Some(input))
}

/// True when `event` means no capture prompt can still be open
fn ends_prompt(event: &UiEvent) -> bool {
    match event {
        UiEvent::Discarded(_) | UiEvent::Idle | UiEvent::Submitted | UiEvent::SubmitFailed(_) => {
            true
        }
        UiEvent::Elapsed { status, .. } => *status != SessionStatus::Running,
        _ => false,
    }
}

fn render(event: &UiEvent, open_prompt: &Mutex<Option<SlotIndex>>) {
    if ends_prompt(event) {
        if let Ok(mut open) = open_prompt.lock() {
            *open = None;
        }
    }

    let mut stdout = io::stdout();
    match event {
        UiEvent::Elapsed { elapsed, status } => {
            if *status == SessionStatus::Running {
                let _ = write!(stdout, "\r{}  ", format_elapsed(*elapsed));
                let _ = stdout.flush();
            }
        }
        UiEvent::Started { offsets } => {
            debug!(offsets = ?offsets.as_secs(), "workout started");
            println!("\nWorkout started. Two photo checks will be requested at random times.");
        }
        UiEvent::Resumed { start_time } => {
            println!(
                "\nResumed workout started at {}",
                start_time.with_timezone(&Local).format("%H:%M:%S")
            );
        }
        UiEvent::PromptOpened(slot) => {
            if let Ok(mut open) = open_prompt.lock() {
                *open = Some(*slot);
            }
            println!("\n{}: type `capture <image>` or `cancel`", prompt_message(*slot));
            emit_terminal_notifications(NOTIFICATION_TITLE, &prompt_message(*slot));
        }
        UiEvent::Captured(slot) => println!("\n{} saved", slot),
        UiEvent::Notice(message) => println!("\n{}", message),
        UiEvent::Discarded(reason) => println!("\nWorkout discarded: {}", reason),
        UiEvent::Submitted => println!("\nWorkout submitted. Well done!"),
        UiEvent::SubmitFailed(error) => {
            warn!("Submission failed: {}", error);
            println!("\nSubmission failed: {} (type `retry` or `discard`)", error);
        }
        UiEvent::Idle => println!("\nReady. Type `start` to begin a workout."),
    }
}

/// Turns SIGCONT (resumed after suspension) into a visibility input
#[cfg(unix)]
struct ResumeWatcher {
    signal_handle: SignalHandle,
    thread: thread::JoinHandle<()>,
}

#[cfg(unix)]
impl ResumeWatcher {
    fn start(inputs: mpsc::Sender<ForegroundInput>) -> Result<Self> {
        let mut signals = Signals::new([SIGCONT]).context("Failed to watch SIGCONT")?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            for _ in signals.forever() {
                if inputs.blocking_send(ForegroundInput::Visible).is_err() {
                    break;
                }
            }
        });
        Ok(Self {
            signal_handle: handle,
            thread,
        })
    }

    fn stop(self) {
        self.signal_handle.close();
        let _ = self.thread.join();
    }
}

#[cfg(not(unix))]
struct ResumeWatcher;

#[cfg(not(unix))]
impl ResumeWatcher {
    fn start(_inputs: mpsc::Sender<ForegroundInput>) -> Result<Self> {
        Ok(Self)
    }

    fn stop(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lifecycle_commands() {
        assert_eq!(parse_input("start", None), Ok(Some(ForegroundInput::Start)));
        assert_eq!(parse_input("  stop ", None), Ok(Some(ForegroundInput::Stop)));
        assert_eq!(parse_input("retry", None), Ok(Some(ForegroundInput::Retry)));
        assert_eq!(parse_input("discard", None), Ok(Some(ForegroundInput::Discard)));
        assert_eq!(parse_input("exit", None), Ok(Some(ForegroundInput::Quit)));
        assert_eq!(parse_input("", None), Ok(None));
    }

    #[test]
    fn capture_targets_the_open_prompt() {
        assert_eq!(
            parse_input("capture /tmp/selfie.jpg", Some(SlotIndex::Second)),
            Ok(Some(ForegroundInput::CaptureResolved {
                slot: SlotIndex::Second,
                outcome: CaptureOutcome::Captured("/tmp/selfie.jpg".to_string()),
            }))
        );
        assert_eq!(
            parse_input("cancel", Some(SlotIndex::First)),
            Ok(Some(ForegroundInput::CaptureResolved {
                slot: SlotIndex::First,
                outcome: CaptureOutcome::Cancelled,
            }))
        );
    }

    #[test]
    fn capture_without_prompt_or_image_is_rejected() {
        assert!(parse_input("capture photo.jpg", None).is_err());
        assert!(parse_input("capture", Some(SlotIndex::First)).is_err());
        assert!(parse_input("jump", None).is_err());
    }

    #[test]
    fn finished_session_closes_the_prompt_mirror() {
        use photo_check_lib::session::controller::DiscardReason;

        let ending = [
            UiEvent::Discarded(DiscardReason::Incomplete {
                missing: vec![SlotIndex::Second],
            }),
            UiEvent::Idle,
            UiEvent::Submitted,
            UiEvent::SubmitFailed("network down".to_string()),
            UiEvent::Elapsed {
                elapsed: std::time::Duration::from_secs(60),
                status: SessionStatus::Stopped,
            },
        ];
        for event in ending {
            let open_prompt = Mutex::new(Some(SlotIndex::Second));
            render(&event, &open_prompt);
            assert_eq!(*open_prompt.lock().unwrap(), None, "{:?} left the prompt open", event);
        }

        let open_prompt = Mutex::new(Some(SlotIndex::First));
        render(
            &UiEvent::Elapsed {
                elapsed: std::time::Duration::from_secs(60),
                status: SessionStatus::Running,
            },
            &open_prompt,
        );
        assert_eq!(*open_prompt.lock().unwrap(), Some(SlotIndex::First));
    }
}
