// Workout photo verification: prompt scheduling across the foreground tick,
// the background daemon and the durable push queue.

// Session management module (shared between daemon, CLI and server)
pub mod session;

// Daemon binary discovery (used by the CLI to auto-start the daemon)
pub mod cli_paths;

// Durable notification tasks and the push dispatch worker
pub mod dispatch;
pub mod queue;

// Scheduling/dispatch HTTP server
pub mod server;

pub mod logging;
