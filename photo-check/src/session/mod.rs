// Session management shared by the foreground, the daemon and the server

pub mod background;
pub mod config;
pub mod controller;
pub mod foreground;
pub mod notify;
pub mod persistence;
pub mod protocol;
pub mod sampler;

// Daemon client (Unix only for now)
#[cfg(unix)]
pub mod daemon_client;
