pub mod commands;
pub mod controller;
pub mod state;
mod workers;

pub use commands::{Command, CommandReply};
pub use controller::{
    CancelOutcome, ControllerConfig, SessionController, DEFAULT_ACTIVITY_INTERVAL,
    SHUTDOWN_GRACE_SECS,
};
pub use state::{ActivityLog, LogEntry, LogLevel, Session, SessionState, TimerChoice};
