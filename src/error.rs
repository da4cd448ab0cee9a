use thiserror::Error;

/// Rejected commands. Reported to the caller; the session is left untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid timer choice '{0}' (expected never, 1h, 2h, 5h or 10h)")]
    InvalidTimerChoice(String),
    #[error("keep awake is already active")]
    AlreadyActive,
    #[error("keep awake is not currently active")]
    NotActive,
    #[error("no shutdown is pending")]
    NoShutdownPending,
    #[error("a shutdown is in progress; cancel it first")]
    ShutdownInProgress,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Failure of a single simulated input action. Fatal to the running session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("activity simulation failed: {0}")]
pub struct SimulationError(pub String);

impl SimulationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("shutdown command failed: {0}")]
    Execution(String),
    /// The platform cannot take back a shutdown request once issued.
    #[error("aborting a pending shutdown is not supported on this platform")]
    AbortUnsupported,
}

impl From<std::io::Error> for ShutdownError {
    fn from(err: std::io::Error) -> Self {
        ShutdownError::Execution(err.to_string())
    }
}
