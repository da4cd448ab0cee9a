use std::{collections::VecDeque, fmt, str::FromStr};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    /// Active with a shutdown countdown running.
    Armed,
    ShuttingDown,
}

impl SessionState {
    /// `Active` or `Active+Armed`.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Armed)
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Active => "Active",
            SessionState::Armed => "Active+Armed",
            SessionState::ShuttingDown => "ShuttingDown",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerChoice {
    #[default]
    Never,
    OneHour,
    TwoHours,
    FiveHours,
    TenHours,
}

impl TimerChoice {
    pub const ALL: [TimerChoice; 5] = [
        TimerChoice::Never,
        TimerChoice::OneHour,
        TimerChoice::TwoHours,
        TimerChoice::FiveHours,
        TimerChoice::TenHours,
    ];

    pub fn hours(self) -> u64 {
        match self {
            TimerChoice::Never => 0,
            TimerChoice::OneHour => 1,
            TimerChoice::TwoHours => 2,
            TimerChoice::FiveHours => 5,
            TimerChoice::TenHours => 10,
        }
    }

    /// Countdown length, or `None` for `Never`.
    pub fn seconds(self) -> Option<u64> {
        match self {
            TimerChoice::Never => None,
            other => Some(other.hours() * 3600),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TimerChoice::Never => "Never",
            TimerChoice::OneHour => "1 hour",
            TimerChoice::TwoHours => "2 hours",
            TimerChoice::FiveHours => "5 hours",
            TimerChoice::TenHours => "10 hours",
        }
    }
}

impl fmt::Display for TimerChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TimerChoice {
    type Err = ValidationError;

    /// Accepts `never`, `1h`/`1`/`1 hour` and the same forms for 2, 5 and 10
    /// hours. `0` means `never`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let hours = normalized
            .strip_suffix("hours")
            .or_else(|| normalized.strip_suffix("hour"))
            .or_else(|| normalized.strip_suffix('h'))
            .unwrap_or(&normalized)
            .trim();

        match hours {
            "never" | "0" => Ok(TimerChoice::Never),
            "1" => Ok(TimerChoice::OneHour),
            "2" => Ok(TimerChoice::TwoHours),
            "5" => Ok(TimerChoice::FiveHours),
            "10" => Ok(TimerChoice::TenHours),
            _ => Err(ValidationError::InvalidTimerChoice(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Ordered event history for display. Once it grows past `capacity` it is
/// cut back to the newest `trim_to` entries.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    trim_to: usize,
}

pub const DEFAULT_LOG_CAPACITY: usize = 100;
pub const DEFAULT_LOG_TRIM_TO: usize = 50;

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY, DEFAULT_LOG_TRIM_TO)
    }
}

impl ActivityLog {
    pub fn new(capacity: usize, trim_to: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            trim_to: trim_to.clamp(1, capacity),
        }
    }

    pub fn push(&mut self, level: LogLevel, message: impl Into<String>) {
        self.entries.push_back(LogEntry {
            at: Local::now(),
            level,
            message: message.into(),
        });
        if self.entries.len() > self.capacity {
            let excess = self.entries.len() - self.trim_to;
            self.entries.drain(..excess);
        }
    }

    /// The newest `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }
}

/// Running countdown (or grace period) bound to one arming of the timer.
#[derive(Debug, Clone)]
pub struct Countdown {
    pub id: u64,
    pub token: CancellationToken,
}

/// The single mutable session record. Only the controller writes to it.
#[derive(Debug)]
pub struct Session {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub token: CancellationToken,
    pub timer_choice: TimerChoice,
    pub remaining_seconds: u64,
    pub grace_remaining_seconds: u64,
    pub countdown: Option<Countdown>,
    pub next_countdown_id: u64,
    pub shutdown_pending: bool,
    /// The executor has been handed the shutdown and has not reported back.
    pub shutdown_dispatched: bool,
    pub abort_unconfirmed: bool,
    pub last_error: Option<String>,
    pub log: ActivityLog,
}

impl Session {
    pub fn new(log: ActivityLog) -> Self {
        let token = CancellationToken::new();
        // Idle sessions hold an already-cancelled token.
        token.cancel();
        Self {
            state: SessionState::Idle,
            session_id: None,
            token,
            timer_choice: TimerChoice::Never,
            remaining_seconds: 0,
            grace_remaining_seconds: 0,
            countdown: None,
            next_countdown_id: 0,
            shutdown_pending: false,
            shutdown_dispatched: false,
            abort_unconfirmed: false,
            last_error: None,
            log,
        }
    }

    /// True while `session_id` names the live generation.
    pub fn is_current(&self, session_id: Uuid) -> bool {
        self.session_id == Some(session_id) && !self.token.is_cancelled()
    }

    /// True while `countdown_id` is the live countdown of the live generation.
    pub fn is_current_countdown(&self, session_id: Uuid, countdown_id: u64) -> bool {
        self.is_current(session_id)
            && self
                .countdown
                .as_ref()
                .is_some_and(|c| c.id == countdown_id && !c.token.is_cancelled())
    }

    /// Begin a new generation and return its id and token.
    pub fn begin(&mut self) -> (Uuid, CancellationToken) {
        self.token.cancel();
        let id = Uuid::new_v4();
        self.token = CancellationToken::new();
        self.session_id = Some(id);
        self.state = SessionState::Active;
        self.remaining_seconds = 0;
        self.grace_remaining_seconds = 0;
        self.countdown = None;
        self.shutdown_pending = false;
        self.shutdown_dispatched = false;
        self.abort_unconfirmed = false;
        self.last_error = None;
        (id, self.token.clone())
    }

    /// Replace the running countdown (if any) with a fresh one bound to the
    /// current generation.
    pub fn new_countdown(&mut self) -> Countdown {
        self.cancel_countdown();
        self.next_countdown_id += 1;
        let countdown = Countdown {
            id: self.next_countdown_id,
            token: self.token.child_token(),
        };
        self.countdown = Some(countdown.clone());
        countdown
    }

    pub fn cancel_countdown(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.token.cancel();
        }
        self.remaining_seconds = 0;
        self.grace_remaining_seconds = 0;
    }

    /// Invalidate the generation and return to `Idle`. Errors are kept for
    /// display; everything else resets.
    pub fn reset(&mut self) {
        self.token.cancel();
        self.cancel_countdown();
        self.state = SessionState::Idle;
        self.session_id = None;
        self.timer_choice = TimerChoice::Never;
        self.shutdown_pending = false;
        self.shutdown_dispatched = false;
        self.abort_unconfirmed = false;
    }
}
