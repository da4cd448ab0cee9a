//! Read-side view of the session for presentation layers.

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::session::{LogEntry, Session, SessionController, SessionState, TimerChoice};

/// Log entries carried by every published snapshot.
pub const SNAPSHOT_LOG_TAIL: usize = 20;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub session_id: Option<Uuid>,
    pub timer_choice: TimerChoice,
    pub remaining_time_seconds: u64,
    pub formatted_remaining: String,
    /// Seconds left before the shutdown runs; only set while `ShuttingDown`
    /// with a shutdown still pending.
    pub grace_remaining_seconds: Option<u64>,
    pub shutdown_pending: bool,
    /// The last cancel could not confirm the OS-level abort, so the machine
    /// may still shut down even though the session shows no pending shutdown.
    pub abort_unconfirmed: bool,
    pub last_error: Option<String>,
    pub recent_log_entries: Vec<LogEntry>,
}

impl StatusSnapshot {
    /// Capture the session. Callers must hold the session lock.
    pub fn capture(session: &Session, tail: usize) -> Self {
        let remaining = match session.state {
            SessionState::Armed => session.remaining_seconds,
            _ => 0,
        };
        let grace = (session.state == SessionState::ShuttingDown && session.shutdown_pending)
            .then_some(session.grace_remaining_seconds);

        Self {
            state: session.state,
            session_id: session.session_id,
            timer_choice: session.timer_choice,
            remaining_time_seconds: remaining,
            formatted_remaining: format_hms(remaining),
            grace_remaining_seconds: grace,
            shutdown_pending: session.shutdown_pending,
            abort_unconfirmed: session.abort_unconfirmed,
            last_error: session.last_error.clone(),
            recent_log_entries: session.log.tail(tail),
        }
    }

    /// One-line human summary of the shutdown timer.
    pub fn timer_summary(&self) -> String {
        match (self.state, self.grace_remaining_seconds) {
            (SessionState::ShuttingDown, Some(grace)) => {
                format!("Shutdown in {grace} seconds (type 'cancel' to abort)")
            }
            (SessionState::ShuttingDown, None) => "Shutdown dispatched".to_string(),
            (SessionState::Armed, _) => format!("Shutdown in {}", self.formatted_remaining),
            _ => "No shutdown scheduled".to_string(),
        }
    }
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn format_hms(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

/// Polling and subscription access to the controller's snapshots.
#[derive(Clone)]
pub struct StatusPublisher {
    controller: SessionController,
    updates: watch::Receiver<StatusSnapshot>,
}

impl StatusPublisher {
    pub fn new(controller: SessionController) -> Self {
        let updates = controller.subscribe();
        Self {
            controller,
            updates,
        }
    }

    /// Fresh snapshot with the newest `tail` log entries.
    pub async fn snapshot(&self, tail: usize) -> StatusSnapshot {
        self.controller.status(tail).await
    }

    /// Latest published snapshot without touching the session lock.
    pub fn latest(&self) -> StatusSnapshot {
        self.updates.borrow().clone()
    }

    /// Wait for the next published snapshot. `None` once the controller is gone.
    pub async fn changed(&mut self) -> Option<StatusSnapshot> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }
}
