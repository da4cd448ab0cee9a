//! Presentation-facing command surface.

use std::str::FromStr;

use crate::{error::ValidationError, status::StatusSnapshot};

use super::{CancelOutcome, SessionController, TimerChoice};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    SetTimer(TimerChoice),
    CancelShutdown,
    ShutdownNow,
    Status,
}

impl FromStr for Command {
    type Err = ValidationError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map(|(verb, rest)| (verb, rest.trim()))
            .unwrap_or((line, ""));

        match (verb.to_ascii_lowercase().as_str(), rest) {
            ("start", "") => Ok(Command::Start),
            ("stop", "") => Ok(Command::Stop),
            ("timer" | "set_timer", choice) => Ok(Command::SetTimer(choice.parse()?)),
            ("cancel" | "cancel_shutdown", "") => Ok(Command::CancelShutdown),
            ("shutdown-now" | "shutdown_now", "") => Ok(Command::ShutdownNow),
            ("status" | "get_status", "") => Ok(Command::Status),
            _ => Err(ValidationError::UnknownCommand(line.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Done(String),
    Cancelled(CancelOutcome),
    Status(StatusSnapshot),
}

impl SessionController {
    /// Run one command. `tail` bounds the log entries in a status reply.
    pub async fn dispatch(
        &self,
        command: Command,
        tail: usize,
    ) -> Result<CommandReply, ValidationError> {
        match command {
            Command::Start => {
                self.start().await?;
                Ok(CommandReply::Done("Keep awake started.".into()))
            }
            Command::Stop => {
                self.stop().await?;
                Ok(CommandReply::Done("Keep awake stopped.".into()))
            }
            Command::SetTimer(choice) => {
                self.set_timer(choice).await?;
                Ok(CommandReply::Done(format!("Timer set to: {choice}")))
            }
            Command::CancelShutdown => Ok(CommandReply::Cancelled(self.cancel_shutdown().await?)),
            Command::ShutdownNow => {
                self.shutdown_now().await?;
                Ok(CommandReply::Done(
                    "Shutdown scheduled; type 'cancel' to abort.".into(),
                ))
            }
            Command::Status => Ok(CommandReply::Status(self.status(tail).await)),
        }
    }
}
