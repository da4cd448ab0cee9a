use std::process::Command;

use log::{info, warn};

use crate::{error::ShutdownError, settings::ShutdownSettings};

/// Issues (and, where possible, takes back) the OS shutdown request.
pub trait ShutdownExecutor: Send + Sync {
    fn execute(&self) -> Result<(), ShutdownError>;

    /// Best-effort cancel of a shutdown that was already handed to the OS.
    /// [`ShutdownError::AbortUnsupported`] is a warning, not a failure.
    fn abort(&self) -> Result<(), ShutdownError>;
}

/// Logs the commands it would run and never touches the machine.
#[derive(Debug, Default, Clone)]
pub struct DryRunExecutor {
    command: Vec<String>,
    abort_command: Option<Vec<String>>,
}

impl DryRunExecutor {
    pub fn new(command: Vec<String>, abort_command: Option<Vec<String>>) -> Self {
        Self {
            command,
            abort_command,
        }
    }
}

impl ShutdownExecutor for DryRunExecutor {
    fn execute(&self) -> Result<(), ShutdownError> {
        if self.command.is_empty() {
            info!("SIMULATED: shutdown (no shutdown command configured)");
        } else {
            info!("SIMULATED: {}", self.command.join(" "));
        }
        Ok(())
    }

    fn abort(&self) -> Result<(), ShutdownError> {
        match &self.abort_command {
            Some(argv) => {
                info!("SIMULATED: {}", argv.join(" "));
                Ok(())
            }
            None => Err(ShutdownError::AbortUnsupported),
        }
    }
}

/// Runs the configured shutdown / abort commands.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    abort_command: Option<Vec<String>>,
}

impl CommandExecutor {
    pub fn new(command: Vec<String>, abort_command: Option<Vec<String>>) -> Self {
        Self {
            command,
            abort_command,
        }
    }
}

fn run_argv(argv: &[String]) -> Result<(), ShutdownError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| ShutdownError::Execution("empty command".into()))?;

    info!("Running {}", argv.join(" "));
    let status = Command::new(program).args(args).status()?;
    if status.success() {
        Ok(())
    } else {
        Err(ShutdownError::Execution(format!(
            "'{}' exited with {status}",
            argv.join(" ")
        )))
    }
}

impl ShutdownExecutor for CommandExecutor {
    fn execute(&self) -> Result<(), ShutdownError> {
        run_argv(&self.command)
    }

    fn abort(&self) -> Result<(), ShutdownError> {
        match &self.abort_command {
            Some(argv) => run_argv(argv),
            None => Err(ShutdownError::AbortUnsupported),
        }
    }
}

/// Pick the executor for this run. Falls back to a dry run when real
/// execution is requested without a command to run.
pub fn from_settings(settings: &ShutdownSettings) -> Box<dyn ShutdownExecutor> {
    if !settings.dry_run {
        if settings.command.is_empty() {
            warn!("Shutdown execution requested but no shutdown command is configured; using dry run");
        } else {
            return Box::new(CommandExecutor::new(
                settings.command.clone(),
                settings.abort_command.clone(),
            ));
        }
    }
    Box::new(DryRunExecutor::new(
        settings.command.clone(),
        settings.abort_command.clone(),
    ))
}
