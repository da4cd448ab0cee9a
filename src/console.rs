//! Console front end: an interactive command loop, or an unattended mode
//! that only reports state changes.

use anyhow::{Context, Result};
use log::info;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

use crate::{
    error::ValidationError,
    session::{Command, CommandReply, SessionController, SessionState, TimerChoice},
    settings::SettingsStore,
    status::{StatusPublisher, StatusSnapshot},
};

const SHUTDOWN_BANNER_WIDTH: usize = 60;

const COMMANDS_HELP: &str = "\
Commands:
  start          Start keeping the machine awake
  stop           Stop the utility
  timer [CHOICE] Set the shutdown timer (never, 1h, 2h, 5h, 10h);
                 without a choice, pick from the numbered menu
  cancel         Cancel a pending shutdown
  shutdown-now   Skip the timer and start the shutdown grace period
  status [json]  Show current status
  save           Remember the current timer as the default
  help           Show this help
  exit           Exit the application";

fn print_welcome() {
    println!("\n{}", "=".repeat(50));
    println!("{:^50}", "KEEP AWAKE UTILITY");
    println!("{}", "=".repeat(50));
    println!("This utility prevents your machine from sleeping by simulating activity.");
    println!("When the timer expires, the machine shuts down after a one-minute grace period.\n");
    println!("{COMMANDS_HELP}");
    println!("{}\n", "=".repeat(50));
}

fn print_timer_menu() {
    println!("\nShutdown timer options:");
    for (number, choice) in TimerChoice::ALL.iter().enumerate() {
        println!("{}. {choice}", number + 1);
    }
}

/// Menu numbers are 1-based positions in `TimerChoice::ALL`.
fn menu_choice(input: &str) -> Result<TimerChoice, ValidationError> {
    let input = input.trim();
    input
        .parse::<usize>()
        .ok()
        .and_then(|number| number.checked_sub(1))
        .and_then(|index| TimerChoice::ALL.get(index).copied())
        .ok_or_else(|| ValidationError::InvalidTimerChoice(input.to_string()))
}

pub fn render_status(snapshot: &StatusSnapshot) -> String {
    let mut out = format!(
        "Current state: {}\nShutdown timer: {}",
        snapshot.state,
        snapshot.timer_summary()
    );
    if snapshot.abort_unconfirmed {
        out.push_str("\nWarning: the OS-level shutdown abort could not be confirmed");
    }
    if let Some(err) = &snapshot.last_error {
        out.push_str(&format!("\nLast error: {err}"));
    }
    if !snapshot.recent_log_entries.is_empty() {
        out.push_str("\n\nRecent activity:");
        for entry in &snapshot.recent_log_entries {
            out.push_str(&format!("\n  - {entry}"));
        }
    }
    out
}

/// Turns successive snapshots into the notices a user should see.
#[derive(Debug, Default)]
pub struct ChangeReporter {
    last_state: SessionState,
    last_error: Option<String>,
    was_active: bool,
}

impl ChangeReporter {
    pub fn new(initial: &StatusSnapshot) -> Self {
        Self {
            last_state: initial.state,
            last_error: initial.last_error.clone(),
            was_active: initial.state != SessionState::Idle,
        }
    }

    pub fn observe(&mut self, snapshot: &StatusSnapshot) -> Vec<String> {
        let mut notices = Vec::new();

        if snapshot.state != self.last_state {
            match snapshot.state {
                SessionState::ShuttingDown if snapshot.shutdown_pending => {
                    let bar = "!".repeat(SHUTDOWN_BANNER_WIDTH);
                    notices.push(format!(
                        "{bar}\n! WARNING: shutting down in {} seconds. Type 'cancel' to abort.\n{bar}",
                        snapshot.grace_remaining_seconds.unwrap_or_default()
                    ));
                }
                SessionState::Armed => {
                    notices.push(format!("Shutdown in {}", snapshot.formatted_remaining))
                }
                state => notices.push(format!("State: {state}")),
            }
            self.was_active |= snapshot.state != SessionState::Idle;
            self.last_state = snapshot.state;
        }

        if snapshot.last_error != self.last_error {
            if let Some(err) = &snapshot.last_error {
                notices.push(format!("Error: {err}"));
            }
            self.last_error = snapshot.last_error.clone();
        }

        notices
    }

    /// The session ran and has since returned to `Idle` on its own.
    pub fn finished(&self) -> bool {
        self.was_active && self.last_state == SessionState::Idle
    }
}

enum Flow {
    Continue,
    Exit,
}

async fn prompt(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await.context("failed to flush stdout")
}

pub async fn run_interactive(
    controller: SessionController,
    settings: &SettingsStore,
    tail: usize,
) -> Result<()> {
    print_welcome();

    let notices = CancellationToken::new();
    let watcher = tokio::spawn(print_notices(
        StatusPublisher::new(controller.clone()),
        notices.clone(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("\nEnter command (start/stop/timer/cancel/status/help/exit): ").await?;
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read command")?,
            _ = tokio::signal::ctrl_c() => {
                println!("\nReceived interrupt signal.");
                break;
            }
        };
        let Some(line) = line else { break };

        match handle_line(&controller, settings, tail, line.trim(), &mut lines).await? {
            Flow::Continue => {}
            Flow::Exit => break,
        }
    }

    notices.cancel();
    let _ = watcher.await;
    controller.close().await;
    println!("Exiting Keep Awake Utility. Goodbye!");
    Ok(())
}

async fn handle_line(
    controller: &SessionController,
    settings: &SettingsStore,
    tail: usize,
    line: &str,
    lines: &mut Lines<BufReader<Stdin>>,
) -> Result<Flow> {
    match line.to_ascii_lowercase().as_str() {
        "" => {}
        "help" => println!("{COMMANDS_HELP}"),
        "timer" => {
            print_timer_menu();
            prompt(&format!("\nSelect a timer option (1-{}): ", TimerChoice::ALL.len())).await?;
            let selection = lines.next_line().await?.unwrap_or_default();
            match menu_choice(&selection) {
                Ok(choice) => match controller.dispatch(Command::SetTimer(choice), tail).await {
                    Ok(reply) => print_reply(reply),
                    Err(err) => println!("{err}"),
                },
                Err(_) => println!(
                    "Invalid selection. Please choose a number between 1 and {}.",
                    TimerChoice::ALL.len()
                ),
            }
        }
        "status json" => {
            let snapshot = controller.status(tail).await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        "save" => {
            let choice = controller.status(0).await.timer_choice;
            match settings.update_default_timer(choice) {
                Ok(()) => println!("Default timer saved: {choice}"),
                Err(err) => println!("Could not save settings: {err:#}"),
            }
        }
        "exit" | "quit" => {
            if controller.status(0).await.state != SessionState::Idle {
                prompt("Keep awake is still active. Are you sure you want to exit? (y/n): ").await?;
                let answer = lines.next_line().await?.unwrap_or_default();
                if !answer.trim().eq_ignore_ascii_case("y") {
                    return Ok(Flow::Continue);
                }
            }
            return Ok(Flow::Exit);
        }
        _ => match line.parse::<Command>() {
            Ok(command) => match controller.dispatch(command, tail).await {
                Ok(reply) => print_reply(reply),
                Err(err) => println!("{err}"),
            },
            Err(err) => {
                println!("{err}");
                println!("Type 'help' for the list of commands.");
            }
        },
    }
    Ok(Flow::Continue)
}

fn print_reply(reply: CommandReply) {
    match reply {
        CommandReply::Done(message) => println!("{message}"),
        CommandReply::Cancelled(outcome) => {
            println!("Shutdown cancelled.");
            if !outcome.abort_confirmed {
                println!("Note: the OS could not confirm the abort; an already issued shutdown may still happen.");
            }
        }
        CommandReply::Status(snapshot) => println!("\n{}", render_status(&snapshot)),
    }
}

async fn print_notices(mut publisher: StatusPublisher, stop: CancellationToken) {
    let mut reporter = ChangeReporter::new(&publisher.latest());
    loop {
        let snapshot = tokio::select! {
            _ = stop.cancelled() => break,
            update = publisher.changed() => match update {
                Some(snapshot) => snapshot,
                None => break,
            },
        };
        for notice in reporter.observe(&snapshot) {
            println!("\n{notice}");
        }
    }
}

/// Report changes until Ctrl-C or until the session ends by itself.
pub async fn run_unattended(controller: SessionController, tail: usize) -> Result<()> {
    let mut publisher = StatusPublisher::new(controller.clone());
    let initial = publisher.snapshot(tail).await;
    println!("{}", render_status(&initial));
    if initial.state == SessionState::Idle {
        info!("Not started; pass --auto-start to begin keeping the machine awake");
    }

    let mut reporter = ChangeReporter::new(&initial);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nReceived interrupt signal.");
                break;
            }
            update = publisher.changed() => {
                let Some(snapshot) = update else { break };
                for notice in reporter.observe(&snapshot) {
                    println!("{notice}");
                }
                if reporter.finished() {
                    break;
                }
            }
        }
    }

    controller.close().await;
    println!("Exiting Keep Awake Utility. Goodbye!");
    Ok(())
}
