use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::session::TimerChoice;

/// Keep Awake Utility: prevents sleep by simulating activity, with an
/// optional shutdown timer.
#[derive(Debug, Parser)]
#[command(name = "keep-awake", version, about)]
pub struct Cli {
    /// Start keeping the machine awake immediately.
    #[arg(long)]
    pub auto_start: bool,

    /// Shutdown timer: never, 1h, 2h, 5h or 10h.
    #[arg(long, value_name = "CHOICE", value_parser = parse_timer)]
    pub timer: Option<TimerChoice>,

    /// Do not read commands from stdin; report state changes until Ctrl-C.
    #[arg(long)]
    pub non_interactive: bool,

    /// Settings file (JSON). Defaults to $KEEP_AWAKE_CONFIG when set.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Seconds between simulated actions.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_secs: Option<u64>,

    /// Really run the configured shutdown command instead of a dry run.
    #[arg(long)]
    pub execute: bool,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

fn parse_timer(value: &str) -> Result<TimerChoice, String> {
    value.parse().map_err(|err: crate::error::ValidationError| err.to_string())
}
