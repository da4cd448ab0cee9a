pub mod cli;
pub mod clock;
pub mod console;
pub mod error;
pub mod session;
pub mod settings;
pub mod shutdown;
pub mod simulator;
pub mod status;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use cli::Cli;
use session::{SessionController, TimerChoice};
use settings::SettingsStore;
use shutdown::ShutdownExecutor;
use simulator::SimulatedInput;

pub use error::{ShutdownError, SimulationError, ValidationError};
pub use status::{StatusPublisher, StatusSnapshot};

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    utils::logging::init(cli.verbose);

    info!("Keep Awake starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run_app(cli))
}

async fn run_app(cli: Cli) -> Result<()> {
    let store = SettingsStore::locate(cli.config.clone())?;
    if let Some(path) = store.path() {
        info!("Using settings from {}", path.display());
    }

    let mut settings = store.settings();
    if let Some(secs) = cli.interval_secs {
        settings.activity_interval_secs = secs;
    }
    if cli.execute {
        settings.shutdown.dry_run = false;
    }

    let executor: Arc<dyn ShutdownExecutor> = shutdown::from_settings(&settings.shutdown).into();
    let controller = SessionController::new(
        Arc::new(SimulatedInput),
        executor,
        settings.controller_config(),
    );

    let timer = cli.timer.unwrap_or(settings.default_timer);
    if timer != TimerChoice::Never {
        controller.set_timer(timer).await?;
        println!("Timer set to: {timer}");
    }
    if cli.auto_start {
        controller.start().await?;
        println!("Keep awake started.");
    }

    if cli.non_interactive {
        console::run_unattended(controller, settings.status_tail).await
    } else {
        console::run_interactive(controller, &store, settings.status_tail).await
    }
}
