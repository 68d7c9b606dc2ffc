//! sturgeon_live
use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use sl_lib::config::{ConfigFile, LiveConfig};
use sl_lib::live::{run_live, Collaborators};
use sl_lib::shutdown::ShutdownCoordinator;
use sl_lib::simulate::run_simulation;
use sl_wrap::args::{RunArgs, SimulateArgs, SturgeonLive, SubCommand};
use sl_wrap::logging;
use sl_wrap::utils::print_error_chain;
use std::process::ExitCode;
use std::sync::Arc;

fn run(args: &RunArgs) -> Result<()> {
    let file = ConfigFile::locate(args.config.as_deref())?;
    let config = LiveConfig::resolve(file, args.overrides())
        .context("invalid sturgeon_live configuration")?;
    logging::set_level(config.log_level);

    let summary = run_live(&config, Collaborators::from_config(&config))?;
    match summary.final_state {
        Some(state) => info!(
            "Stopped after {} iterations in {}",
            state.completed(),
            summary.target.directory.display()
        ),
        None => info!("Stopped before monitoring {}", summary.target.directory.display()),
    }
    Ok(())
}

fn simulate(args: &SimulateArgs) -> Result<()> {
    let shutdown = Arc::new(ShutdownCoordinator::new(args.stop_file()));
    shutdown.register_signals()?;
    let result = run_simulation(args.settings(), &shutdown);
    shutdown.stop_signal_listener();
    shutdown.remove_marker();
    let summary = result?;
    info!(
        "Simulation finished: {} links created, {} skipped",
        summary.linked, summary.skipped
    );
    Ok(())
}

fn inner_main() -> Result<()> {
    let cli = SturgeonLive::parse();
    logging::init_logging()?;
    match &cli.subcmd {
        SubCommand::Run(args) => run(args),
        SubCommand::Simulate(args) => simulate(args),
    }
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
