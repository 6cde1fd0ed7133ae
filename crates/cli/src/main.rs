// SPDX-License-Identifier: MIT

//! `labtrans`: a command-line driver for the lab-transport scheduling
//! core. Boots a coordinator from a scenario file, runs it to
//! completion, and prints the event stream and final plate/mover state.
//! There is no daemon, no network surface, and no persisted state — the
//! HTTP/WS layer spec §6 describes as the coordinator's real consumer
//! is out of scope for this crate.

mod commands;
mod exit_error;
mod output;
mod scenario;

use clap::{Parser, Subcommand};
use exit_error::ExitError;
use output::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "labtrans", version, about = "Lab-transport scheduling core driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot a coordinator from a scenario file and run it to completion.
    Run {
        /// Path to a scenario JSON file (deck + movers + devices + plates).
        scenario: PathBuf,
        /// Give up waiting for plates to finish after this many seconds.
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Load a deck configuration and check its referential integrity.
    ValidateDeck {
        /// Path to a deck configuration JSON file.
        deck: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(exit_err) = err.downcast_ref::<ExitError>() {
                eprintln!("error: {exit_err}");
                return ExitCode::from(exit_err.code as u8);
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { scenario, timeout_secs, format } => {
            commands::run::handle(&scenario, timeout_secs, format).await
        }
        Command::ValidateDeck { deck, format } => commands::validate_deck::handle(&deck, format),
    }
}
