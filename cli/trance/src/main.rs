//! trance: transparent TCP relay that traces every byte it forwards.

mod cli;
mod error;
mod logging;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use tracing::{error, info};
use trance_relay::{NetEngine, Target, TraceSink};

use crate::cli::{Cli, Settings, USAGE};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => err.exit(),
    };

    let settings = match cli.into_settings() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", err);
            println!("usage: {}", USAGE);
            return ExitCode::SUCCESS;
        }
    };

    if !settings.color {
        colored::control::set_override(false);
    }

    if let Err(err) = logging::init(&settings.log_filter) {
        eprintln!("{} {}", "Warning:".yellow().bold(), err);
    }

    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error::print_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let target = Target::resolve(&settings.remote_host, settings.remote_port)
        .with_context(|| format!("cannot resolve {}", settings.remote_host))?;

    let mut engine = NetEngine::bind(&settings.relay, target.addr, TraceSink::stdout(settings.color))
        .context("cannot start listener")?;
    let shutdown = engine.shutdown_handle();

    info!(
        listen_addr = %engine.local_addr()?,
        remote = %target,
        "relaying"
    );

    let mut task = tokio::task::spawn_blocking(move || engine.run());

    let result = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    info!("shutdown requested");
                    shutdown.trigger();
                }
                Err(err) => error!(error = %err, "cannot listen for ctrl-c"),
            }
            task.await
        }
    };

    result.context("relay task panicked")??;
    info!("relay stopped");
    Ok(())
}
