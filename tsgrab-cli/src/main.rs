mod cli;
mod config;
mod download;
mod error;

use std::process;

use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use tsgrab_engine::CancellationToken;

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::Result;

const DEFAULT_FILTER: &str = "tsgrab=info,tsgrab_engine=info";

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args)?;
    config.validate()?;

    let token = CancellationToken::new();
    let interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping; run the same command again to resume");
            interrupt.cancel();
        }
    });

    download::execute(&args, &config, &token).await
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("tsgrab=debug,tsgrab_engine=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .init();
}
