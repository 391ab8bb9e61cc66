mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let global = &cli.global;
    tracing::debug!(command = ?cli.command, "dispatching command");
    match cli.command {
        // No configuration needed
        Command::Vendors => commands::vendors::handle(global),

        Command::Things => commands::things::handle(global),
        Command::Config(ref args) => commands::config_cmd::handle(args, global),

        // Commands that talk to a vendor
        Command::Check => commands::check::handle(global).await,
        Command::Poll(args) => commands::poll::handle(args, global).await,
        Command::Discover => commands::discover::handle(global).await,
        Command::Send(args) => commands::send::handle(args, global).await,
    }
}
