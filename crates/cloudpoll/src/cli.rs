//! Clap derive structures for the `cloudpoll` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// cloudpoll -- poll vendor cloud APIs from the command line
#[derive(Debug, Parser)]
#[command(
    name = "cloudpoll",
    version,
    about = "Poll alarm panels, inverters, energy meters and investment accounts through their vendor clouds",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configured thing to use
    #[arg(long, short = 't', env = "CLOUDPOLL_THING", global = true)]
    pub thing: Option<String>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "CLOUDPOLL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the built-in vendor profiles
    Vendors,

    /// List the things in the configuration file
    Things,

    /// Log in once and report the resulting thing status
    Check,

    /// Poll the thing and print channel updates
    Poll(PollArgs),

    /// List the devices behind a bridge account
    #[command(alias = "scan")]
    Discover,

    /// Send a command to a channel
    Send(SendArgs),

    /// Inspect the configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct PollArgs {
    /// Stop after this many poll cycles (0 polls until Ctrl-C)
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,

    /// Override the configured poll interval, e.g. "30s"
    #[arg(long, short = 'i', value_parser = humantime::parse_duration)]
    pub interval: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Channel id
    pub channel: String,

    /// Value: on/off for switches, a number, text, or REFRESH
    pub value: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Print the merged configuration with secrets hidden
    Show,
}
