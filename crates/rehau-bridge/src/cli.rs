//! Clap derive structures for the `rehau-bridge` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// rehau-bridge -- REHAU NEA SMART heating zones in Home Assistant
#[derive(Debug, Parser)]
#[command(
    name = "rehau-bridge",
    version,
    about = "Bridge REHAU NEA SMART heating zones to Home Assistant over MQTT",
    long_about = "Relays the REHAU NEA SMART cloud MQTT broker to a local Home Assistant\n\
        broker: zones are announced with MQTT discovery, live state is republished\n\
        and Home Assistant commands are written back to the controllers.",
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
    /// Config file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "REHAU_BRIDGE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Also write logs to this file
    #[arg(long, env = "REHAU_BRIDGE_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect both brokers and bridge until interrupted
    Run,

    /// List the Home Assistant topics derived from the installation tree
    Topics(TopicsArgs),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct TopicsArgs {
    /// Read the installation tree from this JSON snapshot instead of the
    /// configured source
    #[arg(long, short = 'f')]
    pub file: Option<PathBuf>,

    /// Include the group name in display names
    #[arg(long)]
    pub use_group_in_names: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (secrets masked)
    Show,
    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Target shell
    pub shell: clap_complete::Shell,
}
