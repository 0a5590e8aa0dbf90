//! Clap derive structures for the `quebridge` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// quebridge -- bridge a Que cloud air-conditioner account to a message bus
#[derive(Debug, Parser)]
#[command(
    name = "quebridge",
    version,
    about = "Bridge Que cloud air-conditioners to a JSON line bus",
    long_about = "Keeps an authenticated session with the Que cloud service, publishes\n\
        unit state as JSON lines on stdout, and sends commands read as JSON\n\
        lines from stdin.",
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
    /// Account profile to use
    #[arg(long, short = 'p', env = "QUEBRIDGE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, env = "QUEBRIDGE_LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run(RunArgs),

    /// Pair with the cloud service and fetch a bearer token
    Pair(PairArgs),

    /// Poll every unit once and print its state as JSON
    Status(RunArgs),

    /// Manage configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Manage only this unit (overrides the profile)
    #[arg(long, short = 's')]
    pub serial: Option<String>,
}

#[derive(Debug, Args)]
pub struct PairArgs {
    /// Discard the stored pairing token and pair again
    #[arg(long)]
    pub force: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// Display the configuration with secrets masked
    Show,

    /// Create or replace a profile
    Init {
        /// Account username (email)
        #[arg(long, short = 'u')]
        username: String,

        /// Manage only this unit
        #[arg(long, short = 's')]
        serial: Option<String>,

        /// Replace an existing profile
        #[arg(long)]
        force: bool,
    },

    /// Store the account password in the system keyring
    SetPassword,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
