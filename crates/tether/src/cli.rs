//! Clap derive structures for the `tether` CLI.
//!
//! Defines the command tree, global flags, and shared types.

#![allow(dead_code)]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tether: keep stable device handles over flaky ADB / SSH links
#[derive(Debug, Parser)]
#[command(
    name = "tether",
    version,
    about = "Supervise ephemeral device connections",
    long_about = "Keeps one stable handle per device while the debug-bridge or\n\
        remote-shell link underneath drops and reconnects. Commands issued\n\
        against a device are retried transparently on the next connection.",
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
    /// Config file to use instead of the platform default
    #[arg(long, env = "TETHER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "TETHER_OUTPUT",
        default_value = "table",
        global = true
    )]
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
    /// YAML
    Yaml,
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

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive a device supervisor against a simulated flaky transport
    #[command(alias = "sim")]
    Simulate(SimulateArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  SIMULATE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Device identity to supervise
    #[arg(long, short = 'd', default_value = "sim-device")]
    pub device: String,

    /// Number of shell commands to run concurrently
    #[arg(long, short = 'n', default_value = "10")]
    pub commands: usize,

    /// Transport the simulated links pretend to be
    #[arg(long, short = 't', value_enum, default_value = "debug-bridge")]
    pub transport: TransportArg,

    /// Operations each link survives before dropping (0 = never drops)
    #[arg(long, default_value = "3")]
    pub fail_after: u32,

    /// Delay before discovery supplies a replacement link
    #[arg(long, default_value = "50")]
    pub reconnect_delay_ms: u64,

    /// Duration of each simulated operation
    #[arg(long, default_value = "20")]
    pub op_delay_ms: u64,

    /// Override the configured gate capacity
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Fire the shared cancellation token after this many milliseconds
    #[arg(long)]
    pub cancel_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportArg {
    /// USB / TCP debug bridge (ADB)
    DebugBridge,
    /// Remote shell (SSH)
    RemoteShell,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current resolved configuration
    Show,

    /// Write a config file with default settings
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
