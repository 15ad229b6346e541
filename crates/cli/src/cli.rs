//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Navtelecom gateway - TCP ingestion for Navtelecom v6 trackers
#[derive(Parser, Debug)]
#[command(
    name = "navtel-gateway",
    author,
    version,
    about = "Navtelecom v6 telemetry gateway",
    long_about = "Telemetry gateway for Navtelecom v6 trackers.\n\n\
                  Accepts device connections over TCP, acknowledges every frame, \n\
                  reassembles J1939 transport sessions, decodes CAN signals and \n\
                  dispatches records to the configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "NAVTEL_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "NAVTEL_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway until interrupted
    Serve(ServeArgs),

    /// Validate a configuration file and/or dictionary files
    Validate(ValidateArgs),

    /// Display configuration and loaded dictionaries
    Info(InfoArgs),

    /// Decode one hex-encoded frame offline
    Decode(DecodeArgs),

    /// Replay scripted tracker traffic against a running gateway
    Simulate(SimulateArgs),
}

/// Arguments for the `serve` command
#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Path to configuration file (TOML or JSON); defaults apply when omitted
    #[arg(short, long, env = "NAVTEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override listen host from configuration
    #[arg(long, env = "NAVTEL_HOST")]
    pub host: Option<String>,

    /// Override listen port from configuration
    #[arg(long, env = "NAVTEL_PORT")]
    pub port: Option<u16>,

    /// Prometheus exporter port (0 = disabled)
    #[arg(long, default_value = "0", env = "NAVTEL_METRICS_PORT")]
    pub metrics_port: u16,

    /// Seconds between queue depth reports (0 = disabled)
    #[arg(long, default_value = "10", env = "NAVTEL_STATS_INTERVAL")]
    pub stats_interval: u64,

    /// Start in persist-only mode: keep raw frames, skip CAN decoding
    #[arg(long, env = "NAVTEL_PERSIST_ONLY")]
    pub persist_only: bool,

    /// Validate configuration and dictionaries, then exit
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Configuration file to validate
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Dictionary file to compile (repeatable)
    #[arg(short, long = "dictionary")]
    pub dictionaries: Vec<PathBuf>,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file; defaults apply when omitted
    #[arg(short, long, env = "NAVTEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Load dictionaries and show their versions
    #[arg(long)]
    pub dictionaries: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Arguments for the `decode` command
#[derive(Parser, Debug)]
pub struct DecodeArgs {
    /// Complete frame as hex, whitespace allowed ("7E 7E ...")
    pub frame: String,

    /// Configuration whose dictionaries should be used
    #[arg(short, long, env = "NAVTEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `simulate` command
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Gateway address
    #[arg(short, long, default_value = "127.0.0.1:5221", env = "NAVTEL_SIM_ADDR")]
    pub addr: SocketAddr,

    /// Frames per device
    #[arg(short = 'n', long, default_value = "100")]
    pub count: u64,

    /// Milliseconds between frames (0 = back to back)
    #[arg(long, default_value = "100")]
    pub interval_ms: u64,

    /// Number of concurrent devices
    #[arg(long, default_value = "1")]
    pub devices: u16,

    /// Device id of the first device, 16 hex chars; later devices count up
    #[arg(long, default_value = "0102030405060708")]
    pub device_id: String,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
