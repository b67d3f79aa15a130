//! Clap derive structures for the `dconnect` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// dconnect -- talk to a Device Connect Manager from the command line
#[derive(Debug, Parser)]
#[command(
    name = "dconnect",
    version,
    about = "Discover and drive Device Connect services from the command line",
    long_about = "A scripting client for Device Connect (GotAPI) managers.\n\n\
        Authorizes against the manager, keeps the event WebSocket open,\n\
        and runs profile calls or streams device events.",
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
    /// Manager profile from the config file
    #[arg(long, short = 'p', env = "DCONNECT_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Manager host (overrides profile)
    #[arg(long, short = 'H', env = "DCONNECT_HOST", global = true)]
    pub host: Option<String>,

    /// Manager port (overrides profile, default 4035)
    #[arg(long, env = "DCONNECT_PORT", global = true)]
    pub port: Option<u16>,

    /// Use https / wss
    #[arg(long, global = true)]
    pub ssl: bool,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "DCONNECT_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "DCONNECT_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides config)
    #[arg(long, env = "DCONNECT_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Where persisted sessions live (defaults to the platform data dir)
    #[arg(long, env = "DCONNECT_SESSIONS_FILE", global = true)]
    pub sessions_file: Option<PathBuf>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "DCONNECT_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
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

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check whether the manager is running
    #[command(alias = "ping")]
    Availability,

    /// Connect and list discovered services
    #[command(alias = "ls")]
    Services(ServicesArgs),

    /// Run one profile call
    Call(CallArgs),

    /// Stream events for an event attribute until interrupted
    Listen(ListenArgs),

    /// Inspect or drop persisted sessions
    Session(SessionArgs),

    /// Show CLI configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct ServicesArgs {
    /// Only services whose serviceInformation lists this profile
    #[arg(long)]
    pub profile_filter: Option<String>,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// HTTP method: GET, POST, PUT or DELETE
    #[arg(value_parser = parse_method)]
    pub method: dconnect_core::Method,

    /// Profile path, e.g. `battery` or `/gotapi/mediaPlayer/play`
    pub path: String,

    /// Target service
    #[arg(long, short = 's')]
    pub service_id: Option<String>,

    /// Extra request parameter (repeatable)
    #[arg(long = "param", short = 'P', value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Event path, e.g. `deviceOrientation/onDeviceOrientation`
    pub path: String,

    /// Target service
    #[arg(long, short = 's')]
    pub service_id: String,

    /// Stop after this many events
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct SessionArgs {
    #[command(subcommand)]
    pub command: SessionCommand,
}

#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// List persisted sessions
    List,

    /// Forget the persisted session for a host (or all of them)
    Logout {
        /// Host to forget; defaults to the active host
        host: Option<String>,

        /// Forget every session
        #[arg(long, conflicts_with = "host")]
        all: bool,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print config and session file locations
    Path,

    /// Print the effective configuration (secrets masked)
    Show,
}

// ── Value parsers ────────────────────────────────────────────────────

fn parse_method(s: &str) -> Result<dconnect_core::Method, String> {
    match s.to_ascii_uppercase().as_str() {
        "GET" => Ok(dconnect_core::Method::GET),
        "POST" => Ok(dconnect_core::Method::POST),
        "PUT" => Ok(dconnect_core::Method::PUT),
        "DELETE" => Ok(dconnect_core::Method::DELETE),
        other => Err(format!("expected GET, POST, PUT or DELETE, got '{other}'")),
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}
