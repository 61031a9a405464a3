//! CLI definition using clap derive.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use fleetsync_core::types::ClientType;

use crate::server::{DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_CONNECTIONS};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";

#[derive(Parser)]
#[command(name = "fleetsync", about = "kiosk fleet presence and configuration sync")]
pub struct Cli {
    /// Server address for client commands
    #[arg(long, short = 's', global = true, env = "FLEETSYNC_SERVER", default_value = DEFAULT_LISTEN_ADDR)]
    pub server: String,

    /// Admin token (daemon: accepted token, admin commands: presented token)
    #[arg(long, global = true, env = "FLEETSYNC_ADMIN_TOKEN", default_value = "", hide_env_values = true)]
    pub admin_token: String,

    /// Actor name recorded on admin mutations
    #[arg(long, global = true, env = "FLEETSYNC_ACTOR", default_value = "admin")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the server (JSON-RPC listener + stale-session sweeper)
    Daemon(DaemonOpts),
    /// Run a display agent (heartbeat loop + maintenance gate)
    Kiosk(KioskOpts),
    /// Show session statistics
    Stats,
    /// List active sessions
    Active,
    /// Show the current configuration version
    Config,
    /// Enable or disable one module
    Module(ModuleOpts),
    /// Replace the module map from a JSON file
    Modules(ModulesOpts),
    /// Switch maintenance mode
    Maintenance(MaintenanceOpts),
}

#[derive(Args)]
pub struct DaemonOpts {
    /// Listen address
    #[arg(long, env = "FLEETSYNC_LISTEN", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// JSON file with the initial configuration snapshot
    #[arg(long, env = "FLEETSYNC_SEED")]
    pub seed: Option<PathBuf>,

    /// Seconds without a heartbeat before a session lapses
    #[arg(long, default_value = "90")]
    pub stale_threshold_secs: u64,

    /// Seconds between stale-session sweeps
    #[arg(long, default_value = "30")]
    pub sweep_interval_secs: u64,

    /// Maximum concurrent client connections
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Seconds a connection may sit idle between requests
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    pub idle_timeout_secs: u64,

    /// First configuration version of this run (default: Unix time in ms)
    #[arg(long, env = "FLEETSYNC_INITIAL_VERSION")]
    pub initial_version: Option<u64>,
}

#[derive(Args)]
pub struct KioskOpts {
    /// Client type reported with each heartbeat
    #[arg(long, default_value = "kiosk")]
    pub client_type: ClientType,

    /// Page reported as currently displayed
    #[arg(long, default_value = "/")]
    pub page: String,

    /// File that persists this instance's client id (in-memory if omitted)
    #[arg(long, env = "FLEETSYNC_ID_FILE")]
    pub id_file: Option<PathBuf>,

    /// Heartbeat interval in seconds
    #[arg(long, default_value = "30")]
    pub interval_secs: u64,

    /// Maintenance poll interval in seconds
    #[arg(long, default_value = "10")]
    pub maintenance_interval_secs: u64,

    /// Screen resolution reported as metadata
    #[arg(long)]
    pub screen_resolution: Option<String>,
}

#[derive(Args)]
pub struct ModuleOpts {
    /// Module key, e.g. "news"
    pub key: String,

    #[arg(long, conflicts_with = "disable", required_unless_present = "disable")]
    pub enable: bool,

    #[arg(long)]
    pub disable: bool,

    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args)]
pub struct ModulesOpts {
    /// JSON object mapping module key to {enabled, label, description}
    pub file: PathBuf,

    #[arg(long)]
    pub reason: Option<String>,
}

#[derive(Args)]
pub struct MaintenanceOpts {
    #[arg(long, conflicts_with = "off", required_unless_present = "off")]
    pub on: bool,

    #[arg(long)]
    pub off: bool,

    /// Message shown on the maintenance screen
    #[arg(long)]
    pub message: Option<String>,

    /// Estimated end, shown verbatim when set
    #[arg(long)]
    pub eta: Option<String>,

    #[arg(long)]
    pub reason: Option<String>,
}
