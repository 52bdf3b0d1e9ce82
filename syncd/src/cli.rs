use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "dag-syncd")]
#[command(about = "BlockDAG ledger sync and indexing daemon", long_about = None)]
pub struct Args {
    /// Path to configuration file (optional, uses defaults if not provided)
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    pub database_path: Option<PathBuf>,

    /// Full node JSON-RPC websocket endpoint
    #[arg(short, long)]
    pub rpc_url: Option<String>,

    /// Redis server used to publish change notifications
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Apply pending schema migrations before starting
    #[arg(long)]
    pub migrate: bool,

    /// Times a chain change may be deferred before the daemon gives up
    #[arg(long)]
    pub max_pending_retries: Option<u32>,
}

pub fn parse_args() -> Args {
    Args::parse()
}
