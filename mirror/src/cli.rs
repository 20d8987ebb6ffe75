use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "ckb-mirror")]
#[command(about = "Mirror a CKB node into SQLite and stream chain events", long_about = None)]
pub struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Node WebSocket RPC endpoint (ws:// or wss://)
    #[arg(long)]
    pub node_url: Option<String>,

    /// SQLite database file
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Port for the realtime gateway
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

pub fn parse_args() -> Args {
    Args::parse()
}
