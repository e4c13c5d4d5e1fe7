use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// WIDS aggregator CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "wids-aggregator",
    version,
    about = "Aggregates telemetry, key material and alerts from WIDS sensor nodes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Address the HTTP API listens on
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Sensor polling interval in milliseconds
    #[arg(long)]
    pub aggregation_interval_ms: Option<u64>,

    /// Event inspection interval in milliseconds
    #[arg(long)]
    pub inspection_interval_ms: Option<u64>,

    /// Minimum seconds between two alerts carrying the same message
    #[arg(long)]
    pub cooldown_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the aggregation loops and the HTTP API (default)
    Serve,
    /// Apply database migrations and exit
    InitDb,
    /// Drop every aggregator table and exit
    CleanDb,
}
