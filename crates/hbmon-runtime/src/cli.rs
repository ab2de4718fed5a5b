//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "hbmon", about = "heartbeat telemetry monitor")]
pub struct Cli {
    /// UDS socket path (default: /tmp/hbmon-$USER/hbmond.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    /// Daemon configuration file
    #[arg(long, short = 'c', global = true, env = "HBMON_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (board loop + UDS server)
    Daemon,
    /// Feed one heartbeat payload, read from stdin
    Ingest(IngestOpts),
    /// Show a worker's current session, totals and record session
    Check { worker: String },
    /// List workers without a recent confirmed test
    Inactive {
        #[arg(long)]
        days: Option<u64>,
    },
    /// Group confirmed testers by test count
    Testers,
    /// Server-wide lifetime totals
    Totals,
    /// Top workers by lifetime packs
    Top {
        #[arg(long, short = 'n')]
        n: Option<usize>,
    },
    /// Chart data: line, histogram, pie, boxplot or density
    Chart(ChartOpts),
    /// Print the current board payload
    Board,
    /// Confirm a pack test for a user
    Confirm(TestEventOpts),
    /// Retract the caller's most recent confirmation for a user
    Retract(TestEventOpts),
    /// Move a worker's documents to the archive stores
    Retire {
        worker: String,
        #[command(flatten)]
        roles: RoleOpts,
    },
}

#[derive(clap::Args)]
pub struct IngestOpts {
    #[arg(long)]
    pub sender: String,

    #[arg(long)]
    pub channel: String,
}

#[derive(clap::Args)]
pub struct ChartOpts {
    pub kind: String,

    /// Worker id, required for line and histogram
    pub worker: Option<String>,

    /// Rows recorded within this many days
    #[arg(long)]
    pub days: Option<u64>,

    /// Print the chart data as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args)]
pub struct TestEventOpts {
    pub user: String,

    pub confirmer: String,

    #[command(flatten)]
    pub roles: RoleOpts,
}

#[derive(clap::Args)]
pub struct RoleOpts {
    /// Caller role id (repeatable)
    #[arg(long = "role")]
    pub roles: Vec<String>,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/hbmon/hbmond.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/hbmon-{user}/hbmond.sock")
}
