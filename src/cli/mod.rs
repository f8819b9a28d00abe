pub mod app;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kvshard")]
#[command(about = "Inspect a sharded key-value topology and try commands against it")]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Client options, e.g. "kvshard://?db=4&masters_only=true"
    #[arg(long, global = true)]
    pub options: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check a topology file and print its shard layout
    Validate { topology: PathBuf },

    /// Show which node each key is routed to
    Route {
        topology: PathBuf,
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Run commands against an in-memory cluster shaped like the topology
    Sandbox {
        topology: PathBuf,
        /// Commands such as "SET user:{1}:name ada"
        commands: Vec<String>,
        /// File with one command per line
        #[arg(long)]
        script: Option<PathBuf>,
    },
}
