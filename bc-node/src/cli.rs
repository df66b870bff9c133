use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A permissioned-chain node: table-store, ledger, and peer sync in one
/// process.
#[derive(Parser)]
#[command(name = "bc-node", version)]
pub struct Cli {
    /// Directory holding config.toml and the store; created by `init`.
    #[arg(long, global = true, default_value = "./.bc-node")]
    pub home: PathBuf,

    /// Overrides `network.listen_addr` from config.toml for this run.
    #[arg(long, global = true)]
    pub listen: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Writes a fresh config.toml (and an empty store directory) under `--home`.
    Init {
        /// Node id this instance will present to peers.
        #[arg(long)]
        node_id: String,
        /// Single seed miner for the genesis roster.
        #[arg(long)]
        miner: String,
    },
    /// Opens the store (building genesis if absent) and runs the node.
    Run,
}
