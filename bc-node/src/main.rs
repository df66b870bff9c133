mod cli;
mod config;
mod node;

use anyhow::{Context, Result};
use bc_primitives::NodeId;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::{GenesisConfig, NetworkConfig, NodeConfig, SyncTuning, CONFIG_FILENAME, STORE_DIRNAME};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Init { node_id, miner } => run_init(&cli, node_id, miner),
        Command::Run => run_node(&cli).await,
    }
}

fn run_init(cli: &Cli, node_id: &str, miner: &str) -> Result<()> {
    let node_id: NodeId = node_id.parse().context("invalid --node-id")?;
    let miner: NodeId = miner.parse().context("invalid --miner")?;

    let config = NodeConfig {
        store_path: STORE_DIRNAME.into(),
        genesis: GenesisConfig {
            group_mark: "genesis-mark-pbft-AMOPDB-mpt-1000-300000000".to_string(),
            tx_count_limit: 1000,
            tx_gas_limit: 300_000_000,
            miner_list: vec![miner],
            observer_list: vec![],
            consensus_type: "pbft".to_string(),
            storage_type: "AMOPDB".to_string(),
            state_type: "mpt".to_string(),
        },
        network: NetworkConfig {
            listen_addr: cli.listen.clone().unwrap_or_else(|| "0.0.0.0:30303".to_string()),
            node_id,
            boot_peers: vec![],
        },
        sync: SyncTuning::default(),
    };

    config::init_config(&cli.home, &config)?;
    tracing::info!(
        target: "node",
        home = %cli.home.display(),
        config = %cli.home.join(CONFIG_FILENAME).display(),
        "initialized node home"
    );
    Ok(())
}

async fn run_node(cli: &Cli) -> Result<()> {
    let config = config::load_config(&cli.home)?;
    node::run(&cli.home, config, cli.listen.clone()).await
}
