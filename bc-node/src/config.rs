use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use bc_chain::system_tables as sys;
use bc_primitives::{GenesisBlockParam, NodeId};
use serde::{Deserialize, Serialize};

/// A boot peer as `<node_id>@<host>:<port>`, the dial target plus the
/// identity it must present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBoot {
    pub node_id: NodeId,
    pub addr: String,
}

impl fmt::Display for PeerBoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.addr)
    }
}

impl FromStr for PeerBoot {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (node_id, addr) = s
            .split_once('@')
            .ok_or_else(|| anyhow::anyhow!("peer boot entry `{s}` is missing the `node_id@host:port` separator"))?;
        let node_id: NodeId = node_id.parse().context("invalid peer node id")?;
        Ok(Self { node_id, addr: addr.to_string() })
    }
}

impl Serialize for PeerBoot {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PeerBoot {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub const CONFIG_FILENAME: &str = "config.toml";
pub const STORE_DIRNAME: &str = "store";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub group_mark: String,
    pub tx_count_limit: u64,
    pub tx_gas_limit: u64,
    pub miner_list: Vec<NodeId>,
    #[serde(default)]
    pub observer_list: Vec<NodeId>,
    pub consensus_type: String,
    pub storage_type: String,
    pub state_type: String,
}

impl GenesisConfig {
    pub fn into_param(self) -> GenesisBlockParam {
        GenesisBlockParam {
            group_mark: self.group_mark,
            tx_count_limit: self.tx_count_limit,
            tx_gas_limit: self.tx_gas_limit,
            miner_list: self.miner_list,
            observer_list: self.observer_list,
            consensus_type: self.consensus_type,
            storage_type: self.storage_type,
            state_type: self.state_type,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.tx_count_limit < sys::TX_COUNT_LIMIT_MIN {
            anyhow::bail!(
                "genesis tx_count_limit {} is below the floor of {}",
                self.tx_count_limit,
                sys::TX_COUNT_LIMIT_MIN
            );
        }
        if self.tx_gas_limit < sys::TX_GAS_LIMIT_MIN {
            anyhow::bail!(
                "genesis tx_gas_limit {} is below the floor of {}",
                self.tx_gas_limit,
                sys::TX_GAS_LIMIT_MIN
            );
        }
        if self.miner_list.is_empty() {
            anyhow::bail!("genesis must name at least one miner");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: String,
    pub node_id: NodeId,
    #[serde(default)]
    pub boot_peers: Vec<PeerBoot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTuning {
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    #[serde(default = "default_max_send_transactions")]
    pub max_send_transactions: usize,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

fn default_idle_wait_ms() -> u64 {
    200
}

fn default_max_send_transactions() -> usize {
    256
}

fn default_max_payload() -> usize {
    1024 * 1024
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            idle_wait_ms: default_idle_wait_ms(),
            max_send_transactions: default_max_send_transactions(),
            max_payload: default_max_payload(),
        }
    }
}

impl From<SyncTuning> for bc_sync::SyncConfig {
    fn from(tuning: SyncTuning) -> Self {
        bc_sync::SyncConfig {
            idle_wait_ms: tuning.idle_wait_ms,
            max_send_transactions: tuning.max_send_transactions,
            max_payload: tuning.max_payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub store_path: PathBuf,
    pub genesis: GenesisConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub sync: SyncTuning,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        self.genesis.validate().context("invalid genesis configuration")
    }
}

/// Loads `<home>/config.toml`, following `nearcore::config::load_config`'s
/// read-then-validate shape but with a TOML document instead of JSON.
pub fn load_config(home: &Path) -> Result<NodeConfig> {
    let path = home.join(CONFIG_FILENAME);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read node config at {}", path.display()))?;
    let config: NodeConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse node config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Writes a fresh `config.toml` into `home`, creating the directory if
/// needed. Does not touch any existing store.
pub fn init_config(home: &Path, config: &NodeConfig) -> Result<()> {
    fs::create_dir_all(home)
        .with_context(|| format!("failed to create node home at {}", home.display()))?;
    let path = home.join(CONFIG_FILENAME);
    if path.exists() {
        anyhow::bail!("refusing to overwrite existing config at {}", path.display());
    }
    let rendered = toml::to_string_pretty(config).context("failed to render node config")?;
    fs::write(&path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
