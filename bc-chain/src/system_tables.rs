//! Names, keys, and row shapes of the system tables. These strings are
//! wire-visible: every node must agree on them byte-for-byte for state-root
//! consistency, so they are never derived or configurable.

pub const CURRENT_STATE: &str = "_sys_current_state_";
pub const NUMBER_2_HASH: &str = "_sys_number_2_hash_";
pub const HASH_2_BLOCK: &str = "_sys_hash_2_block_";
pub const TX_HASH_2_BLOCK: &str = "_sys_tx_hash_2_block_";
pub const MINERS: &str = "_sys_miners_";
pub const CONFIG: &str = "_sys_config_";
pub const ACCESS: &str = bc_store::ACCESS_TABLE;
pub const CNS: &str = "_sys_cns_";

pub const CURRENT_STATE_KEY_NUMBER: &str = "current_number";
pub const CURRENT_STATE_KEY_TOTAL_TX_COUNT: &str = "total_tx_count";

/// Fixed key used for every row of `_sys_miners_` and `_sys_config_`
/// (multiple rows share it; `enable_num` disambiguates which is current).
pub const PRI_KEY: &str = "PRI_KEY";

pub const MINER_TYPE_MINER: &str = "miner";
pub const MINER_TYPE_OBSERVER: &str = "observer";

/// A config write below this floor is rejected outright (returns `0`,
/// never written) rather than accepted and later causing the chain to
/// wedge on an unprocessable block.
pub const TX_COUNT_LIMIT_MIN: u64 = 1;
pub const TX_GAS_LIMIT_MIN: u64 = 100_000;

pub const CONFIG_KEY_TX_COUNT_LIMIT: &str = "tx_count_limit";
pub const CONFIG_KEY_TX_GAS_LIMIT: &str = "tx_gas_limit";
