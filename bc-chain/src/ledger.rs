use std::sync::Arc;

use bc_primitives::{
    Block, BlockHeader, BlockNumber, GenesisBlockParam, Hash, LocalisedReceipt,
    LocalisedTransaction, NodeId, Receipt, Transaction,
};
use bc_store::{Condition, TableFactory};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use tracing::{info, warn};

use crate::cache::BlockCache;
use crate::committer::{CommitResult, ExecutiveContext};
use crate::error::ChainError;
use crate::system_tables as sys;

type OnReadyCallback = Box<dyn Fn(&Block) + Send + Sync>;

struct RosterCache {
    at_number: BlockNumber,
    miners: Vec<NodeId>,
    observers: Vec<NodeId>,
}

struct ConfigCacheEntry {
    value: String,
    seen_block_number: BlockNumber,
}

/// The read-only view of the chain (§4.B), and the write-side executor of
/// a commit on behalf of the committer (§4.D). Both responsibilities share
/// one `TableFactory` and commit lock, so they live on the same type.
pub struct Ledger {
    factory: Arc<TableFactory>,
    cache: BlockCache,
    commit_lock: Mutex<()>,
    roster_cache: RwLock<Option<RosterCache>>,
    config_cache: RwLock<std::collections::HashMap<String, ConfigCacheEntry>>,
    on_ready: Mutex<Vec<OnReadyCallback>>,
}

impl Ledger {
    pub fn new(factory: Arc<TableFactory>) -> Self {
        Self {
            factory,
            cache: BlockCache::default(),
            commit_lock: Mutex::new(()),
            roster_cache: RwLock::new(None),
            config_cache: RwLock::new(std::collections::HashMap::new()),
            on_ready: Mutex::new(Vec::new()),
        }
    }

    pub fn factory(&self) -> Arc<TableFactory> {
        self.factory.clone()
    }

    fn open(&self, name: &'static str) -> Result<bc_store::Table, ChainError> {
        self.factory.open_table(name).map_err(|_| ChainError::OpenSysTableFailed(name.to_string()))
    }

    fn parse_i64(table: &'static str, key: &str, raw: &str) -> Result<i64, ChainError> {
        raw.parse::<i64>().map_err(|_| ChainError::CorruptSystemTable {
            table,
            key: key.to_string(),
            value: raw.to_string(),
        })
    }

    // ---- read paths (§4.B) ----

    pub fn number(&self) -> Result<BlockNumber, ChainError> {
        let table = self.open(sys::CURRENT_STATE)?;
        let rows = table.select(sys::CURRENT_STATE_KEY_NUMBER, &Condition::new());
        match rows.first().and_then(|e| e.get("value")) {
            Some(raw) => Self::parse_i64(sys::CURRENT_STATE, sys::CURRENT_STATE_KEY_NUMBER, raw),
            None => Ok(0),
        }
    }

    pub fn total_transaction_count(&self) -> Result<(i64, BlockNumber), ChainError> {
        let table = self.open(sys::CURRENT_STATE)?;
        let rows = table.select(sys::CURRENT_STATE_KEY_TOTAL_TX_COUNT, &Condition::new());
        let count = match rows.first().and_then(|e| e.get("value")) {
            Some(raw) => {
                Self::parse_i64(sys::CURRENT_STATE, sys::CURRENT_STATE_KEY_TOTAL_TX_COUNT, raw)?
            }
            None => 0,
        };
        Ok((count, self.number()?))
    }

    pub fn number_hash(&self, number: BlockNumber) -> Result<Option<Hash>, ChainError> {
        let table = self.open(sys::NUMBER_2_HASH)?;
        let rows = table.select(&number.to_string(), &Condition::new());
        match rows.first().and_then(|e| e.get("hash")) {
            Some(raw) => Ok(Some(
                raw.parse()
                    .map_err(|_| ChainError::CorruptSystemTable {
                        table: sys::NUMBER_2_HASH,
                        key: number.to_string(),
                        value: raw.to_string(),
                    })?,
            )),
            None => Ok(None),
        }
    }

    pub fn get_block_by_hash(&self, hash: Hash) -> Result<Option<Arc<Block>>, ChainError> {
        if let Some(block) = self.cache.get(&hash) {
            return Ok(Some(block));
        }
        let table = self.open(sys::HASH_2_BLOCK)?;
        let rows = table.select(&hash.to_string(), &Condition::new());
        let Some(raw) = rows.first().and_then(|e| e.get("block")) else {
            return Ok(None);
        };
        let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|_| {
            ChainError::CorruptSystemTable {
                table: sys::HASH_2_BLOCK,
                key: hash.to_string(),
                value: raw.to_string(),
            }
        })?;
        let block = Block::decode(&bytes).map_err(|_| ChainError::CorruptSystemTable {
            table: sys::HASH_2_BLOCK,
            key: hash.to_string(),
            value: raw.to_string(),
        })?;
        let block = Arc::new(block);
        self.cache.add(block.clone());
        Ok(Some(block))
    }

    pub fn get_block_by_number(&self, number: BlockNumber) -> Result<Option<Arc<Block>>, ChainError> {
        match self.number_hash(number)? {
            Some(hash) => self.get_block_by_hash(hash),
            None => Ok(None),
        }
    }

    fn tx_location(&self, hash: Hash) -> Result<Option<(BlockNumber, usize)>, ChainError> {
        let table = self.open(sys::TX_HASH_2_BLOCK)?;
        let rows = table.select(&hash.to_string(), &Condition::new());
        let Some(entry) = rows.first() else { return Ok(None) };
        let number_raw = entry.get("number").unwrap_or("0");
        let index_raw = entry.get("index").unwrap_or("0");
        let number = Self::parse_i64(sys::TX_HASH_2_BLOCK, "number", number_raw)?;
        let index: usize = index_raw.parse().map_err(|_| ChainError::CorruptSystemTable {
            table: sys::TX_HASH_2_BLOCK,
            key: hash.to_string(),
            value: index_raw.to_string(),
        })?;
        Ok(Some((number, index)))
    }

    pub fn get_tx_by_hash(&self, hash: Hash) -> Result<Option<Transaction>, ChainError> {
        let Some((number, index)) = self.tx_location(hash)? else { return Ok(None) };
        let Some(block) = self.get_block_by_number(number)? else { return Ok(None) };
        Ok(block.transactions.get(index).cloned())
    }

    pub fn get_localised_tx_by_hash(
        &self,
        hash: Hash,
    ) -> Result<Option<LocalisedTransaction>, ChainError> {
        let Some((number, index)) = self.tx_location(hash)? else { return Ok(None) };
        let Some(block) = self.get_block_by_number(number)? else { return Ok(None) };
        let Some(transaction) = block.transactions.get(index).cloned() else { return Ok(None) };
        Ok(Some(LocalisedTransaction {
            transaction,
            block_hash: block.hash(),
            block_number: number,
            transaction_index: index,
        }))
    }

    pub fn get_transaction_receipt_by_hash(
        &self,
        hash: Hash,
    ) -> Result<Option<Receipt>, ChainError> {
        let Some((number, index)) = self.tx_location(hash)? else { return Ok(None) };
        let Some(block) = self.get_block_by_number(number)? else { return Ok(None) };
        Ok(block.receipts.get(index).cloned())
    }

    pub fn get_localised_tx_receipt_by_hash(
        &self,
        hash: Hash,
    ) -> Result<Option<LocalisedReceipt>, ChainError> {
        let Some((number, index)) = self.tx_location(hash)? else { return Ok(None) };
        let Some(block) = self.get_block_by_number(number)? else { return Ok(None) };
        let Some(receipt) = block.receipts.get(index).cloned() else { return Ok(None) };
        Ok(Some(LocalisedReceipt {
            receipt,
            transaction_hash: hash,
            block_hash: block.hash(),
            block_number: number,
            transaction_index: index,
        }))
    }

    // ---- node roster cache (§4.B) ----

    fn reload_roster(&self, at_number: BlockNumber) -> Result<(Vec<NodeId>, Vec<NodeId>), ChainError> {
        let table = self.open(sys::MINERS)?;
        let rows = table.select(sys::PRI_KEY, &Condition::new());
        let mut miners = Vec::new();
        let mut observers = Vec::new();
        for entry in rows {
            let enable_num: BlockNumber = entry
                .get("enable_num")
                .unwrap_or("0")
                .parse()
                .map_err(|_| ChainError::CorruptSystemTable {
                    table: sys::MINERS,
                    key: sys::PRI_KEY.to_string(),
                    value: entry.get("enable_num").unwrap_or("").to_string(),
                })?;
            if enable_num > at_number {
                continue;
            }
            if entry.get("removed") == Some("true") {
                continue;
            }
            let Some(node_id_raw) = entry.get("node_id") else { continue };
            let node_id: NodeId = node_id_raw.parse().map_err(|_| ChainError::CorruptSystemTable {
                table: sys::MINERS,
                key: sys::PRI_KEY.to_string(),
                value: node_id_raw.to_string(),
            })?;
            match entry.get("type") {
                Some(sys::MINER_TYPE_MINER) => miners.push(node_id),
                Some(sys::MINER_TYPE_OBSERVER) => observers.push(node_id),
                _ => {}
            }
        }
        Ok((miners, observers))
    }

    fn roster_at_current(&self) -> Result<(Vec<NodeId>, Vec<NodeId>), ChainError> {
        let current = self.number()?;
        let guard = self.roster_cache.upgradable_read();
        if let Some(cache) = guard.as_ref() {
            if cache.at_number == current {
                return Ok((cache.miners.clone(), cache.observers.clone()));
            }
        }
        let (miners, observers) = self.reload_roster(current)?;
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = Some(RosterCache {
            at_number: current,
            miners: miners.clone(),
            observers: observers.clone(),
        });
        Ok((miners, observers))
    }

    pub fn miner_list(&self) -> Result<Vec<NodeId>, ChainError> {
        Ok(self.roster_at_current()?.0)
    }

    pub fn observer_list(&self) -> Result<Vec<NodeId>, ChainError> {
        Ok(self.roster_at_current()?.1)
    }

    // ---- system config cache (§4.B) ----

    /// `num = -1` means "the next block", the first height at which a
    /// just-committed config change takes effect.
    pub fn get_system_config_by_key(
        &self,
        key: &str,
        num: BlockNumber,
    ) -> Result<Option<String>, ChainError> {
        let target_number = if num < 0 { self.number()? + 1 } else { num };

        let guard = self.config_cache.upgradable_read();
        if let Some(cached) = guard.get(key) {
            if cached.seen_block_number == target_number {
                return Ok(Some(cached.value.clone()));
            }
        }

        let table = self.open(sys::CONFIG)?;
        let rows = table.select(key, &Condition::new());
        let mut best: Option<(BlockNumber, String)> = None;
        for entry in rows {
            let enable_num: BlockNumber = entry
                .get("enable_num")
                .unwrap_or("0")
                .parse()
                .map_err(|_| ChainError::CorruptSystemTable {
                    table: sys::CONFIG,
                    key: key.to_string(),
                    value: entry.get("enable_num").unwrap_or("").to_string(),
                })?;
            if enable_num > target_number {
                continue;
            }
            let supersedes = match &best {
                Some((n, _)) => enable_num >= *n,
                None => true,
            };
            if supersedes {
                if let Some(value) = entry.get("value") {
                    best = Some((enable_num, value.to_string()));
                }
            }
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        match &best {
            Some((_, value)) => {
                guard.insert(
                    key.to_string(),
                    ConfigCacheEntry { value: value.clone(), seen_block_number: target_number },
                );
            }
            None => {
                guard.remove(key);
            }
        }
        Ok(best.map(|(_, v)| v))
    }

    // ---- notification (§4.D) ----

    pub fn register_on_ready(&self, callback: OnReadyCallback) {
        self.on_ready.lock().push(callback);
    }

    fn notify_ready(&self, block: &Block) {
        for callback in self.on_ready.lock().iter() {
            callback(block);
        }
    }

    // ---- genesis (§3, §4.B) ----

    pub fn check_and_build_genesis_block(
        &self,
        param: &mut GenesisBlockParam,
    ) -> Result<bool, ChainError> {
        if let Some(existing) = self.get_block_by_number(0)? {
            let existing_mark = existing
                .header
                .extra_data
                .first()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            if existing_mark != param.group_mark {
                warn!(
                    target: "chain",
                    existing = %existing_mark,
                    requested = %param.group_mark,
                    "genesis group mark mismatch"
                );
                if let Ok(fields) = bc_primitives::parse_group_mark(&existing_mark) {
                    param.consensus_type = fields.consensus_type;
                    param.storage_type = fields.storage_type;
                    param.state_type = fields.state_type;
                }
            }
            return Ok(false);
        }

        let header = BlockHeader {
            number: 0,
            parent_hash: Hash::zero(),
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            receipts_root: Hash::zero(),
            timestamp: 0,
            sealer: 0,
            sealer_list: param.miner_list.clone(),
            extra_data: vec![param.group_mark.clone().into_bytes()],
        };
        let genesis = Block {
            header,
            transactions: vec![],
            receipts: vec![],
            signature_list: vec![],
        };
        let hash = genesis.hash();

        let number_2_hash = self.open(sys::NUMBER_2_HASH)?;
        let mut entry = number_2_hash.new_entry();
        entry.set("hash", hash.to_string());
        number_2_hash.insert("0", entry, None)?;

        let config = self.open(sys::CONFIG)?;
        for (key, value) in [
            (sys::CONFIG_KEY_TX_COUNT_LIMIT, param.tx_count_limit.to_string()),
            (sys::CONFIG_KEY_TX_GAS_LIMIT, param.tx_gas_limit.to_string()),
        ] {
            let mut entry = config.new_entry();
            entry.set("value", value);
            entry.set("enable_num", "0");
            config.insert(key, entry, None)?;
        }

        let miners = self.open(sys::MINERS)?;
        for node_id in &param.miner_list {
            let mut entry = miners.new_entry();
            entry.set("type", sys::MINER_TYPE_MINER);
            entry.set("node_id", node_id.to_string());
            entry.set("enable_num", "0");
            miners.insert(sys::PRI_KEY, entry, None)?;
        }
        for node_id in &param.observer_list {
            let mut entry = miners.new_entry();
            entry.set("type", sys::MINER_TYPE_OBSERVER);
            entry.set("node_id", node_id.to_string());
            entry.set("enable_num", "0");
            miners.insert(sys::PRI_KEY, entry, None)?;
        }

        let hash_2_block = self.open(sys::HASH_2_BLOCK)?;
        let mut entry = hash_2_block.new_entry();
        entry.set("block", hex::encode(genesis.encode()));
        hash_2_block.insert(&hash.to_string(), entry, None)?;

        self.factory.commit_db(hash, 0)?;
        self.cache.add(Arc::new(genesis.clone()));
        info!(target: "chain", group_mark = %param.group_mark, "genesis block built");
        self.notify_ready(&genesis);
        Ok(true)
    }

    // ---- commit (§4.D) ----

    pub fn commit_block(
        &self,
        block: Block,
        exec_ctx: &dyn ExecutiveContext,
    ) -> Result<CommitResult, ChainError> {
        let current_number = self.number()?;
        if block.header.number != current_number + 1 {
            return Ok(CommitResult::ErrorNumber);
        }
        let expected_parent = match self.number_hash(current_number)? {
            Some(hash) => hash,
            None if current_number == 0 => Hash::zero(),
            None => {
                return Err(ChainError::CorruptSystemTable {
                    table: sys::NUMBER_2_HASH,
                    key: current_number.to_string(),
                    value: "<missing>".to_string(),
                })
            }
        };
        if block.header.parent_hash != expected_parent {
            return Ok(CommitResult::ErrorParentHash);
        }

        let Some(_guard) = self.commit_lock.try_lock() else {
            return Ok(CommitResult::ErrorCommitting);
        };

        self.write_number(block.header.number)?;
        self.write_total_transaction_count(block.transactions.len() as i64)?;
        self.write_tx_to_block(&block)?;
        self.write_block_info(&block)?;
        exec_ctx.db_commit(&block)?;

        drop(_guard);

        info!(target: "chain", number = block.header.number, hash = %block.hash(), "block committed");
        self.cache.add(Arc::new(block.clone()));
        self.notify_ready(&block);
        Ok(CommitResult::Ok)
    }

    fn write_number(&self, number: BlockNumber) -> Result<(), ChainError> {
        let table = self.open(sys::CURRENT_STATE)?;
        let key = sys::CURRENT_STATE_KEY_NUMBER;
        let existing = table.select(key, &Condition::new());
        let mut entry = table.new_entry();
        entry.set("value", number.to_string());
        if existing.is_empty() {
            table.insert(key, entry, None)?;
        } else {
            table.update(key, entry, &Condition::new(), None)?;
        }
        Ok(())
    }

    fn write_total_transaction_count(&self, added: i64) -> Result<(), ChainError> {
        let table = self.open(sys::CURRENT_STATE)?;
        let key = sys::CURRENT_STATE_KEY_TOTAL_TX_COUNT;
        let existing = table.select(key, &Condition::new());
        let current: i64 = match existing.first().and_then(|e| e.get("value")) {
            Some(raw) => Self::parse_i64(sys::CURRENT_STATE, key, raw)?,
            None => 0,
        };
        let mut entry = table.new_entry();
        entry.set("value", (current + added).to_string());
        if existing.is_empty() {
            table.insert(key, entry, None)?;
        } else {
            table.update(key, entry, &Condition::new(), None)?;
        }
        Ok(())
    }

    fn write_tx_to_block(&self, block: &Block) -> Result<(), ChainError> {
        let table = self.open(sys::TX_HASH_2_BLOCK)?;
        for (index, tx) in block.transactions.iter().enumerate() {
            let mut entry = table.new_entry();
            entry.set("number", block.header.number.to_string());
            entry.set("index", index.to_string());
            table.insert(&tx.sha3().to_string(), entry, None)?;
        }
        Ok(())
    }

    // ---- config / roster mutation (ledger-table precompiled family) ----

    /// Sets a `_sys_config_` value, effective from `current_number + 1`.
    /// Enforces the floor on the two well-known keys; a write below the
    /// floor is rejected and returns `0` rather than being written.
    pub fn set_system_config(&self, key: &str, value: &str) -> Result<i64, ChainError> {
        if key == sys::CONFIG_KEY_TX_COUNT_LIMIT {
            if value.parse::<u64>().unwrap_or(0) < sys::TX_COUNT_LIMIT_MIN {
                return Ok(0);
            }
        }
        if key == sys::CONFIG_KEY_TX_GAS_LIMIT {
            if value.parse::<u64>().unwrap_or(0) < sys::TX_GAS_LIMIT_MIN {
                return Ok(0);
            }
        }
        let enable_num = self.number()? + 1;
        let table = self.open(sys::CONFIG)?;
        let mut entry = table.new_entry();
        entry.set("value", value);
        entry.set("enable_num", enable_num.to_string());
        table.insert(key, entry, None)?;
        Ok(1)
    }

    fn miner_rows(&self) -> Result<Vec<(NodeId, &'static str, BlockNumber)>, ChainError> {
        let current = self.number()?;
        let table = self.open(sys::MINERS)?;
        let rows = table.select(sys::PRI_KEY, &Condition::new());
        let mut out = Vec::new();
        for entry in rows {
            let enable_num: BlockNumber = entry.get("enable_num").unwrap_or("0").parse().unwrap_or(0);
            if enable_num > current || entry.get("removed") == Some("true") {
                continue;
            }
            let Some(node_id_raw) = entry.get("node_id") else { continue };
            let Ok(node_id) = node_id_raw.parse::<NodeId>() else { continue };
            let kind = match entry.get("type") {
                Some(sys::MINER_TYPE_OBSERVER) => sys::MINER_TYPE_OBSERVER,
                _ => sys::MINER_TYPE_MINER,
            };
            out.push((node_id, kind, enable_num));
        }
        Ok(out)
    }

    /// Adds `node_id` to the roster as a miner or observer, effective from
    /// `current_number + 1`.
    pub fn add_to_roster(&self, node_id: NodeId, is_miner: bool) -> Result<i64, ChainError> {
        let enable_num = self.number()? + 1;
        let table = self.open(sys::MINERS)?;
        let mut entry = table.new_entry();
        entry.set("type", if is_miner { sys::MINER_TYPE_MINER } else { sys::MINER_TYPE_OBSERVER });
        entry.set("node_id", node_id.to_string());
        entry.set("enable_num", enable_num.to_string());
        table.insert(sys::PRI_KEY, entry, None)?;
        Ok(1)
    }

    /// Removes `node_id` from the miner roster, effective from
    /// `current_number + 1`. Rejected (no-op, returns `0`) if it would
    /// leave the miner roster empty — the chain must always retain at
    /// least one miner to make progress.
    pub fn remove_miner(&self, node_id: NodeId) -> Result<i64, ChainError> {
        let rows = self.miner_rows()?;
        let remaining_miners =
            rows.iter().filter(|(id, kind, _)| *kind == sys::MINER_TYPE_MINER && *id != node_id).count();
        if remaining_miners == 0 {
            return Ok(0);
        }
        let enable_num = self.number()? + 1;
        let table = self.open(sys::MINERS)?;
        let condition = Condition::new().eq("node_id", node_id.to_string()).eq("type", sys::MINER_TYPE_MINER);
        let mut entry = table.new_entry();
        entry.set("enable_num", enable_num.to_string());
        entry.set("removed", "true");
        table.update(sys::PRI_KEY, entry, &condition, None)?;
        Ok(1)
    }

    fn write_block_info(&self, block: &Block) -> Result<(), ChainError> {
        let number_2_hash = self.open(sys::NUMBER_2_HASH)?;
        let mut entry = number_2_hash.new_entry();
        entry.set("hash", block.hash().to_string());
        number_2_hash.insert(&block.header.number.to_string(), entry, None)?;

        let hash_2_block = self.open(sys::HASH_2_BLOCK)?;
        let mut entry = hash_2_block.new_entry();
        entry.set("block", hex::encode(block.encode()));
        hash_2_block.insert(&block.hash().to_string(), entry, None)?;
        Ok(())
    }
}
