use std::sync::Arc;

use bc_primitives::{Address, Block, Hash};
use bc_store::TableFactory;

use crate::error::ChainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Ok,
    ErrorParentHash,
    ErrorNumber,
    ErrorCommitting,
}

/// The execution-layer collaborator a commit is run against. Execution
/// itself (opcode dispatch, gas accounting, precompiled contracts beyond
/// the ledger-table family) is out of scope for this crate; this trait is
/// only the seam `commit_block` needs.
pub trait ExecutiveContext {
    fn memory_table_factory(&self) -> Arc<TableFactory>;

    /// Flushes the factory's overlay to durable storage and returns the
    /// combined content hash.
    fn db_commit(&self, block: &Block) -> Result<Hash, ChainError>;

    fn block_info(&self) -> (i64, Hash);

    fn get_precompiled(&self, address: Address) -> Option<Arc<dyn Precompiled>>;

    fn register_precompiled(&self, precompiled: Arc<dyn Precompiled>) -> Address;
}

/// Marker for a precompiled contract implementation. Concrete precompiled
/// contracts (beyond the ledger-table introspection family) are out of
/// scope; this exists only so `ExecutiveContext` has a concrete seam type.
pub trait Precompiled: Send + Sync {}

/// A minimal `ExecutiveContext` that does nothing beyond flushing the
/// table factory, for use where no separate execution layer is wired in
/// (e.g. tests, or a node that only runs the ledger without a VM).
pub struct SimpleExecutiveContext {
    factory: Arc<TableFactory>,
}

impl SimpleExecutiveContext {
    pub fn new(factory: Arc<TableFactory>) -> Self {
        Self { factory }
    }
}

impl ExecutiveContext for SimpleExecutiveContext {
    fn memory_table_factory(&self) -> Arc<TableFactory> {
        self.factory.clone()
    }

    fn db_commit(&self, block: &Block) -> Result<Hash, ChainError> {
        Ok(self.factory.commit_db(block.hash(), block.number())?)
    }

    fn block_info(&self) -> (i64, Hash) {
        (0, Hash::zero())
    }

    fn get_precompiled(&self, _address: Address) -> Option<Arc<dyn Precompiled>> {
        None
    }

    fn register_precompiled(&self, _precompiled: Arc<dyn Precompiled>) -> Address {
        Address::zero()
    }
}
