use std::collections::HashSet;

use bc_primitives::{Hash, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("transaction pool is full")]
    PoolFull,
    #[error("transaction already known")]
    AlreadyKnown,
    #[error("invalid transaction: {0}")]
    Invalid(String),
}

/// The transaction pool's admission policy is out of scope here; the sync
/// engine only needs to pull candidates to gossip and hand off anything a
/// peer sends it.
pub trait TxPool: Send + Sync {
    fn pending(&self, limit: usize, exclude: &HashSet<Hash>) -> Vec<Transaction>;

    fn import(&self, transaction: Transaction) -> Result<(), ImportError>;
}
