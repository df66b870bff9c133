#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("table store error: {0}")]
    Store(#[from] bc_store::StoreError),

    /// A system table failed to open mid-commit. Fatal: the factory may be
    /// left partially flushed, so the caller must halt rather than retry.
    #[error("fatal: failed to open system table {0} while committing a block")]
    OpenSysTableFailed(String),

    /// A system-table value that should always parse as a well-formed
    /// integer did not. Corruption of ledger state, not a recoverable
    /// condition.
    #[error("fatal: corrupted system table value in {table}.{key}: {value:?}")]
    CorruptSystemTable { table: &'static str, key: String, value: String },

    #[error("malformed group mark: {0}")]
    GroupMark(#[from] bc_primitives::GroupMarkError),
}

impl ChainError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ChainError::OpenSysTableFailed(_) | ChainError::CorruptSystemTable { .. })
    }
}
