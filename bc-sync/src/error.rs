#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("chain error while syncing: {0}")]
    Chain(#[from] bc_chain::ChainError),
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Chain(err) => err.is_fatal(),
        }
    }
}
