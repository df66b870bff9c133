//! The ledger: read-only chain view, bounded block cache, and the single
//! committer that linearizes block appends onto a `bc_store::TableFactory`.

mod cache;
mod cns;
mod committer;
mod error;
mod ledger;
pub mod system_tables;

pub use cache::BlockCache;
pub use cns::CnsEntry;
pub use committer::{CommitResult, ExecutiveContext, Precompiled, SimpleExecutiveContext};
pub use error::ChainError;
pub use ledger::Ledger;
