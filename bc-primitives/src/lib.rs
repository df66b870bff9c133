//! Core data model shared by the store, chain, network, and sync crates:
//! fixed-size identifiers, block and transaction shapes, and the genesis
//! parameters a group is bootstrapped from.

mod block;
mod genesis;
mod hash;
mod transaction;

pub use block::{Block, BlockHeader, BlockNumber};
pub use genesis::{parse_group_mark, GenesisBlockParam, GroupMarkError, GroupMarkFields};
pub use hash::{hash_of, Address, Hash, NodeId, ParseFixedBytesError};
pub use transaction::{LocalisedReceipt, LocalisedTransaction, Receipt, Transaction};
