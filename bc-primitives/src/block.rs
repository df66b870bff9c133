use borsh::{BorshDeserialize, BorshSerialize};

use crate::hash::{hash_of, Hash};
use crate::transaction::{Receipt, Transaction};

pub type BlockNumber = i64;

/// Sealed header fields. The header's canonical encoding is what gets
/// hashed to produce the block hash; the body (transactions, receipts)
/// does not participate in the hash.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: BlockNumber,
    pub parent_hash: Hash,
    pub state_root: Hash,
    pub transactions_root: Hash,
    pub receipts_root: Hash,
    pub timestamp: u64,
    /// Sealer/miner node id for this block.
    pub sealer: u64,
    pub sealer_list: Vec<crate::hash::NodeId>,
    /// Free-form entries. `extra_data[0]` carries the group mark on the
    /// genesis block; later entries are reserved for future use.
    pub extra_data: Vec<Vec<u8>>,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        hash_of(self)
    }
}

/// A full block: sealed header plus the transactions and receipts it
/// carries. Immutable once constructed — there is no in-place mutation
/// after a block has been built, only whole-block replacement.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
    /// Signatures of the sealers that sealed this block (consensus
    /// artifact; consensus itself is out of scope here, this field only
    /// carries the data through).
    pub signature_list: Vec<crate::hash::NodeId>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> BlockNumber {
        self.header.number
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("in-memory borsh serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        Self::try_from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header(number: BlockNumber, parent_hash: Hash) -> BlockHeader {
        BlockHeader {
            number,
            parent_hash,
            state_root: Hash::zero(),
            transactions_root: Hash::zero(),
            receipts_root: Hash::zero(),
            timestamp: 1_700_000_000,
            sealer: 0,
            sealer_list: vec![],
            extra_data: vec![],
        }
    }

    #[test]
    fn block_hash_is_header_hash() {
        let header = sample_header(1, Hash::zero());
        let block = Block {
            header: header.clone(),
            transactions: vec![],
            receipts: vec![],
            signature_list: vec![],
        };
        assert_eq!(block.hash(), header.hash());
    }

    #[test]
    fn body_does_not_affect_hash() {
        let header = sample_header(1, Hash::zero());
        let empty = Block {
            header: header.clone(),
            transactions: vec![],
            receipts: vec![],
            signature_list: vec![],
        };
        let with_signatures = Block {
            header,
            transactions: vec![],
            receipts: vec![],
            signature_list: vec![crate::hash::NodeId::zero()],
        };
        assert_eq!(empty.hash(), with_signatures.hash());
    }

    #[test]
    fn different_parents_hash_differently() {
        let a = sample_header(1, Hash::zero());
        let b = sample_header(1, Hash([9u8; 32]));
        assert_ne!(a.hash(), b.hash());
    }
}
