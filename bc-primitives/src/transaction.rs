use borsh::{BorshDeserialize, BorshSerialize};

use crate::hash::{hash_of, Address, Hash};

/// A single signed transaction.
///
/// Execution semantics (gas accounting, opcode dispatch) are out of scope
/// here; this type only carries the fields the ledger and network layers
/// need to route, hash, and index a transaction.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub from: Address,
    /// `None` for a contract-creation transaction.
    pub to: Option<Address>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub gas_price: u64,
    pub payload: Vec<u8>,
    /// 65-byte recoverable ECDSA signature, `r || s || recovery_id`.
    pub signature: [u8; 65],
}

impl Transaction {
    /// `sha3()` of the transaction's canonical encoding, used as its wire
    /// identity and as the key into `_sys_tx_hash_2_block_`.
    pub fn sha3(&self) -> Hash {
        hash_of(self)
    }

    pub fn encode(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("in-memory borsh serialization cannot fail")
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        Self::try_from_slice(bytes)
    }
}

/// A receipt produced by the (out-of-scope) executor for one transaction.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub state_root: Hash,
    pub gas_used: u64,
    pub contract_address: Option<Address>,
    pub output: Vec<u8>,
    pub status: u32,
}

/// A transaction together with the coordinates of the block it was
/// committed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalisedTransaction {
    pub transaction: Transaction,
    pub block_hash: Hash,
    pub block_number: i64,
    pub transaction_index: usize,
}

/// A receipt together with the coordinates of the transaction and block it
/// belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalisedReceipt {
    pub receipt: Receipt,
    pub transaction_hash: Hash,
    pub block_hash: Hash,
    pub block_number: i64,
    pub transaction_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(nonce: u64) -> Transaction {
        Transaction {
            from: Address([1u8; 20]),
            to: Some(Address([2u8; 20])),
            nonce,
            gas_limit: 21000,
            gas_price: 1,
            payload: vec![],
            signature: [0u8; 65],
        }
    }

    #[test]
    fn encode_decode_roundtrip_preserves_hash() {
        let tx = sample_tx(1);
        let encoded = tx.encode();
        let decoded = Transaction::decode(&encoded).unwrap();
        assert_eq!(tx, decoded);
        assert_eq!(tx.sha3(), decoded.sha3());
    }

    #[test]
    fn distinct_transactions_hash_differently() {
        assert_ne!(sample_tx(1).sha3(), sample_tx(2).sha3());
    }
}
