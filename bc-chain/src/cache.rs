use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bc_primitives::{Block, Hash};
use parking_lot::RwLock;

/// FIFO-capped map from block hash to the decoded block, capacity 10. No
/// LRU promotion: a block that's read again does not move to the back of
/// the eviction queue, only insertion order matters.
pub struct BlockCache {
    capacity: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    blocks: HashMap<Hash, Arc<Block>>,
    order: VecDeque<Hash>,
}

const DEFAULT_CAPACITY: usize = 10;

impl Default for BlockCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl BlockCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner { blocks: HashMap::new(), order: VecDeque::new() }),
        }
    }

    pub fn get(&self, hash: &Hash) -> Option<Arc<Block>> {
        self.inner.read().blocks.get(hash).cloned()
    }

    pub fn add(&self, block: Arc<Block>) {
        let mut inner = self.inner.write();
        let hash = block.hash();

        if inner.blocks.contains_key(&hash) {
            return;
        }

        if inner.order.len() >= self.capacity {
            if let Some(front) = inner.order.pop_front() {
                inner.blocks.remove(&front);
            }
        }

        // Defensive: if eviction still left us over capacity (should not
        // happen under single-writer use), drop everything rather than
        // leave the two structures inconsistent.
        if inner.order.len() >= self.capacity {
            inner.blocks.clear();
            inner.order.clear();
        }

        inner.order.push_back(hash);
        inner.blocks.insert(hash, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_primitives::BlockHeader;

    fn block_with_number(number: i64) -> Arc<Block> {
        Arc::new(Block {
            header: BlockHeader {
                number,
                parent_hash: Hash::zero(),
                state_root: Hash::zero(),
                transactions_root: Hash::zero(),
                receipts_root: Hash::zero(),
                timestamp: 0,
                sealer: 0,
                sealer_list: vec![],
                extra_data: vec![vec![number as u8]],
            },
            transactions: vec![],
            receipts: vec![],
            signature_list: vec![],
        })
    }

    #[test]
    fn evicts_oldest_first_once_over_capacity() {
        let cache = BlockCache::with_capacity(2);
        let b1 = block_with_number(1);
        let b2 = block_with_number(2);
        let b3 = block_with_number(3);

        cache.add(b1.clone());
        cache.add(b2.clone());
        cache.add(b3.clone());

        assert!(cache.get(&b1.hash()).is_none());
        assert!(cache.get(&b2.hash()).is_some());
        assert!(cache.get(&b3.hash()).is_some());
    }

    #[test]
    fn reading_does_not_promote_entry() {
        let cache = BlockCache::with_capacity(2);
        let b1 = block_with_number(1);
        let b2 = block_with_number(2);
        let b3 = block_with_number(3);

        cache.add(b1.clone());
        cache.add(b2.clone());
        let _ = cache.get(&b1.hash());
        cache.add(b3.clone());

        assert!(cache.get(&b1.hash()).is_none());
    }
}
