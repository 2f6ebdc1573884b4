use std::collections::HashMap;

use bitcoin::BlockHash;
use log::*;
use parking_lot::RwLock;

use crate::{
    index::BlockIndex,
    store::{BlockStore, Error},
};

/// Number of trailing heights kept in memory (the coinbase maturity).
pub const DEFAULT_MATURITY_WINDOW: usize = 100;

/// Recently registered blocks, backed by the durable store.
///
/// The cache is filled only by [`BlockIndexCache::add`], so its contents follow
/// the commit order regardless of which blocks are being queried.
/// Readers may run concurrently with a single writer.
pub struct BlockIndexCache<S> {
    store: S,
    blocks: RwLock<HashMap<BlockHash, BlockIndex>>,
    maturity_window: usize,
}

impl<S: BlockStore> BlockIndexCache<S> {
    pub fn new(store: S, maturity_window: usize) -> Self {
        Self {
            store,
            blocks: RwLock::new(HashMap::new()),
            maturity_window,
        }
    }

    /// Look up `hash` in memory, falling back to the store (without caching the result).
    ///
    /// `Ok(None)` means the block is unknown, e.g. the predecessor of genesis.
    pub fn get(&self, hash: BlockHash) -> Result<Option<BlockIndex>, Error> {
        if let Some(index) = self.blocks.read().get(&hash) {
            return Ok(Some(*index));
        }
        self.store.find_block(hash)
    }

    /// Register a committed block and evict the blocks that fell below the maturity window.
    pub fn add(&self, index: BlockIndex) {
        let maturity_height = index.height().saturating_sub(self.maturity_window);
        let mut blocks = self.blocks.write();
        blocks.insert(index.hash(), index);

        let stale: Vec<BlockHash> = blocks
            .values()
            .filter(|b| b.height() < maturity_height)
            .map(BlockIndex::hash)
            .collect();
        for hash in &stale {
            blocks.remove(hash);
        }
        if !stale.is_empty() {
            debug!(
                "evicted {} blocks below height={}, {} cached",
                stale.len(),
                maturity_height,
                blocks.len()
            );
        }
    }

    pub fn contains(&self, hash: BlockHash) -> bool {
        self.blocks.read().contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }

    pub fn maturity_window(&self) -> usize {
        self.maturity_window
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bitcoin::hashes::Hash;

    use super::*;
    use crate::{
        ancestor::get_ancestor,
        index::BlockRow,
        locator::build_locator,
        partition::{Network, Partition},
        skip::skip_height,
        store::memory::MemoryStore,
    };

    pub fn block_hash(height: usize) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&(height as u64 + 1).to_le_bytes());
        BlockHash::from_byte_array(bytes)
    }

    fn linear_index(height: usize) -> BlockIndex {
        if height == 0 {
            return BlockIndex::genesis(block_hash(0));
        }
        BlockIndex::new(
            block_hash(height),
            Some(block_hash(height - 1)),
            Some(block_hash(skip_height(height))),
            height,
        )
    }

    /// Commit the block at `height` of the linear chain, then register it.
    fn commit_linear(cache: &BlockIndexCache<MemoryStore>, height: usize) {
        let index = linear_index(height);
        let prefix = Partition::new(Network::Regtest, "").prefix();
        let row = BlockRow::new(index, height as u32, prefix);
        assert!(cache.store().commit_block(&row).unwrap());
        cache.add(index);
    }

    /// Linear chain `0..len`, committed to a fresh store and registered in order.
    pub fn linear_chain(len: usize, window: usize) -> BlockIndexCache<MemoryStore> {
        let cache = BlockIndexCache::new(MemoryStore::default(), window);
        for height in 0..len {
            commit_linear(&cache, height);
        }
        cache
    }

    #[test]
    fn test_get_cached() {
        let cache = linear_chain(10, 100);
        assert_eq!(cache.len(), 10);
        let lookups = cache.store().lookups();
        let index = cache.get(block_hash(7)).unwrap().unwrap();
        assert_eq!(index.height(), 7);
        assert_eq!(index.prev(), Some(block_hash(6)));
        assert_eq!(cache.store().lookups(), lookups);
    }

    #[test]
    fn test_get_not_found() {
        let cache = linear_chain(3, 100);
        let missing = BlockHash::from_byte_array([0xAA; 32]);
        assert_eq!(cache.get(missing).unwrap(), None);
    }

    #[test]
    fn test_miss_is_not_cached() {
        let cache = linear_chain(300, 100);
        assert!(!cache.contains(block_hash(10)));
        let index = cache.get(block_hash(10)).unwrap().unwrap();
        assert_eq!(index.height(), 10);
        assert!(!cache.contains(block_hash(10)));
    }

    #[test]
    fn test_no_eviction_within_window() {
        let cache = linear_chain(101, 100);
        // registering height 100 evicts nothing below height 0
        assert_eq!(cache.len(), 101);
        assert!(cache.contains(block_hash(0)));
        assert!(cache.contains(block_hash(100)));
    }

    #[test]
    fn test_eviction() {
        let cache = linear_chain(251, 100);
        // registering height 250 keeps heights 150..=250
        assert_eq!(cache.len(), 101);
        assert!(!cache.contains(block_hash(149)));
        assert!(cache.contains(block_hash(150)));
        assert!(cache.contains(block_hash(250)));
        // evicted blocks are still in the store
        assert_eq!(cache.store().len(), 251);
        assert_eq!(cache.get(block_hash(0)).unwrap().unwrap().height(), 0);
    }

    #[test]
    fn test_eviction_after_jump() {
        let cache = linear_chain(120, 100);
        let far = BlockIndex::new(block_hash(250), Some(block_hash(249)), None, 250);
        cache.add(far);
        assert!(cache.contains(block_hash(250)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_add_overwrites() {
        let cache = BlockIndexCache::new(MemoryStore::default(), 10);
        let hash = block_hash(5);
        cache.add(BlockIndex::new(hash, Some(block_hash(4)), None, 5));
        cache.add(BlockIndex::new(hash, Some(block_hash(4)), Some(block_hash(4)), 5));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(hash).unwrap().unwrap().skip(), Some(block_hash(4)));
    }

    #[test]
    fn test_concurrent_readers() {
        let cache = linear_chain(50, 100);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for height in 0..50 {
                        let index = cache.get(block_hash(height)).unwrap().unwrap();
                        assert_eq!(index.height(), height);
                    }
                });
            }
            s.spawn(|| {
                for height in 50..60 {
                    cache.add(BlockIndex::new(
                        block_hash(height),
                        Some(block_hash(height - 1)),
                        None,
                        height,
                    ));
                }
            });
        });
        assert_eq!(cache.len(), 60);
    }

    #[test]
    fn test_readers_during_eviction() {
        let window = 10;
        let cache = linear_chain(50, window);
        let tip = cache.get(block_hash(49)).unwrap().unwrap();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..20 {
                        for height in (0..=49).rev() {
                            let ancestor = get_ancestor(&cache, &tip, height).unwrap();
                            assert_eq!(ancestor.hash(), block_hash(height));
                        }
                        let locator = build_locator(&cache, &tip).unwrap();
                        assert_eq!(locator.first(), Some(&block_hash(49)));
                        assert_eq!(locator.last(), Some(&block_hash(0)));
                    }
                });
            }
            s.spawn(|| {
                for height in 50..2000 {
                    commit_linear(&cache, height);
                    assert!(cache.len() <= window + 1);
                }
            });
        });
        // everything the readers walked through is now evicted
        assert_eq!(cache.len(), window + 1);
        assert!(!cache.contains(block_hash(49)));
        assert!(cache.contains(block_hash(1999 - window)));
    }
}
