use std::{path::Path, time::Duration};

use bitcoin::{hashes::Hash, BlockHash};
use log::*;
use parking_lot::Mutex;

use crate::{
    ancestor::{self, get_ancestor},
    cache::BlockIndexCache,
    client::{self, Client},
    db::DB,
    index::{BlockIndex, BlockRow},
    locator::build_locator,
    partition::Partition,
    skip::skip_height,
    store::{self, BlockStore},
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("client failed: {0}")]
    Client(#[from] client::Error),

    #[error("store failed: {0}")]
    Store(#[from] store::Error),

    #[error("ancestor lookup failed: {0}")]
    Ancestor(#[from] ancestor::Error),

    #[error("block={hash} has unknown parent={prev}")]
    MissingParent { hash: BlockHash, prev: BlockHash },

    #[error("block={0} is already indexed")]
    AlreadyIndexed(BlockHash),

    #[error("block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("Genesis block hash mismatch: {0} != {1}")]
    ChainMismatch(BlockHash, BlockHash),
}

#[derive(Debug)]
pub struct Stats {
    pub tip: Option<BlockHash>,
    pub headers: usize,
    pub indexed_blocks: usize,
    pub elapsed: Duration,
}

impl Stats {
    fn new(tip: Option<BlockHash>) -> Self {
        Self {
            tip,
            headers: 0,
            indexed_blocks: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Block index of a single partition: commits blocks to the store and
/// answers ancestor and locator queries through the cache.
///
/// Can be shared by reader threads while another thread syncs it.
pub struct IndexedChain<S> {
    partition: Partition,
    cache: BlockIndexCache<S>,
    // last synced block on bitcoind's active chain
    cursor: Mutex<Option<BlockIndex>>,
}

impl IndexedChain<DB> {
    /// Open an existing DB, or create if missing.
    pub fn open(
        db_path: impl AsRef<Path>,
        partition: Partition,
        maturity_window: usize,
    ) -> Result<Self, Error> {
        let db_path = db_path.as_ref();
        info!(
            "index DB: {:?}, partition: {}, maturity window: {}",
            db_path, partition, maturity_window
        );
        let chain = Self::new(DB::open(db_path)?, partition, maturity_window);
        if let Some(tip) = chain.tip()? {
            info!("block={} height={} is the tip", tip.hash(), tip.height());
        }
        Ok(chain)
    }

    /// Mirror bitcoind's active chain, committing up to `limit` new headers.
    /// Compactions are started when no new blocks are indexed.
    /// Concurrent calls are serialized.
    pub fn sync_chain(&self, client: &Client, limit: usize) -> Result<Stats, Error> {
        let t = std::time::Instant::now();
        let mut synced = self.cursor.lock();
        let cursor = match *synced {
            Some(cursor) => Some(cursor),
            None => self.tip()?,
        };
        let mut stats = Stats::new(cursor.map(|c| c.hash()));

        let (blockhash, to_skip) = match cursor {
            Some(cursor) => {
                let fork = match self.fork_point(&cursor, |index| is_active(client, index))? {
                    Some(fork) => fork,
                    None => {
                        // not even genesis is part of bitcoind's active chain
                        let indexed = get_ancestor(&self.cache, &cursor, 0)?.hash();
                        let remote = client.get_blockhash_by_height(0)?;
                        return Err(Error::ChainMismatch(indexed, remote));
                    }
                };
                if fork.hash() != cursor.hash() {
                    warn!(
                        "block={} height={} is stale, resyncing from block={} height={}",
                        cursor.hash(),
                        cursor.height(),
                        fork.hash(),
                        fork.height()
                    );
                }
                // the fork point is already indexed
                (fork.hash(), 1)
            }
            None => (client.get_blockhash_by_height(0)?, 0),
        };

        let headers = client.get_headers(blockhash, limit)?;
        let mut last = None;
        for header in headers.into_iter().skip(to_skip) {
            let hash = header.block_hash();
            match self.commit_header(&header) {
                Ok(_) => stats.indexed_blocks += 1,
                Err(Error::AlreadyIndexed(_)) => debug!("block={} already indexed", hash),
                Err(e) => return Err(e),
            }
            stats.headers += 1;
            last = Some(hash);
        }
        if let Some(hash) = last {
            let index = self.cache.get(hash)?.ok_or(Error::BlockNotFound(hash))?;
            *synced = Some(index);
            stats.tip = Some(hash);
        }

        stats.elapsed = t.elapsed();
        if stats.indexed_blocks > 0 {
            self.cache.store().flush()?;
            info!(
                "block={} height={}: indexed {} blocks, dt = {:.3}[s]: {:.3} [ms/block]",
                stats.tip.unwrap_or_else(BlockHash::all_zeros),
                synced.map_or(0, |c| c.height()),
                stats.indexed_blocks,
                stats.elapsed.as_secs_f64(),
                stats.elapsed.as_secs_f64() * 1e3 / (stats.indexed_blocks as f64),
            );
        } else if stats.headers == 0 {
            // Start autocompactions when there are no new headers
            self.cache.store().start_compactions()?;
        }
        Ok(stats)
    }
}

fn is_active(client: &Client, index: &BlockIndex) -> Result<bool, Error> {
    match client.get_blockhash_by_height(index.height()) {
        Ok(hash) => Ok(hash == index.hash()),
        // above bitcoind's tip
        Err(client::Error::Http(ureq::Error::StatusCode(404))) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl<S: BlockStore> IndexedChain<S> {
    pub fn new(store: S, partition: Partition, maturity_window: usize) -> Self {
        Self {
            partition,
            cache: BlockIndexCache::new(store, maturity_window),
            cursor: Mutex::new(None),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn cache(&self) -> &BlockIndexCache<S> {
        &self.cache
    }

    /// Add a committed block to the in-memory index.
    pub fn register(&self, index: BlockIndex) {
        self.cache.add(index)
    }

    /// Derive the index entry of `header`, persist it and register it.
    pub fn commit_header(&self, header: &bitcoin::block::Header) -> Result<BlockIndex, Error> {
        let hash = header.block_hash();
        let index = if header.prev_blockhash == BlockHash::all_zeros() {
            BlockIndex::genesis(hash)
        } else {
            let prev = self
                .cache
                .get(header.prev_blockhash)?
                .ok_or(Error::MissingParent {
                    hash,
                    prev: header.prev_blockhash,
                })?;
            let height = prev.height() + 1;
            let skip = get_ancestor(&self.cache, &prev, skip_height(height))?;
            BlockIndex::new(hash, Some(prev.hash()), Some(skip.hash()), height)
        };
        let row = BlockRow::new(index, header.time, self.partition.prefix());
        if !self.cache.store().commit_block(&row)? {
            return Err(Error::AlreadyIndexed(hash));
        }
        self.register(index);
        Ok(index)
    }

    /// Ancestor of block `hash` at `height`, or `None` if the block is unknown.
    pub fn ancestor_at(&self, hash: BlockHash, height: usize) -> Result<Option<BlockIndex>, Error> {
        match self.cache.get(hash)? {
            Some(index) => Ok(Some(get_ancestor(&self.cache, &index, height)?)),
            None => Ok(None),
        }
    }

    /// Highest block of this partition.
    pub fn tip(&self) -> Result<Option<BlockIndex>, Error> {
        match self.cache.store().find_max_height(&self.partition)? {
            Some(hash) => Ok(Some(
                self.cache.get(hash)?.ok_or(Error::BlockNotFound(hash))?,
            )),
            None => Ok(None),
        }
    }

    /// Locator of `tip` (or of this partition's tip).
    /// Empty if the partition has no blocks yet.
    pub fn locate(&self, tip: Option<BlockHash>) -> Result<Vec<BlockHash>, Error> {
        let tip = match tip {
            Some(hash) => self.cache.get(hash)?.ok_or(Error::BlockNotFound(hash))?,
            None => match self.tip()? {
                Some(tip) => tip,
                None => return Ok(vec![]),
            },
        };
        Ok(build_locator(&self.cache, &tip)?)
    }

    /// Make sure the indexed genesis matches `expected`.
    pub fn check_genesis(&self, expected: BlockHash) -> Result<(), Error> {
        if let Some(tip) = self.tip()? {
            let genesis = get_ancestor(&self.cache, &tip, 0)?;
            if genesis.hash() != expected {
                return Err(Error::ChainMismatch(genesis.hash(), expected));
            }
        }
        Ok(())
    }

    /// First block of `from`'s locator that is still `active`.
    pub fn fork_point(
        &self,
        from: &BlockIndex,
        mut active: impl FnMut(&BlockIndex) -> Result<bool, Error>,
    ) -> Result<Option<BlockIndex>, Error> {
        for hash in build_locator(&self.cache, from)? {
            let index = self.cache.get(hash)?.ok_or(Error::BlockNotFound(hash))?;
            if active(&index)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}
