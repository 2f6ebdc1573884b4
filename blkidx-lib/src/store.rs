use bitcoin::BlockHash;

use crate::{
    index::{BlockIndex, BlockRow},
    partition::Partition,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("RocksDB failed: {0}")]
    RocksDB(#[from] rocksdb::Error),

    #[error("corrupted {cf} row: {len} bytes")]
    Corrupted { cf: &'static str, len: usize },
}

/// Durable, authoritative storage of committed blocks.
///
/// Lookups are synchronous and never retried here.
pub trait BlockStore {
    fn find_block(&self, hash: BlockHash) -> Result<Option<BlockIndex>, Error>;

    /// Highest block of `partition`, the earliest committed one in case of a tie.
    fn find_max_height(&self, partition: &Partition) -> Result<Option<BlockHash>, Error>;

    /// Returns `false` (and writes nothing) if the block is already committed.
    fn commit_block(&self, row: &BlockRow) -> Result<bool, Error>;
}

impl<T: BlockStore + ?Sized> BlockStore for &T {
    fn find_block(&self, hash: BlockHash) -> Result<Option<BlockIndex>, Error> {
        (**self).find_block(hash)
    }

    fn find_max_height(&self, partition: &Partition) -> Result<Option<BlockHash>, Error> {
        (**self).find_max_height(partition)
    }

    fn commit_block(&self, row: &BlockRow) -> Result<bool, Error> {
        (**self).commit_block(row)
    }
}
