mod row;

use bitcoin::{hashes::Hash as _, BlockHash};

pub use row::{BlockRow, HeightRow};

/// Index entry of a committed block: its identity and the two links used for ancestor lookups.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct BlockIndex {
    hash: BlockHash,
    prev: Option<BlockHash>,
    skip: Option<BlockHash>,
    height: usize,
}

impl BlockIndex {
    pub fn new(
        hash: BlockHash,
        prev: Option<BlockHash>,
        skip: Option<BlockHash>,
        height: usize,
    ) -> Self {
        Self {
            hash,
            prev,
            skip,
            height,
        }
    }

    pub fn genesis(hash: BlockHash) -> Self {
        Self::new(hash, None, None, 0)
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }

    /// `None` only for genesis.
    pub fn prev(&self) -> Option<BlockHash> {
        self.prev
    }

    pub fn skip(&self) -> Option<BlockHash> {
        self.skip
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}

// All-zeros is never a valid block hash, so it encodes a missing link.
pub(crate) fn encode_link(link: Option<BlockHash>) -> [u8; BlockHash::LEN] {
    link.unwrap_or_else(BlockHash::all_zeros).to_byte_array()
}

pub(crate) fn decode_link(bytes: [u8; BlockHash::LEN]) -> Option<BlockHash> {
    let hash = BlockHash::from_byte_array(bytes);
    (hash != BlockHash::all_zeros()).then_some(hash)
}
