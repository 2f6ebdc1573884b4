use bitcoin::{hashes::Hash as _, BlockHash};

use crate::{
    index::{decode_link, encode_link, BlockIndex},
    partition::Prefix,
};

const HASH_LEN: usize = BlockHash::LEN;
const HEIGHT_LEN: usize = std::mem::size_of::<u64>();
const TIME_LEN: usize = std::mem::size_of::<u32>();

/// Durable form of a committed block, keyed by its hash.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BlockRow {
    index: BlockIndex,
    time: u32,
    prefix: Prefix,
}

type SerializedBlockRow = (
    [u8; HASH_LEN],
    [u8; 2 * HASH_LEN + HEIGHT_LEN + TIME_LEN + Prefix::LEN],
);

impl BlockRow {
    pub const VALUE_LEN: usize = 2 * HASH_LEN + HEIGHT_LEN + TIME_LEN + Prefix::LEN;

    pub fn new(index: BlockIndex, time: u32, prefix: Prefix) -> Self {
        Self {
            index,
            time,
            prefix,
        }
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn time(&self) -> u32 {
        self.time
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn height_row(&self) -> HeightRow {
        HeightRow::new(self.prefix, self.index.height(), self.time, self.index.hash())
    }

    pub fn serialize(&self) -> SerializedBlockRow {
        let key = self.index.hash().to_byte_array();
        let mut value = [0u8; Self::VALUE_LEN];
        let (prev, rest) = value.split_at_mut(HASH_LEN);
        let (skip, rest) = rest.split_at_mut(HASH_LEN);
        let (height, rest) = rest.split_at_mut(HEIGHT_LEN);
        let (time, prefix) = rest.split_at_mut(TIME_LEN);
        prev.copy_from_slice(&encode_link(self.index.prev()));
        skip.copy_from_slice(&encode_link(self.index.skip()));
        height.copy_from_slice(&(self.index.height() as u64).to_be_bytes());
        time.copy_from_slice(&self.time.to_be_bytes());
        prefix.copy_from_slice(self.prefix.as_bytes());
        (key, value)
    }

    pub fn deserialize((key, value): SerializedBlockRow) -> Self {
        let (prev, rest) = value.split_at(HASH_LEN);
        let (skip, rest) = rest.split_at(HASH_LEN);
        let (height, rest) = rest.split_at(HEIGHT_LEN);
        let (time, prefix) = rest.split_at(TIME_LEN);
        let height = u64::from_be_bytes(height.try_into().unwrap());
        let index = BlockIndex::new(
            BlockHash::from_byte_array(key),
            decode_link(prev.try_into().unwrap()),
            decode_link(skip.try_into().unwrap()),
            height.try_into().unwrap(),
        );
        Self {
            index,
            time: u32::from_be_bytes(time.try_into().unwrap()),
            prefix: Prefix::from_bytes(prefix.try_into().unwrap()),
        }
    }
}

/// Per-partition ordering key: `prefix | height | !time | hash`.
///
/// Scanning a partition's rows backwards yields the highest block first,
/// and among blocks of equal height the earliest committed one (the time is
/// stored inverted).
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub struct HeightRow {
    bytes: [u8; HeightRow::LEN],
}

impl HeightRow {
    pub const LEN: usize = Prefix::LEN + HEIGHT_LEN + TIME_LEN + HASH_LEN;

    pub fn new(prefix: Prefix, height: usize, time: u32, hash: BlockHash) -> Self {
        let mut bytes = [0u8; Self::LEN];
        let (p, rest) = bytes.split_at_mut(Prefix::LEN);
        let (h, rest) = rest.split_at_mut(HEIGHT_LEN);
        let (t, b) = rest.split_at_mut(TIME_LEN);
        p.copy_from_slice(prefix.as_bytes());
        h.copy_from_slice(&(height as u64).to_be_bytes());
        t.copy_from_slice(&(u32::MAX - time).to_be_bytes());
        b.copy_from_slice(hash.as_byte_array());
        Self { bytes }
    }

    /// Upper bound of all keys belonging to `prefix`.
    pub fn last(prefix: Prefix) -> [u8; Self::LEN] {
        let mut bytes = [0xFF; Self::LEN];
        bytes[..Prefix::LEN].copy_from_slice(prefix.as_bytes());
        bytes
    }

    pub fn key(&self) -> &[u8] {
        &self.bytes
    }

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self { bytes }
    }

    pub fn prefix(&self) -> Prefix {
        Prefix::from_bytes(self.bytes[..Prefix::LEN].try_into().unwrap())
    }

    pub fn height(&self) -> usize {
        let offset = Prefix::LEN;
        let bytes = self.bytes[offset..offset + HEIGHT_LEN].try_into().unwrap();
        u64::from_be_bytes(bytes).try_into().unwrap()
    }

    pub fn hash(&self) -> BlockHash {
        BlockHash::from_byte_array(self.bytes[Self::LEN - HASH_LEN..].try_into().unwrap())
    }
}
