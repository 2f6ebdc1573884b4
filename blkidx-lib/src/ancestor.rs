use bitcoin::BlockHash;

use crate::{
    cache::BlockIndexCache,
    index::BlockIndex,
    skip::{skip_height, Hop},
    store::{self, BlockStore},
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("height={height} is above start height={start}")]
    InvalidRange { height: usize, start: usize },

    #[error("broken chain at block={hash} height={height}")]
    BrokenChain { hash: BlockHash, height: usize },

    #[error("store failed: {0}")]
    Store(#[from] store::Error),
}

/// Find the ancestor of `start` at `height`, following skip pointers where possible.
///
/// Takes O(log(start.height - height)) lookups on average.
pub fn get_ancestor<S: BlockStore>(
    cache: &BlockIndexCache<S>,
    start: &BlockIndex,
    height: usize,
) -> Result<BlockIndex, Error> {
    if height > start.height() {
        return Err(Error::InvalidRange {
            height,
            start: start.height(),
        });
    }
    let mut walk = *start;
    while walk.height() > height {
        let (next, next_height) = match Hop::choose(walk.height(), height, walk.skip().is_some())
        {
            Hop::Skip => (walk.skip(), skip_height(walk.height())),
            Hop::Parent => (walk.prev(), walk.height() - 1),
        };
        // only genesis may lack a parent
        let next = next.ok_or_else(|| Error::BrokenChain {
            hash: walk.hash(),
            height: walk.height(),
        })?;
        walk = match cache.get(next)? {
            Some(index) if index.height() == next_height => index,
            _ => {
                return Err(Error::BrokenChain {
                    hash: next,
                    height: next_height,
                })
            }
        };
    }
    Ok(walk)
}
