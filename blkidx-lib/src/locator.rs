use bitcoin::BlockHash;
use log::*;

use crate::{
    ancestor::{self, get_ancestor},
    cache::BlockIndexCache,
    index::BlockIndex,
    store::{self, BlockStore},
};

/// Summarize the ancestry of `tip`: the last 10 blocks, then exponentially
/// larger steps back, ending at genesis.
///
/// A broken chain truncates the locator instead of failing it.
pub fn build_locator<S: BlockStore>(
    cache: &BlockIndexCache<S>,
    tip: &BlockIndex,
) -> Result<Vec<BlockHash>, store::Error> {
    let mut step = 1;
    let mut block = *tip;
    let mut locator = Vec::with_capacity(32);
    loop {
        locator.push(block.hash());
        if block.is_genesis() {
            break;
        }
        let height = block.height().saturating_sub(step);
        block = match get_ancestor(cache, &block, height) {
            Ok(ancestor) => ancestor,
            Err(ancestor::Error::Store(e)) => return Err(e),
            Err(e) => {
                warn!("locator of block={} truncated: {}", tip.hash(), e);
                break;
            }
        };
        if locator.len() > 10 {
            step *= 2;
        }
    }
    Ok(locator)
}
