pub use bitcoin;

pub mod ancestor;
pub mod cache;
pub mod chain;
pub mod client;
pub mod index;
pub mod locator;
pub mod partition;
pub mod skip;
pub mod store;

mod db;

pub use cache::{BlockIndexCache, DEFAULT_MATURITY_WINDOW};
pub use chain::{IndexedChain, Stats};
pub use db::DB;
pub use index::BlockIndex;
pub use partition::{Network, Partition};
