use std::{
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use bitcoin::{hashes::Hash, BlockHash};
use log::*;

use crate::{
    index::{BlockIndex, BlockRow, HeightRow},
    partition::Partition,
    store::{BlockStore, Error},
};

pub struct DB {
    db: rocksdb::DB,
    compacting: AtomicBool,
}

fn default_opts() -> rocksdb::Options {
    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Level);
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts.set_max_open_files(256);
    opts.set_keep_log_file_num(10);
    opts.set_disable_auto_compactions(true);

    let parallelism = std::thread::available_parallelism()
        .ok()
        .and_then(|v| u16::try_from(v.get()).ok())
        .unwrap_or(2)
        .clamp(1, 8);
    opts.increase_parallelism(parallelism.into());
    opts.set_max_subcompactions(parallelism.into());
    opts
}

const BLOCKS_CF: &str = "blocks";
const HEIGHTS_CF: &str = "heights";

const COLUMN_FAMILIES: &[&str] = &[BLOCKS_CF, HEIGHTS_CF];

fn cf_descriptors(
    opts: &rocksdb::Options,
) -> impl IntoIterator<Item = rocksdb::ColumnFamilyDescriptor> + '_ {
    COLUMN_FAMILIES
        .iter()
        .map(|&name| rocksdb::ColumnFamilyDescriptor::new(name, opts.clone()))
}

impl DB {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let opts = default_opts();
        let db = rocksdb::DB::open_cf_descriptors(&opts, path, cf_descriptors(&opts))?;

        let store = Self {
            db,
            compacting: AtomicBool::new(false),
        };
        for &cf_name in COLUMN_FAMILIES {
            let cf = store.cf(cf_name);
            let metadata = store.db.get_column_family_metadata_cf(cf);
            info!(
                "CF {}: {} files, {:.6} MBs",
                cf_name,
                metadata.file_count,
                metadata.size as f64 / 1e6
            );
        }
        Ok(store)
    }

    fn cf(&self, name: &str) -> &rocksdb::ColumnFamily {
        self.db
            .cf_handle(name)
            .unwrap_or_else(|| panic!("missing CF: {}", name))
    }

    pub fn flush(&self) -> Result<(), Error> {
        let opts = rocksdb::FlushOptions::new();
        for cf in COLUMN_FAMILIES {
            self.db.flush_cf_opt(self.cf(cf), &opts)?;
        }
        Ok(())
    }

    pub fn start_compactions(&self) -> Result<(), Error> {
        if !self.compacting.swap(true, Ordering::SeqCst) {
            const OPTION: (&str, &str) = ("disable_auto_compactions", "false");
            for &cf_name in COLUMN_FAMILIES {
                let cf = self.cf(cf_name);
                if let Err(e) = self.db.set_options_cf(cf, &[OPTION]) {
                    self.compacting.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }
            info!("started auto compactions");
        }
        Ok(())
    }

    fn get_row(&self, hash: BlockHash) -> Result<Option<BlockRow>, Error> {
        let value = match self.db.get_pinned_cf(self.cf(BLOCKS_CF), hash.as_byte_array())? {
            Some(value) => value,
            None => return Ok(None),
        };
        let value: [u8; BlockRow::VALUE_LEN] = value[..].try_into().map_err(|_| Error::Corrupted {
            cf: BLOCKS_CF,
            len: value.len(),
        })?;
        Ok(Some(BlockRow::deserialize((hash.to_byte_array(), value))))
    }
}

impl BlockStore for DB {
    fn find_block(&self, hash: BlockHash) -> Result<Option<BlockIndex>, Error> {
        Ok(self.get_row(hash)?.map(|row| *row.index()))
    }

    fn find_max_height(&self, partition: &Partition) -> Result<Option<BlockHash>, Error> {
        let prefix = partition.prefix();
        let last = HeightRow::last(prefix);
        let mode = rocksdb::IteratorMode::From(&last[..], rocksdb::Direction::Reverse);
        let key = match self.db.iterator_cf(self.cf(HEIGHTS_CF), mode).next() {
            Some(kv) => kv?.0,
            None => return Ok(None),
        };
        let bytes: [u8; HeightRow::LEN] = key[..].try_into().map_err(|_| Error::Corrupted {
            cf: HEIGHTS_CF,
            len: key.len(),
        })?;
        let row = HeightRow::from_bytes(bytes);
        if row.prefix() != prefix {
            return Ok(None); // no blocks in this partition
        }
        Ok(Some(row.hash()))
    }

    fn commit_block(&self, row: &BlockRow) -> Result<bool, Error> {
        let hash = row.index().hash();
        if self.get_row(hash)?.is_some() {
            return Ok(false);
        }
        let mut write_batch = rocksdb::WriteBatch::default();
        let (key, value) = row.serialize();
        write_batch.put_cf(self.cf(BLOCKS_CF), key, value);
        write_batch.put_cf(self.cf(HEIGHTS_CF), row.height_row().key(), b"");

        let mut opts = rocksdb::WriteOptions::default();
        opts.disable_wal(false);
        self.db.write_opt(write_batch, &opts)?;
        debug!("committed block={} height={}", hash, row.index().height());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::partition::Network;

    use super::*;

    fn hash(b: u8) -> BlockHash {
        BlockHash::from_byte_array([b; 32])
    }

    fn row(partition: &Partition, index: BlockIndex, time: u32) -> BlockRow {
        BlockRow::new(index, time, partition.prefix())
    }

    #[test]
    fn test_commit_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        let p = Partition::new(Network::Regtest, "");

        let genesis = BlockIndex::genesis(hash(1));
        let child = BlockIndex::new(hash(2), Some(hash(1)), Some(hash(1)), 1);
        assert!(db.commit_block(&row(&p, genesis, 100)).unwrap());
        assert!(db.commit_block(&row(&p, child, 200)).unwrap());
        db.flush().unwrap();

        assert_eq!(db.find_block(hash(1)).unwrap(), Some(genesis));
        assert_eq!(db.find_block(hash(2)).unwrap(), Some(child));
        assert_eq!(db.find_block(hash(3)).unwrap(), None);
        assert_eq!(db.find_max_height(&p).unwrap(), Some(hash(2)));
    }

    #[test]
    fn test_duplicate_commit() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        let p = Partition::new(Network::Regtest, "");
        let genesis = BlockIndex::genesis(hash(1));
        assert!(db.commit_block(&row(&p, genesis, 100)).unwrap());
        // the first record stays in place
        let other = BlockIndex::new(hash(1), Some(hash(9)), None, 5);
        assert!(!db.commit_block(&row(&p, other, 100)).unwrap());
        assert_eq!(db.find_block(hash(1)).unwrap(), Some(genesis));
    }

    #[test]
    fn test_max_height_per_partition() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        let a = Partition::new(Network::Regtest, "a");
        let b = Partition::new(Network::Regtest, "b");
        let empty = Partition::new(Network::Regtest, "c");

        db.commit_block(&row(&a, BlockIndex::new(hash(10), Some(hash(9)), None, 7), 100))
            .unwrap();
        db.commit_block(&row(&b, BlockIndex::new(hash(20), Some(hash(19)), None, 7), 50))
            .unwrap();
        db.commit_block(&row(&b, BlockIndex::new(hash(21), Some(hash(18)), None, 6), 10))
            .unwrap();

        assert_eq!(db.find_max_height(&a).unwrap(), Some(hash(10)));
        assert_eq!(db.find_max_height(&b).unwrap(), Some(hash(20)));
        assert_eq!(db.find_max_height(&empty).unwrap(), None);
    }

    #[test]
    fn test_max_height_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        let p = Partition::new(Network::Bitcoin, "");
        let late = BlockIndex::new(hash(5), Some(hash(1)), None, 3);
        let early = BlockIndex::new(hash(4), Some(hash(2)), None, 3);
        let lower = BlockIndex::new(hash(6), Some(hash(3)), None, 2);
        db.commit_block(&row(&p, late, 2000)).unwrap();
        db.commit_block(&row(&p, early, 1000)).unwrap();
        db.commit_block(&row(&p, lower, 10)).unwrap();
        assert_eq!(db.find_max_height(&p).unwrap(), Some(hash(4)));
    }

    #[test]
    fn test_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let p = Partition::new(Network::Signet, "");
        let genesis = BlockIndex::genesis(hash(1));
        {
            let db = DB::open(dir.path()).unwrap();
            db.commit_block(&row(&p, genesis, 1)).unwrap();
            db.flush().unwrap();
        }
        let db = DB::open(dir.path()).unwrap();
        assert_eq!(db.find_block(hash(1)).unwrap(), Some(genesis));
        assert_eq!(db.find_max_height(&p).unwrap(), Some(hash(1)));
    }

    #[test]
    fn test_shared_while_compacting() {
        let dir = tempfile::tempdir().unwrap();
        let db = DB::open(dir.path()).unwrap();
        let p = Partition::new(Network::Regtest, "");
        std::thread::scope(|s| {
            s.spawn(|| db.start_compactions().unwrap());
            s.spawn(|| db.start_compactions().unwrap());
            s.spawn(|| {
                for b in 1..50 {
                    let index = BlockIndex::new(hash(b), Some(hash(b - 1)), None, b.into());
                    assert!(db.commit_block(&row(&p, index, 0)).unwrap());
                }
            });
        });
        assert!(db.compacting.load(Ordering::SeqCst));
        assert_eq!(db.find_max_height(&p).unwrap(), Some(hash(49)));
    }
}
