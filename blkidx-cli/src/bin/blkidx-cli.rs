use blkidx::{
    bitcoin::BlockHash, client::Client, store::BlockStore, BlockIndex, IndexedChain, Network,
    Partition, DB, DEFAULT_MATURITY_WINDOW,
};
use clap::{Parser, Subcommand};
use log::*;
use std::{path::PathBuf, thread, time::Duration};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

#[derive(tabled::Tabled)]
struct Entry {
    height: usize,
    hash: String,
}

impl From<&BlockIndex> for Entry {
    fn from(index: &BlockIndex) -> Self {
        Self {
            height: index.height(),
            hash: index.hash().to_string(),
        }
    }
}

fn print_entries(entries: Vec<Entry>) {
    if entries.is_empty() {
        println!("no blocks indexed");
        return;
    }
    let mut tbl = tabled::Table::new(entries);
    tbl.with(tabled::settings::Style::rounded());
    tbl.modify(
        tabled::settings::object::Columns::first(),
        tabled::settings::Alignment::right(),
    );
    println!("{}", tbl);
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Block index with skip-pointer ancestor lookups
struct Args {
    #[arg(value_enum, short = 'n', long = "network", default_value_t = Network::Bitcoin)]
    network: Network,

    /// Directory for the RocksDB index (the network name is appended)
    #[arg(short = 'd', long = "db-dir", default_value = "db")]
    db_dir: PathBuf,

    /// bitcoind REST URL (default: localhost with the network's RPC port)
    #[arg(short = 'u', long = "url")]
    url: Option<String>,

    /// Branch identifier, separating chains that share one DB
    #[arg(short = 'b', long = "branch", default_value = "")]
    branch: String,

    /// Number of trailing heights kept in memory
    #[arg(short = 'm', long = "maturity", default_value_t = DEFAULT_MATURITY_WINDOW)]
    maturity_window: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index new headers from bitcoind
    Sync {
        /// Maximum number of headers fetched per request
        #[arg(short = 'l', long = "limit", default_value_t = 2000)]
        limit: usize,

        /// Exit after one sync is over
        #[arg(short = '1', long = "sync-once", default_value_t = false)]
        sync_once: bool,
    },
    /// Print the highest indexed block
    Tip,
    /// Print the locator of a block (default: the tip)
    Locator { hash: Option<BlockHash> },
    /// Print the ancestor of a block at a given height
    Ancestor { hash: BlockHash, height: usize },
}

fn entries<S: BlockStore>(chain: &IndexedChain<S>, hashes: &[BlockHash]) -> Result<Vec<Entry>> {
    hashes
        .iter()
        .map(|&hash| {
            let index = chain.cache().get(hash)?.ok_or("missing locator block")?;
            Ok(Entry::from(&index))
        })
        .collect()
}

fn sync(chain: &IndexedChain<DB>, client: &Client, limit: usize, once: bool) -> Result<()> {
    let genesis = client.get_blockhash_by_height(0)?;
    chain.check_genesis(genesis)?;
    let mut tip = None;
    loop {
        let new_tip = loop {
            let stats = chain.sync_chain(client, limit)?;
            if stats.headers == 0 {
                break stats.tip;
            }
        };
        if tip != new_tip {
            if let Some(hash) = new_tip {
                info!("synced to block={}", hash);
            }
            tip = new_tip;
        }
        if once {
            break;
        }
        thread::sleep(Duration::from_secs(1));
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::builder().format_timestamp_micros().init();

    let partition = Partition::new(args.network, args.branch);
    let db_path = args.db_dir.join(args.network.to_string());
    let chain = IndexedChain::open(db_path, partition, args.maturity_window)?;

    match args.command {
        Command::Sync { limit, sync_once } => {
            let url = args
                .url
                .unwrap_or_else(|| format!("http://localhost:{}", args.network.default_rpc_port()));
            let client = Client::with_url(url);
            sync(&chain, &client, limit, sync_once)?;
        }
        Command::Tip => {
            let tip = chain.tip()?;
            print_entries(tip.iter().map(Entry::from).collect());
        }
        Command::Locator { hash } => {
            let locator = chain.locate(hash)?;
            print_entries(entries(&chain, &locator)?);
        }
        Command::Ancestor { hash, height } => match chain.ancestor_at(hash, height)? {
            Some(index) => print_entries(vec![Entry::from(&index)]),
            None => warn!("block={} is not indexed", hash),
        },
    }
    Ok(())
}
