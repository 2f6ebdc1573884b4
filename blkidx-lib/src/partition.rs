use bitcoin::hashes::Hash;
use clap::ValueEnum;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug)]
pub enum Network {
    Bitcoin,
    Testnet,
    Testnet4,
    Signet,
    Regtest,
}

impl From<Network> for bitcoin::Network {
    fn from(value: Network) -> Self {
        match value {
            Network::Bitcoin => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Testnet4 => bitcoin::Network::Testnet4,
            Network::Signet => bitcoin::Network::Signet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl Network {
    pub fn default_rpc_port(&self) -> u16 {
        match self {
            Network::Bitcoin => 8332,
            Network::Testnet => 18332,
            Network::Testnet4 => 48332,
            Network::Signet => 38332,
            Network::Regtest => 18443,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        std::fmt::Display::fmt(&bitcoin::Network::from(*self), f)
    }
}

bitcoin::hashes::hash_newtype! {
    /// Digest of a partition key, used to tag durable rows.
    pub struct PartitionHash(bitcoin::hashes::sha256::Hash);
}

/// Separates independent chains (or branches of one chain) sharing a single store.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Partition {
    network: Network,
    branch: String,
}

impl Partition {
    pub fn new(network: Network, branch: impl Into<String>) -> Self {
        Self {
            network,
            branch: branch.into(),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn prefix(&self) -> Prefix {
        let key = format!("{}/{}", self.network, self.branch);
        Prefix::new(PartitionHash::hash(key.as_bytes()).as_byte_array())
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if self.branch.is_empty() {
            write!(f, "{}", self.network)
        } else {
            write!(f, "{}/{}", self.network, self.branch)
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash)]
pub struct Prefix([u8; Prefix::LEN]);

impl Prefix {
    pub const LEN: usize = 8;

    fn new(hash: &[u8]) -> Self {
        Self(hash[..Prefix::LEN].try_into().unwrap())
    }

    pub fn from_bytes(bytes: [u8; Prefix::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Prefix::LEN] {
        &self.0
    }
}
