//! Network selection, backend profiles and per-build node configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Default peer-to-peer listening address for every network.
pub const DEFAULT_LISTENING_ADDRESS: &str = "0.0.0.0:9735";

/// The Bitcoin network a node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSelection {
    /// Bitcoin mainnet.
    Mainnet,
    /// Bitcoin testnet3.
    Testnet,
    /// Signet (mutinynet).
    Signet,
    /// Local regtest.
    Regtest,
}

impl NetworkSelection {
    /// All selectable networks.
    pub const fn all() -> &'static [Self] {
        &[Self::Mainnet, Self::Testnet, Self::Signet, Self::Regtest]
    }

    /// Lowercase name, also used as the storage subdirectory.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Signet => "signet",
            Self::Regtest => "regtest",
        }
    }
}

impl std::fmt::Display for NetworkSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkSelection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Self::Mainnet),
            "testnet" => Ok(Self::Testnet),
            "signet" => Ok(Self::Signet),
            "regtest" => Ok(Self::Regtest),
            other => Err(Error::Config(format!("unknown network: {other}"))),
        }
    }
}

/// Backend parameters for one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    /// The network these parameters belong to.
    pub network: NetworkSelection,
    /// Esplora server the node syncs chain data from.
    pub chain_data_url: &'static str,
    /// Rapid Gossip Sync server, mainnet and testnet only.
    pub gossip_url: Option<&'static str>,
    /// Address the node listens on for peers.
    pub listening_address: &'static str,
    /// Display color as `#RRGGBB`. Opaque to the core.
    pub color: &'static str,
}

/// Map a network selection to its backend parameters.
pub const fn resolve(network: NetworkSelection) -> NetworkProfile {
    match network {
        NetworkSelection::Mainnet => NetworkProfile {
            network,
            chain_data_url: "https://mempool.space/api",
            gossip_url: Some("https://rapidsync.lightningdevkit.org/snapshot"),
            listening_address: DEFAULT_LISTENING_ADDRESS,
            color: "#F7931A",
        },
        NetworkSelection::Testnet => NetworkProfile {
            network,
            chain_data_url: "https://mempool.space/testnet/api",
            gossip_url: Some("https://rapidsync.lightningdevkit.org/testnet/snapshot"),
            listening_address: DEFAULT_LISTENING_ADDRESS,
            color: "#00B35C",
        },
        NetworkSelection::Signet => NetworkProfile {
            network,
            chain_data_url: "https://mutinynet.com/api",
            gossip_url: None,
            listening_address: DEFAULT_LISTENING_ADDRESS,
            color: "#B028F0",
        },
        NetworkSelection::Regtest => NetworkProfile {
            network,
            chain_data_url: "http://127.0.0.1:3002",
            gossip_url: None,
            listening_address: DEFAULT_LISTENING_ADDRESS,
            color: "#0A84FF",
        },
    }
}

/// Engine log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Gossip-level tracing, the noisiest.
    Gossip,
    /// Trace.
    Trace,
    /// Debug.
    #[default]
    Debug,
    /// Info.
    Info,
    /// Warnings.
    Warn,
    /// Errors only.
    Error,
}

/// Tunables applied to every build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    /// Root directory for node data; the network name is appended.
    pub data_dir: PathBuf,
    /// Minimum timelock delta for forwarded payments, in blocks.
    pub default_cltv_expiry_delta: u32,
    /// On-chain wallet sync interval, seconds.
    pub onchain_wallet_sync_interval_secs: u64,
    /// Lightning wallet sync interval, seconds.
    pub lightning_wallet_sync_interval_secs: u64,
    /// Fee-rate cache refresh interval, seconds.
    pub fee_rate_cache_update_interval_secs: u64,
    /// Engine log verbosity.
    pub log_level: LogLevel,
}

impl NodeSettings {
    /// Settings with the default intervals rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            default_cltv_expiry_delta: 144,
            onchain_wallet_sync_interval_secs: 60,
            lightning_wallet_sync_interval_secs: 20,
            fee_rate_cache_update_interval_secs: 600,
            log_level: LogLevel::Debug,
        }
    }

    /// Engine storage for `network`.
    pub fn storage_dir(&self, network: NetworkSelection) -> PathBuf {
        self.data_dir.join(network.as_str())
    }
}

/// Immutable configuration for one node build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    storage_dir: PathBuf,
    network: NetworkSelection,
    listening_addresses: Vec<String>,
    default_cltv_expiry_delta: u32,
    onchain_wallet_sync_interval_secs: u64,
    lightning_wallet_sync_interval_secs: u64,
    fee_rate_cache_update_interval_secs: u64,
    log_level: LogLevel,
}

impl NodeConfig {
    /// Snapshot the configuration for a build against `profile`.
    pub fn new(profile: &NetworkProfile, settings: &NodeSettings) -> Self {
        Self {
            storage_dir: settings.storage_dir(profile.network),
            network: profile.network,
            listening_addresses: vec![profile.listening_address.to_string()],
            default_cltv_expiry_delta: settings.default_cltv_expiry_delta,
            onchain_wallet_sync_interval_secs: settings.onchain_wallet_sync_interval_secs,
            lightning_wallet_sync_interval_secs: settings.lightning_wallet_sync_interval_secs,
            fee_rate_cache_update_interval_secs: settings.fee_rate_cache_update_interval_secs,
            log_level: settings.log_level,
        }
    }

    /// Directory the engine keeps its state in.
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Network this build targets.
    pub const fn network(&self) -> NetworkSelection {
        self.network
    }

    /// Listening addresses, in order.
    pub fn listening_addresses(&self) -> &[String] {
        &self.listening_addresses
    }

    /// CLTV expiry delta, in blocks.
    pub const fn default_cltv_expiry_delta(&self) -> u32 {
        self.default_cltv_expiry_delta
    }

    /// On-chain wallet sync interval, seconds.
    pub const fn onchain_wallet_sync_interval_secs(&self) -> u64 {
        self.onchain_wallet_sync_interval_secs
    }

    /// Lightning wallet sync interval, seconds.
    pub const fn lightning_wallet_sync_interval_secs(&self) -> u64 {
        self.lightning_wallet_sync_interval_secs
    }

    /// Fee-rate cache refresh interval, seconds.
    pub const fn fee_rate_cache_update_interval_secs(&self) -> u64 {
        self.fee_rate_cache_update_interval_secs
    }

    /// Engine log verbosity.
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Path of the engine's log file inside the storage directory.
    pub fn log_file_path(&self) -> PathBuf {
        self.storage_dir.join("logs").join("ldk_node_latest.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_network_has_chain_data() {
        for network in NetworkSelection::all() {
            let profile = resolve(*network);
            assert_eq!(profile.network, *network);
            assert!(!profile.chain_data_url.is_empty(), "{network} has no chain data url");
            assert!(!profile.listening_address.is_empty());
        }
    }

    #[test]
    fn test_gossip_only_on_mainnet_and_testnet() {
        for network in NetworkSelection::all() {
            let expects_gossip =
                matches!(network, NetworkSelection::Mainnet | NetworkSelection::Testnet);
            assert_eq!(resolve(*network).gossip_url.is_some(), expects_gossip);
        }
    }

    #[test]
    fn test_colors_are_unique() {
        let colors: HashSet<_> = NetworkSelection::all()
            .iter()
            .map(|n| resolve(*n).color)
            .collect();
        assert_eq!(colors.len(), NetworkSelection::all().len());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("bitcoin".parse::<NetworkSelection>().unwrap(), NetworkSelection::Mainnet);
        assert_eq!("Signet".parse::<NetworkSelection>().unwrap(), NetworkSelection::Signet);
        assert!("liquid".parse::<NetworkSelection>().is_err());
    }

    #[test]
    fn test_node_config_snapshot() {
        let settings = NodeSettings::new("/tmp/monday");
        let config = NodeConfig::new(&resolve(NetworkSelection::Regtest), &settings);

        assert_eq!(config.storage_dir(), Path::new("/tmp/monday/regtest"));
        assert_eq!(config.network(), NetworkSelection::Regtest);
        assert_eq!(config.listening_addresses(), ["0.0.0.0:9735".to_string()]);
        assert_eq!(config.default_cltv_expiry_delta(), 144);
        assert_eq!(config.onchain_wallet_sync_interval_secs(), 60);
        assert_eq!(config.lightning_wallet_sync_interval_secs(), 20);
        assert_eq!(config.fee_rate_cache_update_interval_secs(), 600);
        assert_eq!(config.log_level(), LogLevel::Debug);
    }
}
