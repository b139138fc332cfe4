use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use kiln_datastore::{MapDatastore, NullDatastore};
use kiln_exchange::{HostOption, RoutingOption};
use kiln_interfaces::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::NodeError;
use crate::identity::Keypair;
use crate::repo::{MockRepo, Repo};

/// Peers a freshly generated config bootstraps from.
pub const DEFAULT_BOOTSTRAP_ADDRESSES: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

pub const DEFAULT_SWARM_ADDRESS: &str = "/ip4/0.0.0.0/tcp/4001";

/// The options a node is built from. Consumed by [`crate::new_node`].
#[derive(Clone, Default)]
pub struct BuildConfig {
    /// Start networking services (host, routing, network exchange, reprovider).
    pub online: bool,
    /// Experimental per-feature switches: `pubsub`, `ipnsps`, `mplex`.
    pub extra_opts: Option<HashMap<String, bool>>,
    /// Whether the node is expected to live long enough to profit from a bloom filter.
    pub permanent: bool,
    pub disable_encryption: bool,
    /// Back the node with a throwaway repo that stores nothing.
    pub nil_repo: bool,
    pub routing: Option<RoutingOption>,
    pub host: Option<HostOption>,
    pub repo: Option<Arc<dyn Repo>>,
}

impl BuildConfig {
    /// False when the map or the key is missing.
    pub fn get_opt(&self, key: &str) -> bool {
        get_opt(self.extra_opts.as_ref(), key)
    }

    /// Fills in everything that was left unset. Touches no storage; a conflicting config is
    /// rejected before anything is created.
    pub fn fill_defaults(self) -> Result<ResolvedConfig, NodeError> {
        if self.repo.is_some() && self.nil_repo {
            return Err(NodeError::ConfigConflict);
        }

        let repo = match self.repo {
            Some(repo) => repo,
            None => {
                let datastore: Arc<dyn Datastore> = if self.nil_repo {
                    Arc::new(NullDatastore)
                } else {
                    Arc::new(MapDatastore::new())
                };
                let keypair = Keypair::generate();
                debug!("Generated an in-memory repo for {}", keypair.peer_id());
                Arc::new(MockRepo::new(datastore, RepoConfig::generate(&keypair)))
            },
        };

        Ok(ResolvedConfig {
            online: self.online,
            extra_opts: self.extra_opts.unwrap_or_default(),
            permanent: self.permanent,
            disable_encryption: self.disable_encryption,
            nil_repo: self.nil_repo,
            routing: self.routing.unwrap_or_default(),
            host: self.host.unwrap_or_default(),
            repo,
        })
    }
}

fn get_opt(opts: Option<&HashMap<String, bool>>, key: &str) -> bool {
    opts.and_then(|opts| opts.get(key).copied())
        .unwrap_or(false)
}

/// A [`BuildConfig`] with every default filled in.
#[derive(Clone)]
pub struct ResolvedConfig {
    pub online: bool,
    pub extra_opts: HashMap<String, bool>,
    pub permanent: bool,
    pub disable_encryption: bool,
    pub nil_repo: bool,
    pub routing: RoutingOption,
    pub host: HostOption,
    pub repo: Arc<dyn Repo>,
}

impl ResolvedConfig {
    pub fn get_opt(&self, key: &str) -> bool {
        get_opt(Some(&self.extra_opts), key)
    }
}

/// The config document stored in a repo.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RepoConfig {
    pub identity: IdentityConfig,
    pub addresses: AddressesConfig,
    pub bootstrap: Vec<String>,
    pub datastore: DatastoreConfig,
    pub experimental: ExperimentalConfig,
    pub discovery: DiscoveryConfig,
    pub reprovider: ReproviderConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IdentityConfig {
    #[serde(rename = "PeerID")]
    pub peer_id: String,
    /// Base64 encoded ed25519 secret key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priv_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AddressesConfig {
    pub swarm: Vec<String>,
}

impl Default for AddressesConfig {
    fn default() -> Self {
        Self {
            swarm: vec![DEFAULT_SWARM_ADDRESS.to_string()],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DatastoreConfig {
    /// Size of the blockstore bloom filter in bytes, 0 disables it.
    pub bloom_filter_size: usize,
    pub hash_on_read: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExperimentalConfig {
    pub sharding_enabled: bool,
    pub filestore_enabled: bool,
    pub urlstore_enabled: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiscoveryConfig {
    #[serde(rename = "MDNS")]
    pub mdns: MdnsConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MdnsConfig {
    pub enabled: bool,
    /// Time between local discovery rounds, zero disables discovery.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10),
        }
    }
}

/// Which blocks are announced to content routing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReproviderStrategy {
    /// Every block in the blockstore.
    #[default]
    All,
    /// Pinned roots and everything below recursive pins.
    Pinned,
    /// Pinned roots only.
    Roots,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ReproviderConfig {
    /// Time between announcements, zero disables the reprovider.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub strategy: ReproviderStrategy,
}

impl Default for ReproviderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(12 * 60 * 60),
            strategy: ReproviderStrategy::All,
        }
    }
}

impl RepoConfig {
    /// A config for a new repo owned by `keypair`.
    pub fn generate(keypair: &Keypair) -> Self {
        Self {
            identity: IdentityConfig {
                peer_id: keypair.peer_id().to_string(),
                priv_key: Some(keypair.to_base64()),
            },
            bootstrap: DEFAULT_BOOTSTRAP_ADDRESSES
                .iter()
                .map(ToString::to_string)
                .collect(),
            ..Default::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(anyhow!(
                "The configuration file '{}' does not exist.",
                path.to_string_lossy()
            ));
        }

        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "IO: Could not load the configuration file '{}'.",
                path.to_string_lossy()
            )
        })?;

        toml::from_str(&content).with_context(|| {
            format!(
                "Could not parse the configuration file '{}' as toml.",
                path.to_string_lossy()
            )
        })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string(self).context("Could not serialize the configuration.")?;
        fs::write(&path, content).with_context(|| {
            format!(
                "Could not write the configuration file: {}",
                path.as_ref().to_string_lossy()
            )
        })
    }
}
