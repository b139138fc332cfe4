mod builder;
pub mod config;
pub mod discovery;
mod error;
pub mod files;
pub mod identity;
pub mod lifecycle;
mod node;
pub mod repo;
pub mod reprovider;
pub mod validator;

pub use builder::new_node;
pub use config::{BuildConfig, RepoConfig, ReproviderStrategy, ResolvedConfig};
pub use error::NodeError;
pub use identity::Keypair;
pub use kiln_exchange::{HostOption, MemoryNetwork, RoutingOption};
pub use node::Node;
pub use repo::{MockRepo, Repo};
pub use tokio_util::sync::CancellationToken;
