mod config;
pub mod memory;
mod network;
mod offline;
mod options;

pub use config::Config;
pub use memory::{MemoryNetwork, MemoryRouting, MemoryTransport, NullRouting};
pub use network::NetworkExchange;
pub use offline::OfflineExchange;
pub use options::{HostOption, RoutingOption, RoutingParams};
