mod blockstore;
mod datastore;
mod exchange;
mod transport;

pub use blockstore::*;
pub use datastore::*;
pub use exchange::*;
pub use transport::*;

// The common types.
#[rustfmt::skip]
pub mod prelude;

pub mod hash;
pub mod peerstore;
pub mod types;

// Re-export the content identifier crate so every crate agrees on one version.
#[rustfmt::skip]
pub use cid;
