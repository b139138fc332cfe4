pub mod base;
pub mod bloom;
pub mod builder;
pub mod cache;
pub mod cidv0v1;
pub mod config;
pub mod filestore;
pub mod gc;
pub mod idstore;
pub mod verify;

pub use base::DatastoreBlockstore;
pub use builder::{BlockstoreBuilder, Layer, LayeredBlockstore};
pub use cache::CachedBlockstore;
pub use cidv0v1::CidV0V1Blockstore;
pub use config::CacheOpts;
pub use filestore::{DataRef, FileManager, Filestore};
pub use gc::{GcBlockstore, GcGuard, GcLocker};
pub use idstore::IdStore;
pub use verify::VerifyingBlockstore;
