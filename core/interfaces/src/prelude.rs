//! # Preludes
//!
//! Everything a storage layer or service needs in scope: the collaborator traits, their
//! error types and the core value types.

pub use crate::cid::Cid;
pub use crate::peerstore::Peerstore;
pub use crate::types::{Block, Key, PeerId, PeerInfo};
pub use crate::{
    Batch,
    Blockstore,
    BlockstoreError,
    Datastore,
    DatastoreError,
    Exchange,
    ExchangeError,
    PeerTransport,
    Routing,
};
