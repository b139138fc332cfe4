use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cid::Cid;

use crate::blockstore::Blockstore;
use crate::peerstore::Peerstore;
use crate::types::{PeerId, PeerInfo};

/// Channel security transports a host can negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    Tls,
    Noise,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Muxer {
    Yamux,
    Mplex,
}

/// Everything a host option needs to know to construct the peer transport of a node.
#[derive(Clone, Debug)]
pub struct HostParams {
    pub peer_id: PeerId,
    pub peerstore: Arc<Peerstore>,
    /// `None` disables encryption, for testing only.
    pub security: Option<Security>,
    pub muxers: Vec<Muxer>,
    pub pubsub: bool,
    pub ipns_pubsub: bool,
}

/// The network transport of a node. Implementations own connection management and the
/// request/response protocol used to move blocks between peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    fn local_peer(&self) -> PeerId;

    /// Start accepting connections on the given addresses and return the bound ones.
    async fn listen(&self, addrs: &[String]) -> anyhow::Result<Vec<String>>;

    async fn dial(&self, peer: &PeerInfo) -> anyhow::Result<()>;

    fn connected_peers(&self) -> Vec<PeerId>;

    /// Peers visible on the local network segment.
    async fn discover(&self) -> anyhow::Result<Vec<PeerInfo>>;

    /// Register the store used to answer block requests from other peers.
    fn serve(&self, blocks: Arc<dyn Blockstore>);

    async fn request_block(&self, peer: &PeerId, cid: &Cid) -> anyhow::Result<Option<Bytes>>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Content routing: who provides which block.
#[async_trait]
pub trait Routing: Send + Sync {
    async fn bootstrap(&self, peers: &[PeerInfo]) -> anyhow::Result<()>;

    async fn provide(&self, cid: &Cid) -> anyhow::Result<()>;

    async fn find_providers(&self, cid: &Cid, limit: usize) -> anyhow::Result<Vec<PeerInfo>>;

    async fn close(&self) -> anyhow::Result<()>;
}
