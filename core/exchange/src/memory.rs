//! An in-process network. Hosts on the same [`MemoryNetwork`] can dial each other, exchange
//! blocks and announce provider records. Nothing leaves the process.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::prelude::*;
use kiln_interfaces::{HostParams, Muxer, Security};
use parking_lot::RwLock;
use tracing::{debug, trace};

struct Host {
    addrs: Vec<String>,
    security: Option<Security>,
    muxers: Vec<Muxer>,
    blocks: Option<Arc<dyn Blockstore>>,
    connections: HashSet<PeerId>,
    listening: bool,
}

#[derive(Default)]
struct NetworkState {
    hosts: HashMap<PeerId, Host>,
    providers: HashMap<Cid, BTreeSet<PeerId>>,
}

/// A shared switchboard. Cloning gives another handle to the same network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<RwLock<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a host to the network.
    pub fn transport(&self, params: HostParams) -> anyhow::Result<MemoryTransport> {
        let mut state = self.state.write();
        if state.hosts.contains_key(&params.peer_id) {
            bail!("peer {} is already attached to this network", params.peer_id);
        }
        state.hosts.insert(
            params.peer_id,
            Host {
                addrs: vec![],
                security: params.security,
                muxers: params.muxers.clone(),
                blocks: None,
                connections: HashSet::new(),
                listening: false,
            },
        );
        Ok(MemoryTransport {
            network: self.clone(),
            peer: params.peer_id,
            peerstore: params.peerstore,
        })
    }

    pub fn routing(&self, peer: PeerId) -> MemoryRouting {
        MemoryRouting {
            network: self.clone(),
            peer,
        }
    }

    /// Number of hosts currently attached.
    pub fn len(&self) -> usize {
        self.state.read().hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    peer: PeerId,
    peerstore: Arc<Peerstore>,
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    async fn listen(&self, addrs: &[String]) -> anyhow::Result<Vec<String>> {
        let mut state = self.network.state.write();
        let host = state
            .hosts
            .get_mut(&self.peer)
            .ok_or_else(|| anyhow!("transport is closed"))?;
        host.addrs = addrs.to_vec();
        host.listening = true;
        debug!("Listening on {addrs:?}");
        Ok(host.addrs.clone())
    }

    async fn dial(&self, peer: &PeerInfo) -> anyhow::Result<()> {
        if peer.id == self.peer {
            bail!("cannot dial self");
        }
        let mut state = self.network.state.write();
        let (security, muxers) = {
            let local = state
                .hosts
                .get(&self.peer)
                .ok_or_else(|| anyhow!("transport is closed"))?;
            (local.security, local.muxers.clone())
        };
        let remote = state
            .hosts
            .get_mut(&peer.id)
            .filter(|host| host.listening)
            .ok_or_else(|| anyhow!("no route to {}", peer.id))?;
        if remote.security != security {
            bail!("failed to negotiate security protocol with {}", peer.id);
        }
        if !remote.muxers.iter().any(|m| muxers.contains(m)) {
            bail!("failed to negotiate stream muxer with {}", peer.id);
        }
        remote.connections.insert(self.peer);
        let remote_addrs = remote.addrs.clone();
        if let Some(local) = state.hosts.get_mut(&self.peer) {
            local.connections.insert(peer.id);
        }
        drop(state);

        self.peerstore.add_addrs(&PeerInfo {
            id: peer.id,
            addrs: remote_addrs,
        });
        trace!("Connected to {}", peer.id);
        Ok(())
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.network
            .state
            .read()
            .hosts
            .get(&self.peer)
            .map(|host| host.connections.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn discover(&self) -> anyhow::Result<Vec<PeerInfo>> {
        Ok(self
            .network
            .state
            .read()
            .hosts
            .iter()
            .filter(|(id, host)| **id != self.peer && host.listening)
            .map(|(id, host)| PeerInfo {
                id: *id,
                addrs: host.addrs.clone(),
            })
            .collect())
    }

    fn serve(&self, blocks: Arc<dyn Blockstore>) {
        if let Some(host) = self.network.state.write().hosts.get_mut(&self.peer) {
            host.blocks = Some(blocks);
        }
    }

    async fn request_block(&self, peer: &PeerId, cid: &Cid) -> anyhow::Result<Option<Bytes>> {
        let blocks = {
            let state = self.network.state.read();
            let remote = state
                .hosts
                .get(peer)
                .filter(|host| host.connections.contains(&self.peer))
                .ok_or_else(|| anyhow!("not connected to {peer}"))?;
            remote.blocks.clone()
        };
        let Some(blocks) = blocks else {
            return Ok(None);
        };
        match blocks.get(cid).await {
            Ok(block) => Ok(Some(block.into_data())),
            Err(BlockstoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut state = self.network.state.write();
        if let Some(host) = state.hosts.remove(&self.peer) {
            for peer in host.connections {
                if let Some(remote) = state.hosts.get_mut(&peer) {
                    remote.connections.remove(&self.peer);
                }
            }
        }
        Ok(())
    }
}

/// Provider records kept on the shared network.
pub struct MemoryRouting {
    network: MemoryNetwork,
    peer: PeerId,
}

#[async_trait]
impl Routing for MemoryRouting {
    async fn bootstrap(&self, peers: &[PeerInfo]) -> anyhow::Result<()> {
        let state = self.network.state.read();
        let reachable = peers
            .iter()
            .filter(|p| state.hosts.get(&p.id).is_some_and(|h| h.listening))
            .count();
        debug!("Bootstrapped routing with {reachable} of {} peers", peers.len());
        Ok(())
    }

    async fn provide(&self, cid: &Cid) -> anyhow::Result<()> {
        self.network
            .state
            .write()
            .providers
            .entry(*cid)
            .or_default()
            .insert(self.peer);
        Ok(())
    }

    async fn find_providers(&self, cid: &Cid, limit: usize) -> anyhow::Result<Vec<PeerInfo>> {
        let state = self.network.state.read();
        let Some(providers) = state.providers.get(cid) else {
            return Ok(vec![]);
        };
        Ok(providers
            .iter()
            .filter(|id| **id != self.peer)
            .filter_map(|id| {
                state.hosts.get(id).map(|host| PeerInfo {
                    id: *id,
                    addrs: host.addrs.clone(),
                })
            })
            .take(limit)
            .collect())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut state = self.network.state.write();
        state.providers.retain(|_, providers| {
            providers.remove(&self.peer);
            !providers.is_empty()
        });
        Ok(())
    }
}

/// Content routing that knows nothing and announces nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRouting;

#[async_trait]
impl Routing for NullRouting {
    async fn bootstrap(&self, _peers: &[PeerInfo]) -> anyhow::Result<()> {
        Ok(())
    }

    async fn provide(&self, _cid: &Cid) -> anyhow::Result<()> {
        Ok(())
    }

    async fn find_providers(&self, _cid: &Cid, _limit: usize) -> anyhow::Result<Vec<PeerInfo>> {
        Ok(vec![])
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
