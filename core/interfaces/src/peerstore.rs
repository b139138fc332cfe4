use std::collections::{BTreeSet, HashMap};

use anyhow::bail;
use parking_lot::RwLock;

use crate::types::{PeerId, PeerInfo};

#[derive(Debug, Default)]
struct PeerRecord {
    public_key: Option<[u8; 32]>,
    addrs: BTreeSet<String>,
}

/// What this node knows about other peers: their public keys and where to reach them.
#[derive(Debug, Default)]
pub struct Peerstore {
    peers: RwLock<HashMap<PeerId, PeerRecord>>,
}

impl Peerstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the public key of `peer`. The key must be the one the id was derived from.
    pub fn add_public_key(&self, peer: PeerId, public: [u8; 32]) -> anyhow::Result<()> {
        if PeerId::from_ed25519(&public) != peer {
            bail!("public key does not match peer id {peer}");
        }
        self.peers.write().entry(peer).or_default().public_key = Some(public);
        Ok(())
    }

    /// The stored key, or the one inlined in the id.
    pub fn public_key(&self, peer: &PeerId) -> Option<[u8; 32]> {
        self.peers
            .read()
            .get(peer)
            .and_then(|record| record.public_key)
            .or_else(|| peer.ed25519_public_key())
    }

    pub fn add_addrs(&self, info: &PeerInfo) {
        self.peers
            .write()
            .entry(info.id)
            .or_default()
            .addrs
            .extend(info.addrs.iter().cloned());
    }

    pub fn peer_info(&self, peer: &PeerId) -> PeerInfo {
        let addrs = self
            .peers
            .read()
            .get(peer)
            .map(|record| record.addrs.iter().cloned().collect())
            .unwrap_or_default();
        PeerInfo { id: *peer, addrs }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.read().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_public_keys_must_match() {
        let store = Peerstore::new();
        let id = PeerId::from_ed25519(&[1; 32]);
        assert!(store.add_public_key(id, [2; 32]).is_err());
        store.add_public_key(id, [1; 32]).unwrap();
        assert_eq!(store.public_key(&id), Some([1; 32]));
    }

    #[test]
    fn test_addrs_accumulate() {
        let store = Peerstore::new();
        let id = PeerId::from_ed25519(&[3; 32]);
        store.add_addrs(&PeerInfo {
            id,
            addrs: vec!["/ip4/10.0.0.1/tcp/4001".into()],
        });
        store.add_addrs(&PeerInfo {
            id,
            addrs: vec![
                "/ip4/10.0.0.1/tcp/4001".into(),
                "/ip4/10.0.0.2/tcp/4001".into(),
            ],
        });
        assert_eq!(store.peer_info(&id).addrs.len(), 2);
        assert_eq!(store.peers(), vec![id]);
        // Unknown peers with an inlined key still resolve.
        let other = PeerId::from_ed25519(&[4; 32]);
        assert_eq!(store.public_key(&other), Some([4; 32]));
        assert!(store.peer_info(&other).addrs.is_empty());
    }
}
