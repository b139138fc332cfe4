use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use bytes::Bytes;
use cid::multihash::Multihash;
use cid::{Cid, Version};
use serde::{Deserialize, Serialize};

use crate::hash::{self, HashError};

/// A hierarchical datastore key such as `/blocks/bafk...`.
///
/// Keys are always absolute, never end in a separator and never contain empty segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut clean = String::with_capacity(raw.as_ref().len() + 1);
        for segment in raw.as_ref().split('/').filter(|s| !s.is_empty()) {
            clean.push('/');
            clean.push_str(segment);
        }
        if clean.is_empty() {
            clean.push('/');
        }
        Self(clean)
    }

    /// The namespace root.
    pub fn root() -> Self {
        Self("/".into())
    }

    pub fn child(&self, name: impl AsRef<str>) -> Self {
        Self::new(format!("{}/{}", self.0, name.as_ref()))
    }

    /// The last segment of the key.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    pub fn is_descendant_of(&self, ancestor: &Key) -> bool {
        if ancestor.0 == "/" {
            return self.0 != "/";
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// An immutable block of bytes together with the content identifier it is stored under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Creates a block after checking that `data` hashes to `cid`.
    pub fn new(cid: Cid, data: impl Into<Bytes>) -> Result<Self, HashError> {
        let data = data.into();
        if !hash::verify(&cid, &data)? {
            return Err(HashError::Mismatch(cid));
        }
        Ok(Self { cid, data })
    }

    /// Creates a block without hashing the content. Callers are expected to have verified
    /// the pair already, or to rely on a verification layer further down.
    pub fn new_unchecked(cid: Cid, data: impl Into<Bytes>) -> Self {
        Self {
            cid,
            data: data.into(),
        }
    }

    /// Creates a CIDv1 raw block addressed by the sha2-256 of its content.
    pub fn raw(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = Cid::new_v1(hash::RAW, hash::sha2_256(&data));
        Self { cid, data }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Re-labels the block with another CID of the same content, e.g. the other CID version.
    pub fn with_cid(self, cid: Cid) -> Self {
        Self {
            cid,
            data: self.data,
        }
    }
}

/// The identity of a peer: a multihash of its public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(Multihash<64>);

const ED25519_KEY_PREFIX: [u8; 4] = [0x08, 0x01, 0x12, 0x20];

impl PeerId {
    /// Derives the identity of an ed25519 public key. Small keys are inlined with the
    /// identity hash so the key can be recovered from the id alone.
    pub fn from_ed25519(public: &[u8; 32]) -> Self {
        let mut encoded = Vec::with_capacity(36);
        encoded.extend_from_slice(&ED25519_KEY_PREFIX);
        encoded.extend_from_slice(public);
        Self(
            Multihash::wrap(hash::IDENTITY, &encoded)
                .expect("an encoded ed25519 key to fit in a 64 byte multihash"),
        )
    }

    pub fn from_multihash(mh: Multihash<64>) -> Self {
        Self(mh)
    }

    /// Returns the inlined ed25519 public key, if this id carries one.
    pub fn ed25519_public_key(&self) -> Option<[u8; 32]> {
        if self.0.code() != hash::IDENTITY {
            return None;
        }
        let digest = self.0.digest();
        if digest.len() != 36 || digest[..4] != ED25519_KEY_PREFIX {
            return None;
        }
        digest[4..].try_into().ok()
    }

    pub fn multihash(&self) -> &Multihash<64> {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Cid::new_v1(hash::LIBP2P_KEY, self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

impl FromStr for PeerId {
    type Err = anyhow::Error;

    /// Accepts both the legacy base58 multihash form and the CIDv1 `libp2p-key` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cid = Cid::try_from(s).map_err(|e| anyhow!("invalid peer id '{s}': {e}"))?;
        match cid.version() {
            Version::V0 => Ok(Self(*cid.hash())),
            Version::V1 if cid.codec() == hash::LIBP2P_KEY => Ok(Self(*cid.hash())),
            Version::V1 => bail!("invalid peer id '{s}': codec 0x{:x}", cid.codec()),
        }
    }
}

/// A peer together with the addresses it can be reached on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<String>,
}

impl PeerInfo {
    /// Parses a multiaddr that ends with `/p2p/<peer>` (or the older `/ipfs/<peer>`).
    pub fn from_multiaddr(addr: &str) -> anyhow::Result<Self> {
        let (transport, peer) = addr
            .rsplit_once("/p2p/")
            .or_else(|| addr.rsplit_once("/ipfs/"))
            .ok_or_else(|| anyhow!("multiaddr '{addr}' does not name a peer"))?;
        let id = peer.parse()?;
        let addrs = if transport.is_empty() {
            vec![]
        } else {
            vec![transport.to_string()]
        };
        Ok(Self { id, addrs })
    }
}
