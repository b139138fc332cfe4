//! The ed25519 identity of a node.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use kiln_interfaces::prelude::*;
use rand::rngs::OsRng;

use crate::config::RepoConfig;
use crate::error::NodeError;

pub struct Keypair {
    secret: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Self {
            secret: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            secret: SigningKey::from_bytes(secret),
        }
    }

    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let raw = STANDARD.decode(encoded.trim())?;
        let secret: [u8; 32] = raw
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected 32 bytes of key material, got {}", raw.len()))?;
        Ok(Self::from_bytes(&secret))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }

    pub fn public(&self) -> [u8; 32] {
        self.secret.verifying_key().to_bytes()
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_ed25519(&self.public())
    }

    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        self.secret.sign(msg).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

/// Checks an ed25519 signature. Malformed keys and signatures simply fail verification.
pub fn verify(public: &[u8; 32], msg: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(msg, &signature).is_ok()
}

/// Reads the peer id out of the repo config.
pub fn load_identity(config: &RepoConfig) -> Result<PeerId, NodeError> {
    let raw = config.identity.peer_id.trim();
    if raw.is_empty() {
        return Err(NodeError::Identity(
            "no peer id in the repo config".to_string(),
        ));
    }
    raw.parse()
        .map_err(|e| NodeError::Identity(format!("{e:#}")))
}

/// Reads the private key out of the repo config and checks that it belongs to `peer_id`.
pub fn load_private_key(config: &RepoConfig, peer_id: PeerId) -> Result<Keypair, NodeError> {
    let encoded = config
        .identity
        .priv_key
        .as_deref()
        .ok_or_else(|| NodeError::Identity("private key required for online mode".to_string()))?;
    let keypair = Keypair::from_base64(encoded)
        .map_err(|e| NodeError::Identity(format!("invalid private key: {e:#}")))?;
    if keypair.peer_id() != peer_id {
        return Err(NodeError::Identity(format!(
            "private key does not match peer id {peer_id}"
        )));
    }
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate();
        let signature = keypair.sign(b"record");
        assert!(verify(&keypair.public(), b"record", &signature));
        assert!(!verify(&keypair.public(), b"other", &signature));
        assert!(!verify(&keypair.public(), b"record", &signature[..10]));
    }

    #[test]
    fn test_base64_round_trip() {
        let keypair = Keypair::generate();
        let decoded = Keypair::from_base64(&keypair.to_base64()).unwrap();
        assert_eq!(decoded.peer_id(), keypair.peer_id());
        assert!(Keypair::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn test_load_identity() {
        let keypair = Keypair::generate();
        let mut config = RepoConfig::generate(&keypair);
        assert_eq!(load_identity(&config).unwrap(), keypair.peer_id());
        assert_eq!(
            load_private_key(&config, keypair.peer_id())
                .unwrap()
                .peer_id(),
            keypair.peer_id()
        );

        let other = Keypair::generate();
        assert!(matches!(
            load_private_key(&config, other.peer_id()),
            Err(NodeError::Identity(_))
        ));

        config.identity.priv_key = None;
        assert!(matches!(
            load_private_key(&config, keypair.peer_id()),
            Err(NodeError::Identity(_))
        ));

        config.identity.peer_id = String::new();
        assert!(matches!(
            load_identity(&config),
            Err(NodeError::Identity(_))
        ));
    }
}
