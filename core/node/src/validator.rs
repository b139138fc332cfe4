//! Validation of records published under `/pk/<peer>` and `/ipns/<peer>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kiln_interfaces::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::{self, Keypair};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record: no validator for namespace '{0}'")]
    UnknownNamespace(String),

    #[error("record: invalid key '{0}'")]
    InvalidKey(String),

    #[error("record: malformed record: {0}")]
    Malformed(String),

    #[error("record: public key of {0} is unknown")]
    UnknownPublicKey(PeerId),

    #[error("record: public key does not belong to {0}")]
    KeyMismatch(PeerId),

    #[error("record: signature check failed")]
    BadSignature,

    #[error("record: expired")]
    Expired,

    #[error("record: no valid records to select from")]
    NoValidRecords,
}

pub trait Validator: Send + Sync {
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), RecordError>;

    /// Index of the best record among `values`.
    fn select(&self, key: &str, values: &[&[u8]]) -> Result<usize, RecordError>;
}

/// Splits `/<namespace>/<rest>`.
fn split_key(key: &str) -> Result<(&str, &str), RecordError> {
    key.strip_prefix('/')
        .and_then(|key| key.split_once('/'))
        .filter(|(ns, rest)| !ns.is_empty() && !rest.is_empty())
        .ok_or_else(|| RecordError::InvalidKey(key.to_string()))
}

fn peer_from_key(key: &str) -> Result<PeerId, RecordError> {
    let (_, peer) = split_key(key)?;
    peer.parse()
        .map_err(|_| RecordError::InvalidKey(key.to_string()))
}

/// Dispatches on the first segment of the key.
pub struct NamespacedValidator {
    validators: HashMap<String, Box<dyn Validator>>,
}

impl NamespacedValidator {
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// The `pk` and `ipns` validators a node installs.
    pub fn standard(peerstore: Arc<Peerstore>) -> Self {
        Self::new()
            .with("pk", PublicKeyValidator)
            .with("ipns", IpnsValidator::new(peerstore))
    }

    pub fn with(mut self, namespace: &str, validator: impl Validator + 'static) -> Self {
        self.validators
            .insert(namespace.to_string(), Box::new(validator));
        self
    }

    fn validator(&self, key: &str) -> Result<&dyn Validator, RecordError> {
        let (namespace, _) = split_key(key)?;
        self.validators
            .get(namespace)
            .map(|validator| &**validator)
            .ok_or_else(|| RecordError::UnknownNamespace(namespace.to_string()))
    }
}

impl Default for NamespacedValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for NamespacedValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), RecordError> {
        self.validator(key)?.validate(key, value)
    }

    fn select(&self, key: &str, values: &[&[u8]]) -> Result<usize, RecordError> {
        self.validator(key)?.select(key, values)
    }
}

/// `/pk/<peer>` records hold the raw ed25519 public key of the peer.
pub struct PublicKeyValidator;

impl Validator for PublicKeyValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), RecordError> {
        let peer = peer_from_key(key)?;
        let public: [u8; 32] = value
            .try_into()
            .map_err(|_| RecordError::Malformed(format!("public key of {} bytes", value.len())))?;
        if PeerId::from_ed25519(&public) != peer {
            return Err(RecordError::KeyMismatch(peer));
        }
        Ok(())
    }

    fn select(&self, _key: &str, values: &[&[u8]]) -> Result<usize, RecordError> {
        // Every valid record under a key is the same key.
        if values.is_empty() {
            return Err(RecordError::NoValidRecords);
        }
        Ok(0)
    }
}

/// A signed name record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpnsRecord {
    pub value: String,
    pub sequence: u64,
    /// Seconds since the unix epoch.
    pub valid_until: u64,
    /// Base64 encoded ed25519 signature.
    pub signature: String,
}

impl IpnsRecord {
    pub fn new(keypair: &Keypair, value: impl Into<String>, sequence: u64, ttl: Duration) -> Self {
        let value = value.into();
        let valid_until = unix_now().saturating_add(ttl.as_secs());
        let signature = keypair.sign(&signing_bytes(&value, sequence, valid_until));
        Self {
            value,
            sequence,
            valid_until,
            signature: STANDARD.encode(signature),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("an ipns record to serialize")
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self, RecordError> {
        serde_json::from_slice(raw).map_err(|e| RecordError::Malformed(e.to_string()))
    }
}

fn signing_bytes(value: &str, sequence: u64, valid_until: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 16);
    bytes.extend_from_slice(value.as_bytes());
    bytes.extend_from_slice(&sequence.to_be_bytes());
    bytes.extend_from_slice(&valid_until.to_be_bytes());
    bytes
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// `/ipns/<peer>` records must be signed by the key of the peer and not be expired.
pub struct IpnsValidator {
    peerstore: Arc<Peerstore>,
}

impl IpnsValidator {
    pub fn new(peerstore: Arc<Peerstore>) -> Self {
        Self { peerstore }
    }

    fn check(&self, key: &str, value: &[u8]) -> Result<IpnsRecord, RecordError> {
        let peer = peer_from_key(key)?;
        let public = self
            .peerstore
            .public_key(&peer)
            .ok_or(RecordError::UnknownPublicKey(peer))?;
        let record = IpnsRecord::from_bytes(value)?;
        let signature = STANDARD
            .decode(&record.signature)
            .map_err(|e| RecordError::Malformed(e.to_string()))?;
        let signed = signing_bytes(&record.value, record.sequence, record.valid_until);
        if !identity::verify(&public, &signed, &signature) {
            return Err(RecordError::BadSignature);
        }
        if record.valid_until < unix_now() {
            return Err(RecordError::Expired);
        }
        Ok(record)
    }
}

impl Validator for IpnsValidator {
    fn validate(&self, key: &str, value: &[u8]) -> Result<(), RecordError> {
        self.check(key, value).map(|_| ())
    }

    /// Highest sequence wins, then the longest lived. Invalid records are never selected.
    fn select(&self, key: &str, values: &[&[u8]]) -> Result<usize, RecordError> {
        values
            .iter()
            .enumerate()
            .filter_map(|(i, value)| self.check(key, value).ok().map(|record| (i, record)))
            .max_by(|(i, a), (j, b)| {
                (a.sequence, a.valid_until)
                    .cmp(&(b.sequence, b.valid_until))
                    .then(j.cmp(i))
            })
            .map(|(i, _)| i)
            .ok_or(RecordError::NoValidRecords)
    }
}
