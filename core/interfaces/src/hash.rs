//! Multihash helpers shared by every layer that has to produce or check a content address.

use cid::multihash::Multihash;
use cid::Cid;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

/// The identity "hash": the digest is the content itself.
pub const IDENTITY: u64 = 0x00;
pub const SHA2_256: u64 = 0x12;
pub const SHA2_512: u64 = 0x13;

/// Multicodec of a dag-pb encoded merkle node.
pub const DAG_PB: u64 = 0x70;
/// Multicodec of an opaque block of bytes.
pub const RAW: u64 = 0x55;
/// Multicodec used when a peer identity is rendered as a CID.
pub const LIBP2P_KEY: u64 = 0x72;

/// Largest payload an identity multihash can carry.
pub const MAX_IDENTITY_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("unsupported multihash code 0x{0:x}")]
    Unsupported(u64),

    #[error("content does not hash to {0}")]
    Mismatch(Cid),

    #[error("invalid multihash: {0}")]
    Multihash(#[from] cid::multihash::Error),
}

/// Hash `data` with the function identified by the multihash `code`.
pub fn digest(code: u64, data: &[u8]) -> Result<Multihash<64>, HashError> {
    let mh = match code {
        IDENTITY => Multihash::wrap(IDENTITY, data)?,
        SHA2_256 => Multihash::wrap(SHA2_256, Sha256::digest(data).as_slice())?,
        SHA2_512 => Multihash::wrap(SHA2_512, Sha512::digest(data).as_slice())?,
        code => return Err(HashError::Unsupported(code)),
    };
    Ok(mh)
}

/// Shorthand for the default hash function.
pub fn sha2_256(data: &[u8]) -> Multihash<64> {
    Multihash::wrap(SHA2_256, Sha256::digest(data).as_slice())
        .expect("sha2-256 digest to fit in a 64 byte multihash")
}

/// Returns true if `data` hashes to the multihash embedded in `cid`.
pub fn verify(cid: &Cid, data: &[u8]) -> Result<bool, HashError> {
    let expected = cid.hash();
    let actual = digest(expected.code(), data)?;
    Ok(actual.digest() == expected.digest())
}

/// Returns true for CIDs whose content lives entirely inside the key.
pub fn is_identity(cid: &Cid) -> bool {
    cid.hash().code() == IDENTITY
}
