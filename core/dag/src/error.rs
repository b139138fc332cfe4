use kiln_interfaces::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error("dag: failed to decode {cid}: {reason}")]
    Decode { cid: Cid, reason: String },

    #[error("dag: failed to encode node: {0}")]
    Encode(String),

    #[error("dag: {cid} uses unsupported codec 0x{codec:x}")]
    UnsupportedCodec { cid: Cid, codec: u64 },

    #[error("dag: no link named '{name}' under {cid}")]
    NoLink { cid: Cid, name: String },

    #[error("dag: invalid path '{0}'")]
    InvalidPath(String),

    #[error("unixfs: {0}")]
    UnixFs(String),
}

impl DagError {
    pub fn is_not_found(&self) -> bool {
        match self {
            DagError::Exchange(e) => e.is_not_found(),
            DagError::Blockstore(e) => e.is_not_found(),
            _ => false,
        }
    }
}
