use kiln_dag::DagError;
use kiln_interfaces::prelude::*;
use kiln_pinner::PinError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node: cannot use both a repo and a nil repo")]
    ConfigConflict,

    #[error("node: construction was cancelled")]
    Cancelled,

    #[error("node: identity: {0}")]
    Identity(String),

    #[error("node: closed")]
    Closed,

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Pin(#[from] PinError),

    /// Failures reported by the repo, the host or the content routing.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
