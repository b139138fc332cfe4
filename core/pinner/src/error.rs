use kiln_dag::DagError;
use kiln_interfaces::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PinError {
    /// Nothing was ever persisted. A fresh repo looks like this.
    #[error("pin: no pin state stored")]
    NotFound,

    #[error("pin: stored pin state is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Dag(#[from] DagError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),

    #[error("pin: {0} is not pinned")]
    NotPinned(Cid),

    #[error("pin: {0} is pinned recursively")]
    PinnedRecursively(Cid),
}
