use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::types::Key;

/// `EMFILE` on every unix we run on.
const TOO_MANY_OPEN_FILES: i32 = 24;

#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("datastore: key not found")]
    NotFound,

    #[error("datastore: {0}")]
    Io(#[from] io::Error),

    #[error(
        "datastore: ran out of retries after {attempts} attempts trying to get past temporary \
         error: {source}"
    )]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: io::Error,
    },

    #[error("datastore: value under {0} is corrupt")]
    Corrupt(Key),

    #[error("datastore: closed")]
    Closed,
}

impl DatastoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound)
    }

    /// Returns true if the process ran out of file descriptors while serving the request.
    pub fn is_too_many_open_files(&self) -> bool {
        match self {
            DatastoreError::Io(e) => e.raw_os_error() == Some(TOO_MANY_OPEN_FILES),
            _ => false,
        }
    }

    /// An error that looks exactly like the OS refusing to open another file.
    pub fn too_many_open_files() -> Self {
        DatastoreError::Io(io::Error::from_raw_os_error(TOO_MANY_OPEN_FILES))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put(Key, Bytes),
    Delete(Key),
}

/// A group of writes that the datastore applies together on [`Datastore::commit`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Key, value: Bytes) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Key) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// The raw key-value store a repo owns.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Bytes, DatastoreError>;

    async fn has(&self, key: &Key) -> Result<bool, DatastoreError>;

    async fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        self.get(key).await.map(|value| value.len())
    }

    async fn put(&self, key: Key, value: Bytes) -> Result<(), DatastoreError>;

    /// Deleting a key that does not exist is not an error.
    async fn delete(&self, key: &Key) -> Result<(), DatastoreError>;

    /// Returns every key strictly below `prefix`, in ascending order.
    async fn query_keys(&self, prefix: &Key) -> Result<Vec<Key>, DatastoreError>;

    async fn commit(&self, batch: Batch) -> Result<(), DatastoreError>;

    async fn close(&self) -> Result<(), DatastoreError> {
        Ok(())
    }
}
