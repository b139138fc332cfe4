use async_trait::async_trait;
use cid::Cid;
use thiserror::Error;

use crate::datastore::DatastoreError;
use crate::types::{Block, Key};

#[derive(Debug, Error)]
pub enum BlockstoreError {
    #[error("blockstore: block not found: {0}")]
    NotFound(Cid),

    #[error("blockstore: block {0} does not hash to its key")]
    IntegrityViolation(Cid),

    #[error("blockstore: {cid} uses unsupported hash function 0x{code:x}")]
    UnsupportedHash { cid: Cid, code: u64 },

    #[error("blockstore: {cid} uses an insecure digest of {len} bytes")]
    InsecureHash { cid: Cid, len: usize },

    #[error("blockstore: key {0} does not name a block")]
    InvalidKey(Key),

    #[error("filestore: {0}")]
    Filestore(String),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

impl BlockstoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlockstoreError::NotFound(_))
    }
}

/// A content-addressed store mapping a [`Cid`] to the bytes it names.
///
/// Every storage layer implements this trait and wraps another implementation, so a full
/// stack is a chain of `Arc<dyn Blockstore>` values.
#[async_trait]
pub trait Blockstore: Send + Sync {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError>;

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError>;

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        self.get(cid).await.map(|block| block.len())
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError>;

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        for block in blocks {
            self.put(block).await?;
        }
        Ok(())
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError>;

    /// Every CID currently held by the store.
    async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError>;

    /// Toggle re-hashing of blocks that are served without touching the datastore.
    fn hash_on_read(&self, enabled: bool);
}
