use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_interfaces::hash;
use kiln_interfaces::prelude::*;
use tracing::debug;

/// Namespace every block lives under in the repo datastore.
pub const BLOCK_PREFIX: &str = "/blocks";

pub fn cid_to_key(cid: &Cid) -> Key {
    Key::new(BLOCK_PREFIX).child(cid.to_string())
}

pub fn key_to_cid(key: &Key) -> Result<Cid, BlockstoreError> {
    Cid::try_from(key.name()).map_err(|_| BlockstoreError::InvalidKey(key.clone()))
}

/// The bottom of every blockstore chain: blocks stored as plain values in a [`Datastore`].
pub struct DatastoreBlockstore {
    datastore: Arc<dyn Datastore>,
    prefix: Key,
    hash_on_read: AtomicBool,
}

impl DatastoreBlockstore {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            prefix: Key::new(BLOCK_PREFIX),
            hash_on_read: AtomicBool::new(false),
        }
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    fn map_err(cid: &Cid, e: DatastoreError) -> BlockstoreError {
        match e {
            DatastoreError::NotFound => BlockstoreError::NotFound(*cid),
            e => e.into(),
        }
    }
}

#[async_trait]
impl Blockstore for DatastoreBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        let data = self
            .datastore
            .get(&cid_to_key(cid))
            .await
            .map_err(|e| Self::map_err(cid, e))?;

        if self.hash_on_read.load(Ordering::Relaxed)
            && !hash::verify(cid, &data).map_err(|_| BlockstoreError::IntegrityViolation(*cid))?
        {
            return Err(BlockstoreError::IntegrityViolation(*cid));
        }

        Ok(Block::new_unchecked(*cid, data))
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        Ok(self.datastore.has(&cid_to_key(cid)).await?)
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        self.datastore
            .get_size(&cid_to_key(cid))
            .await
            .map_err(|e| Self::map_err(cid, e))
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        let key = cid_to_key(block.cid());
        // Blocks are immutable, an existing value is already the right one.
        if self.datastore.has(&key).await? {
            return Ok(());
        }
        Ok(self.datastore.put(key, block.into_data()).await?)
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        let mut batch = Batch::new();
        for block in blocks {
            let key = cid_to_key(block.cid());
            if self.datastore.has(&key).await? {
                continue;
            }
            batch.put(key, block.into_data());
        }
        if batch.is_empty() {
            return Ok(());
        }
        Ok(self.datastore.commit(batch).await?)
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        Ok(self.datastore.delete(&cid_to_key(cid)).await?)
    }

    async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError> {
        let keys = self.datastore.query_keys(&self.prefix).await?;
        let mut cids = Vec::with_capacity(keys.len());
        for key in keys {
            match key_to_cid(&key) {
                Ok(cid) => cids.push(cid),
                Err(_) => debug!("Skipping malformed block key {key}"),
            }
        }
        Ok(cids)
    }

    fn hash_on_read(&self, enabled: bool) {
        self.hash_on_read.store(enabled, Ordering::Relaxed);
    }
}
