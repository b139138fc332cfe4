use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::hash;
use kiln_interfaces::prelude::*;

/// Serves identity-hashed CIDs straight from the key. Such blocks are never written down.
pub struct IdStore {
    inner: Arc<dyn Blockstore>,
}

impl IdStore {
    pub fn new(inner: Arc<dyn Blockstore>) -> Self {
        Self { inner }
    }
}

fn inline_block(cid: &Cid) -> Option<Block> {
    hash::is_identity(cid)
        .then(|| Block::new_unchecked(*cid, Bytes::copy_from_slice(cid.hash().digest())))
}

#[async_trait]
impl Blockstore for IdStore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        match inline_block(cid) {
            Some(block) => Ok(block),
            None => self.inner.get(cid).await,
        }
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        if hash::is_identity(cid) {
            return Ok(true);
        }
        self.inner.has(cid).await
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        if hash::is_identity(cid) {
            return Ok(cid.hash().size() as usize);
        }
        self.inner.get_size(cid).await
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        if hash::is_identity(block.cid()) {
            return Ok(());
        }
        self.inner.put(block).await
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        let blocks: Vec<Block> = blocks
            .into_iter()
            .filter(|b| !hash::is_identity(b.cid()))
            .collect();
        if blocks.is_empty() {
            return Ok(());
        }
        self.inner.put_many(blocks).await
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        if hash::is_identity(cid) {
            return Ok(());
        }
        self.inner.delete_block(cid).await
    }

    async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError> {
        self.inner.all_keys().await
    }

    fn hash_on_read(&self, enabled: bool) {
        self.inner.hash_on_read(enabled)
    }
}

#[cfg(test)]
mod tests {
    use kiln_datastore::MapDatastore;

    use super::*;
    use crate::base::DatastoreBlockstore;

    #[tokio::test]
    async fn test_identity_blocks_are_not_stored() {
        let datastore = Arc::new(MapDatastore::new());
        let store = IdStore::new(Arc::new(DatastoreBlockstore::new(datastore.clone())));

        let cid = Cid::new_v1(hash::RAW, hash::digest(hash::IDENTITY, b"tiny").unwrap());
        assert!(store.has(&cid).await.unwrap());
        assert_eq!(store.get(&cid).await.unwrap().data().as_ref(), b"tiny");
        assert_eq!(store.get_size(&cid).await.unwrap(), 4);

        store
            .put(Block::new_unchecked(cid, &b"tiny"[..]))
            .await
            .unwrap();
        store.delete_block(&cid).await.unwrap();
        assert!(datastore.is_empty());

        let regular = Block::raw(&b"regular"[..]);
        store.put(regular.clone()).await.unwrap();
        assert_eq!(datastore.len(), 1);
        assert_eq!(store.get(regular.cid()).await.unwrap(), regular);
    }
}
