use std::sync::Arc;

use async_trait::async_trait;
use kiln_interfaces::cid::Version;
use kiln_interfaces::hash;
use kiln_interfaces::prelude::*;

/// The same content addressed by the other CID version, if one exists.
///
/// Only dag-pb blocks hashed with sha2-256 have both a v0 and a v1 form.
pub fn other_version(cid: &Cid) -> Option<Cid> {
    match cid.version() {
        Version::V0 => Some(Cid::new_v1(hash::DAG_PB, *cid.hash())),
        Version::V1
            if cid.codec() == hash::DAG_PB
                && cid.hash().code() == hash::SHA2_256
                && cid.hash().size() == 32 =>
        {
            Cid::new_v0(*cid.hash()).ok()
        },
        Version::V1 => None,
    }
}

/// Looks a block up under the other CID version when the requested one is missing. Blocks
/// found that way are relabelled with the CID the caller asked for.
pub struct CidV0V1Blockstore {
    inner: Arc<dyn Blockstore>,
}

impl CidV0V1Blockstore {
    pub fn new(inner: Arc<dyn Blockstore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Blockstore for CidV0V1Blockstore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        match self.inner.get(cid).await {
            Err(BlockstoreError::NotFound(_)) => match other_version(cid) {
                Some(other) => match self.inner.get(&other).await {
                    Ok(block) => Ok(block.with_cid(*cid)),
                    Err(BlockstoreError::NotFound(_)) => Err(BlockstoreError::NotFound(*cid)),
                    Err(e) => Err(e),
                },
                None => Err(BlockstoreError::NotFound(*cid)),
            },
            res => res,
        }
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        if self.inner.has(cid).await? {
            return Ok(true);
        }
        match other_version(cid) {
            Some(other) => self.inner.has(&other).await,
            None => Ok(false),
        }
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        match self.inner.get_size(cid).await {
            Err(BlockstoreError::NotFound(_)) => match other_version(cid) {
                Some(other) => self
                    .inner
                    .get_size(&other)
                    .await
                    .map_err(|e| match e {
                        BlockstoreError::NotFound(_) => BlockstoreError::NotFound(*cid),
                        e => e,
                    }),
                None => Err(BlockstoreError::NotFound(*cid)),
            },
            res => res,
        }
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        self.inner.put(block).await
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        self.inner.put_many(blocks).await
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
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

    fn dag_pb_v0(data: &'static [u8]) -> Block {
        let cid = Cid::new_v0(hash::sha2_256(data)).unwrap();
        Block::new_unchecked(cid, data)
    }

    #[test]
    fn test_other_version() {
        let v0 = *dag_pb_v0(b"node").cid();
        let v1 = other_version(&v0).unwrap();
        assert_eq!(v1.version(), Version::V1);
        assert_eq!(v1.codec(), hash::DAG_PB);
        assert_eq!(other_version(&v1), Some(v0));

        let raw = Block::raw(&b"leaf"[..]);
        assert_eq!(other_version(raw.cid()), None);
    }

    #[tokio::test]
    async fn test_lookup_under_either_version() {
        let store = CidV0V1Blockstore::new(Arc::new(DatastoreBlockstore::new(Arc::new(
            MapDatastore::new(),
        ))));
        let block = dag_pb_v0(b"node");
        let v1 = other_version(block.cid()).unwrap();
        store.put(block.clone()).await.unwrap();

        assert!(store.has(&v1).await.unwrap());
        assert_eq!(store.get_size(&v1).await.unwrap(), 4);
        let found = store.get(&v1).await.unwrap();
        assert_eq!(found.cid(), &v1);
        assert_eq!(found.data(), block.data());

        let missing = dag_pb_v0(b"missing");
        let err = store.get(missing.cid()).await.unwrap_err();
        assert!(matches!(err, BlockstoreError::NotFound(cid) if cid == *missing.cid()));
    }
}
