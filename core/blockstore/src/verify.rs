use std::sync::Arc;

use async_trait::async_trait;
use kiln_interfaces::hash::{self, HashError};
use kiln_interfaces::prelude::*;

/// Digests shorter than this are considered forgeable.
pub const MIN_DIGEST_LEN: usize = 20;

/// Checks that `cid` names a hash function this node is willing to trust.
pub fn validate_cid(cid: &Cid) -> Result<(), BlockstoreError> {
    let mh = cid.hash();
    match mh.code() {
        hash::IDENTITY => Ok(()),
        hash::SHA2_256 | hash::SHA2_512 if (mh.size() as usize) < MIN_DIGEST_LEN => {
            Err(BlockstoreError::InsecureHash {
                cid: *cid,
                len: mh.size() as usize,
            })
        },
        hash::SHA2_256 | hash::SHA2_512 => Ok(()),
        code => Err(BlockstoreError::UnsupportedHash { cid: *cid, code }),
    }
}

/// Re-hashes every block it returns and refuses to store blocks addressed by an
/// unsupported or truncated hash.
pub struct VerifyingBlockstore {
    inner: Arc<dyn Blockstore>,
}

impl VerifyingBlockstore {
    pub fn new(inner: Arc<dyn Blockstore>) -> Self {
        Self { inner }
    }
}

fn check(block: &Block) -> Result<(), BlockstoreError> {
    match hash::verify(block.cid(), block.data()) {
        Ok(true) => Ok(()),
        Ok(false) | Err(HashError::Mismatch(_)) | Err(HashError::Multihash(_)) => {
            Err(BlockstoreError::IntegrityViolation(*block.cid()))
        },
        Err(HashError::Unsupported(code)) => Err(BlockstoreError::UnsupportedHash {
            cid: *block.cid(),
            code,
        }),
    }
}

#[async_trait]
impl Blockstore for VerifyingBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        validate_cid(cid)?;
        let block = self.inner.get(cid).await?;
        check(&block)?;
        Ok(block)
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        self.inner.has(cid).await
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        self.inner.get_size(cid).await
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        validate_cid(block.cid())?;
        self.inner.put(block).await
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        for block in &blocks {
            validate_cid(block.cid())?;
        }
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
    use bytes::Bytes;
    use kiln_datastore::MapDatastore;
    use kiln_interfaces::cid::multihash::Multihash;

    use super::*;
    use crate::base::{cid_to_key, DatastoreBlockstore};

    fn setup() -> (Arc<MapDatastore>, VerifyingBlockstore) {
        let datastore = Arc::new(MapDatastore::new());
        let base = Arc::new(DatastoreBlockstore::new(datastore.clone()));
        (datastore, VerifyingBlockstore::new(base))
    }

    #[tokio::test]
    async fn test_detects_corruption() {
        let (datastore, store) = setup();
        let block = Block::raw(&b"original"[..]);
        store.put(block.clone()).await.unwrap();
        assert_eq!(store.get(block.cid()).await.unwrap(), block);

        datastore
            .put(cid_to_key(block.cid()), Bytes::from_static(b"bitrot"))
            .await
            .unwrap();
        assert!(matches!(
            store.get(block.cid()).await,
            Err(BlockstoreError::IntegrityViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_weak_hashes() {
        let (_, store) = setup();

        let short = Multihash::wrap(hash::SHA2_256, &[1u8; 8]).unwrap();
        let block = Block::new_unchecked(Cid::new_v1(hash::RAW, short), &b"x"[..]);
        assert!(matches!(
            store.put(block).await,
            Err(BlockstoreError::InsecureHash { len: 8, .. })
        ));

        let md5 = Multihash::wrap(0xd5, &[1u8; 16]).unwrap();
        let block = Block::new_unchecked(Cid::new_v1(hash::RAW, md5), &b"x"[..]);
        assert!(matches!(
            store.put(block).await,
            Err(BlockstoreError::UnsupportedHash { code: 0xd5, .. })
        ));
    }

    #[tokio::test]
    async fn test_allows_identity() {
        let (_, store) = setup();
        let mh = hash::digest(hash::IDENTITY, b"inline").unwrap();
        let block = Block::new(Cid::new_v1(hash::RAW, mh), &b"inline"[..]).unwrap();
        store.put(block.clone()).await.unwrap();
        assert_eq!(store.get(block.cid()).await.unwrap(), block);
    }
}
