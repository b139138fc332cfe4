use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::hash;
use kiln_interfaces::prelude::*;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, info, trace};

use crate::bloom::BloomFilter;
use crate::config::CacheOpts;

/// Number of locks that serialize cache updates per CID.
const LOCK_STRIPES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Presence {
    Absent,
    Present(usize),
}

/// A read-through cache in front of another blockstore.
///
/// Remembers which blocks exist (and their size) and keeps recently read blocks in memory.
/// With a bloom filter configured, lookups for blocks that were never written are answered
/// without reaching the inner store.
///
/// A lookup that misses the cache and every write hold the lock stripe of their CID across
/// the inner call, so an answer computed before a concurrent write is never recorded after it.
pub struct CachedBlockstore {
    inner: Arc<dyn Blockstore>,
    presence: Option<Mutex<LruCache<Cid, Presence>>>,
    blocks: Option<Mutex<LruCache<Cid, Bytes>>>,
    bloom: Option<BloomFilter>,
    locks: Box<[AsyncMutex<()>]>,
    hash_on_read: AtomicBool,
}

impl CachedBlockstore {
    /// Wraps `inner`. When a bloom filter is requested it is filled from every key the inner
    /// store currently holds before this returns.
    pub async fn new(inner: Arc<dyn Blockstore>, opts: CacheOpts) -> Result<Self, BlockstoreError> {
        let presence = NonZeroUsize::new(opts.has_cache_size).map(|n| Mutex::new(LruCache::new(n)));
        let blocks = NonZeroUsize::new(opts.block_cache_size).map(|n| Mutex::new(LruCache::new(n)));

        let bloom = if opts.bloom_filter_size > 0 {
            let bloom = BloomFilter::new(opts.bloom_filter_size, opts.bloom_filter_hashes);
            let keys = inner.all_keys().await?;
            for cid in &keys {
                bloom.add(cid);
            }
            info!("Bloom filter built from {} blocks", keys.len());
            Some(bloom)
        } else {
            None
        };

        Ok(Self {
            inner,
            presence,
            blocks,
            bloom,
            locks: (0..LOCK_STRIPES).map(|_| AsyncMutex::new(())).collect(),
            hash_on_read: AtomicBool::new(false),
        })
    }

    fn stripe(&self, cid: &Cid) -> usize {
        (fxhash::hash64(cid) % self.locks.len() as u64) as usize
    }

    async fn lock(&self, cid: &Cid) -> AsyncMutexGuard<'_, ()> {
        self.locks[self.stripe(cid)].lock().await
    }

    fn bloom_excludes(&self, cid: &Cid) -> bool {
        let excluded = self.bloom.as_ref().is_some_and(|b| !b.may_contain(cid));
        if excluded {
            trace!("Bloom filter miss for {cid}");
        }
        excluded
    }

    fn cached_presence(&self, cid: &Cid) -> Option<Presence> {
        self.presence.as_ref()?.lock().get(cid).copied()
    }

    fn record(&self, cid: &Cid, presence: Presence) {
        if let Some(cache) = &self.presence {
            cache.lock().put(*cid, presence);
        }
    }

    fn cached_block(&self, cid: &Cid) -> Option<Bytes> {
        self.blocks.as_ref()?.lock().get(cid).cloned()
    }

    fn evict(&self, cid: &Cid) {
        if let Some(cache) = &self.blocks {
            cache.lock().pop(cid);
        }
    }

    fn added(&self, block: &Block) {
        self.record(block.cid(), Presence::Present(block.len()));
        if let Some(bloom) = &self.bloom {
            bloom.add(block.cid());
        }
    }
}

#[async_trait]
impl Blockstore for CachedBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        if self.bloom_excludes(cid) || self.cached_presence(cid) == Some(Presence::Absent) {
            return Err(BlockstoreError::NotFound(*cid));
        }

        if let Some(data) = self.cached_block(cid) {
            if self.hash_on_read.load(Ordering::Relaxed)
                && !hash::verify(cid, &data).unwrap_or(false)
            {
                self.evict(cid);
                return Err(BlockstoreError::IntegrityViolation(*cid));
            }
            trace!("Block cache hit for {cid}");
            return Ok(Block::new_unchecked(*cid, data));
        }

        let _stripe = self.lock(cid).await;
        if self.cached_presence(cid) == Some(Presence::Absent) {
            return Err(BlockstoreError::NotFound(*cid));
        }
        match self.inner.get(cid).await {
            Ok(block) => {
                self.record(cid, Presence::Present(block.len()));
                if let Some(cache) = &self.blocks {
                    cache.lock().put(*cid, block.data().clone());
                }
                Ok(block)
            },
            Err(BlockstoreError::NotFound(_)) => {
                self.record(cid, Presence::Absent);
                Err(BlockstoreError::NotFound(*cid))
            },
            Err(e) => Err(e),
        }
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        if self.bloom_excludes(cid) {
            return Ok(false);
        }
        match self.cached_presence(cid) {
            Some(Presence::Absent) => Ok(false),
            Some(Presence::Present(_)) => Ok(true),
            None => {
                let _stripe = self.lock(cid).await;
                if let Some(presence) = self.cached_presence(cid) {
                    return Ok(presence != Presence::Absent);
                }
                let has = self.inner.has(cid).await?;
                if !has {
                    self.record(cid, Presence::Absent);
                }
                Ok(has)
            },
        }
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        if self.bloom_excludes(cid) {
            return Err(BlockstoreError::NotFound(*cid));
        }
        match self.cached_presence(cid) {
            Some(Presence::Absent) => Err(BlockstoreError::NotFound(*cid)),
            Some(Presence::Present(size)) => Ok(size),
            None => {
                let _stripe = self.lock(cid).await;
                match self.inner.get_size(cid).await {
                    Ok(size) => {
                        self.record(cid, Presence::Present(size));
                        Ok(size)
                    },
                    Err(BlockstoreError::NotFound(_)) => {
                        self.record(cid, Presence::Absent);
                        Err(BlockstoreError::NotFound(*cid))
                    },
                    Err(e) => Err(e),
                }
            },
        }
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        if matches!(self.cached_presence(block.cid()), Some(Presence::Present(_))) {
            trace!("Skipping put of cached block {}", block.cid());
            return Ok(());
        }
        let (cid, len) = (*block.cid(), block.len());
        let _stripe = self.lock(&cid).await;
        self.inner.put(block).await?;
        self.record(&cid, Presence::Present(len));
        if let Some(bloom) = &self.bloom {
            bloom.add(&cid);
        }
        Ok(())
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        let blocks: Vec<Block> = blocks
            .into_iter()
            .filter(|b| !matches!(self.cached_presence(b.cid()), Some(Presence::Present(_))))
            .collect();
        if blocks.is_empty() {
            return Ok(());
        }
        let added: Vec<Block> = blocks.clone();

        // Stripes are taken in index order so two batches never wait on each other.
        let mut stripes: Vec<usize> = added.iter().map(|b| self.stripe(b.cid())).collect();
        stripes.sort_unstable();
        stripes.dedup();
        let mut guards = Vec::with_capacity(stripes.len());
        for stripe in stripes {
            guards.push(self.locks[stripe].lock().await);
        }

        self.inner.put_many(blocks).await?;
        for block in &added {
            self.added(block);
        }
        debug!("Cached presence of {} new blocks", added.len());
        Ok(())
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        let _stripe = self.lock(cid).await;
        self.inner.delete_block(cid).await?;
        self.record(cid, Presence::Absent);
        self.evict(cid);
        Ok(())
    }

    async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError> {
        self.inner.all_keys().await
    }

    fn hash_on_read(&self, enabled: bool) {
        self.hash_on_read.store(enabled, Ordering::Relaxed);
        self.inner.hash_on_read(enabled);
    }
}
