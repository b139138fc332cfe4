//! The gate between regular blockstore traffic and garbage collection.
//!
//! Any number of operations may hold a shared slot at once. Garbage collection takes the
//! exclusive slot, which waits for every shared holder to leave. Once an exclusive request is
//! pending no new shared slot is handed out, so a steady stream of reads cannot starve GC.

use std::sync::Arc;

use async_trait::async_trait;
use kiln_interfaces::prelude::*;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    waiting_writers: usize,
    writer: bool,
}

#[derive(Debug, Default)]
pub struct GcLocker {
    state: Mutex<LockState>,
    notify: Notify,
}

impl GcLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no garbage collection is active or pending and takes a shared slot.
    pub async fn shared(self: &Arc<Self>) -> SharedGuard {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            if let Some(guard) = self.try_shared() {
                return guard;
            }
            trace!("Waiting for garbage collection to finish");
            notified.await;
        }
    }

    pub fn try_shared(self: &Arc<Self>) -> Option<SharedGuard> {
        let mut state = self.state.lock();
        if state.writer || state.waiting_writers > 0 {
            return None;
        }
        state.readers += 1;
        Some(SharedGuard {
            locker: self.clone(),
        })
    }

    /// Waits for every shared holder to leave and takes the exclusive slot.
    ///
    /// The request counts as pending from the first poll. Dropping the future before it
    /// resolves withdraws it.
    pub async fn exclusive(self: &Arc<Self>) -> ExclusiveGuard {
        self.state.lock().waiting_writers += 1;
        let mut pending = PendingExclusive {
            locker: self,
            armed: true,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.readers == 0 && !state.writer {
                    state.writer = true;
                    state.waiting_writers -= 1;
                    pending.armed = false;
                    debug!("Garbage collection lock taken");
                    return ExclusiveGuard {
                        locker: self.clone(),
                    };
                }
            }
            notified.await;
        }
    }

    /// True while a garbage collection is running or waiting to run.
    pub fn gc_requested(&self) -> bool {
        let state = self.state.lock();
        state.writer || state.waiting_writers > 0
    }

    /// Number of shared slots currently held.
    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }
}

/// Holds a shared slot until dropped.
#[must_use]
pub struct SharedGuard {
    locker: Arc<GcLocker>,
}

impl Drop for SharedGuard {
    fn drop(&mut self) {
        let mut state = self.locker.state.lock();
        state.readers -= 1;
        let last = state.readers == 0;
        drop(state);
        if last {
            self.locker.notify.notify_waiters();
        }
    }
}

/// Holds the exclusive slot until dropped.
#[must_use]
pub struct ExclusiveGuard {
    locker: Arc<GcLocker>,
}

impl Drop for ExclusiveGuard {
    fn drop(&mut self) {
        self.locker.state.lock().writer = false;
        debug!("Garbage collection lock released");
        self.locker.notify.notify_waiters();
    }
}

struct PendingExclusive<'a> {
    locker: &'a GcLocker,
    armed: bool,
}

impl Drop for PendingExclusive<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.locker.state.lock().waiting_writers -= 1;
            self.locker.notify.notify_waiters();
        }
    }
}

/// The outermost blockstore layer. Every operation runs inside a shared slot of the locker.
pub struct GcBlockstore {
    inner: Arc<dyn Blockstore>,
    locker: Arc<GcLocker>,
}

/// Exclusive access for a garbage collection pass.
pub struct GcGuard {
    _guard: ExclusiveGuard,
    blockstore: Arc<dyn Blockstore>,
}

impl GcGuard {
    /// The wrapped store. Using the [`GcBlockstore`] itself while holding this guard would
    /// deadlock.
    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.blockstore
    }
}

impl GcBlockstore {
    pub fn new(inner: Arc<dyn Blockstore>, locker: Arc<GcLocker>) -> Self {
        Self { inner, locker }
    }

    pub fn locker(&self) -> &Arc<GcLocker> {
        &self.locker
    }

    pub async fn gc_lock(&self) -> GcGuard {
        GcGuard {
            _guard: self.locker.exclusive().await,
            blockstore: self.inner.clone(),
        }
    }

    pub fn gc_requested(&self) -> bool {
        self.locker.gc_requested()
    }
}

#[async_trait]
impl Blockstore for GcBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.get(cid).await
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.has(cid).await
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.get_size(cid).await
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.put(block).await
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.put_many(blocks).await
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.delete_block(cid).await
    }

    async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError> {
        let _slot = self.locker.shared().await;
        self.inner.all_keys().await
    }

    fn hash_on_read(&self, enabled: bool) {
        self.inner.hash_on_read(enabled)
    }
}
