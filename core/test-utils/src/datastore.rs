use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::types::Key;
use kiln_interfaces::{Batch, BatchOp, Datastore, DatastoreError};
use parking_lot::Mutex;

type ErrorFactory = Box<dyn Fn() -> DatastoreError + Send + Sync>;

/// An in-memory datastore that can be told to fail its next `n` operations and that counts
/// every operation it receives.
#[derive(Default)]
pub struct FlakyDatastore {
    values: Mutex<BTreeMap<Key, Bytes>>,
    failures: Mutex<Option<(usize, ErrorFactory)>>,
    calls: AtomicUsize,
    closed: AtomicUsize,
}

impl FlakyDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` operations fail with the error built by `error`. Resets the call
    /// counter.
    pub fn fail_next(&self, n: usize, error: impl Fn() -> DatastoreError + Send + Sync + 'static) {
        *self.failures.lock() = Some((n, Box::new(error)));
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Number of operations received since creation or the last [`Self::fail_next`].
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of times [`Datastore::close`] was called.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), DatastoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock();
        match failures.as_mut() {
            Some((remaining, error)) if *remaining > 0 => {
                *remaining -= 1;
                Err(error())
            },
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Datastore for FlakyDatastore {
    async fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.enter()?;
        self.values
            .lock()
            .get(key)
            .cloned()
            .ok_or(DatastoreError::NotFound)
    }

    async fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        self.enter()?;
        Ok(self.values.lock().contains_key(key))
    }

    async fn put(&self, key: Key, value: Bytes) -> Result<(), DatastoreError> {
        self.enter()?;
        self.values.lock().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.enter()?;
        self.values.lock().remove(key);
        Ok(())
    }

    async fn query_keys(&self, prefix: &Key) -> Result<Vec<Key>, DatastoreError> {
        self.enter()?;
        Ok(self
            .values
            .lock()
            .keys()
            .filter(|key| key.is_descendant_of(prefix))
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: Batch) -> Result<(), DatastoreError> {
        self.enter()?;
        let mut values = self.values.lock();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    values.insert(key, value);
                },
                BatchOp::Delete(key) => {
                    values.remove(&key);
                },
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DatastoreError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
