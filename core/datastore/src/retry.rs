//! Bounded retries for datastore operations that fail because the process ran out of file
//! descriptors. Any other error is returned on the first attempt.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::types::Key;
use kiln_interfaces::{Batch, Datastore, DatastoreError};
use tracing::debug;

/// Decides which errors are worth another attempt.
pub type TransientCheck = fn(&DatastoreError) -> bool;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: usize,
    /// Fixed pause between two attempts.
    pub delay: Duration,
    pub is_transient: TransientCheck,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            delay: Duration::from_millis(200),
            is_transient: DatastoreError::is_too_many_open_files,
        }
    }
}

pub struct RetryDatastore {
    inner: Arc<dyn Datastore>,
    policy: RetryPolicy,
}

impl RetryDatastore {
    pub fn new(inner: Arc<dyn Datastore>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, DatastoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DatastoreError>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !(self.policy.is_transient)(&e) => return Err(e),
                Err(e) => e,
            };

            if attempt == attempts {
                let source = match err {
                    DatastoreError::Io(e) => e,
                    other => io::Error::new(io::ErrorKind::Other, other.to_string()),
                };
                return Err(DatastoreError::RetriesExhausted { attempts, source });
            }

            debug!(
                "Datastore {op} hit a temporary error (attempt {attempt}/{attempts}): {err}, \
                 retrying in {:?}",
                self.policy.delay
            );
            tokio::time::sleep(self.policy.delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Datastore for RetryDatastore {
    async fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.run("get", || self.inner.get(key)).await
    }

    async fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        self.run("has", || self.inner.has(key)).await
    }

    async fn get_size(&self, key: &Key) -> Result<usize, DatastoreError> {
        self.run("get_size", || self.inner.get_size(key)).await
    }

    async fn put(&self, key: Key, value: Bytes) -> Result<(), DatastoreError> {
        self.run("put", || self.inner.put(key.clone(), value.clone()))
            .await
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.run("delete", || self.inner.delete(key)).await
    }

    async fn query_keys(&self, prefix: &Key) -> Result<Vec<Key>, DatastoreError> {
        self.run("query", || self.inner.query_keys(prefix)).await
    }

    async fn commit(&self, batch: Batch) -> Result<(), DatastoreError> {
        self.run("commit", || self.inner.commit(batch.clone())).await
    }

    async fn close(&self) -> Result<(), DatastoreError> {
        self.inner.close().await
    }
}
