use std::collections::BTreeMap;
use std::ops::Bound;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::types::Key;
use kiln_interfaces::{Batch, BatchOp, Datastore, DatastoreError};
use parking_lot::RwLock;

/// An in-memory datastore. Safe to share between tasks.
#[derive(Default)]
pub struct MapDatastore {
    values: RwLock<BTreeMap<Key, Bytes>>,
}

impl MapDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

#[async_trait]
impl Datastore for MapDatastore {
    async fn get(&self, key: &Key) -> Result<Bytes, DatastoreError> {
        self.values
            .read()
            .get(key)
            .cloned()
            .ok_or(DatastoreError::NotFound)
    }

    async fn has(&self, key: &Key) -> Result<bool, DatastoreError> {
        Ok(self.values.read().contains_key(key))
    }

    async fn put(&self, key: Key, value: Bytes) -> Result<(), DatastoreError> {
        self.values.write().insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<(), DatastoreError> {
        self.values.write().remove(key);
        Ok(())
    }

    async fn query_keys(&self, prefix: &Key) -> Result<Vec<Key>, DatastoreError> {
        let values = self.values.read();
        let keys = values
            .range((Bound::Excluded(prefix), Bound::Unbounded))
            .map(|(key, _)| key)
            .skip_while(|key| !key.is_descendant_of(prefix))
            .take_while(|key| key.is_descendant_of(prefix))
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn commit(&self, batch: Batch) -> Result<(), DatastoreError> {
        let mut values = self.values.write();
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
}
