use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::types::Key;
use kiln_interfaces::{Batch, Datastore, DatastoreError};

/// A datastore that stores nothing: writes succeed and are dropped, reads never find anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullDatastore;

#[async_trait]
impl Datastore for NullDatastore {
    async fn get(&self, _key: &Key) -> Result<Bytes, DatastoreError> {
        Err(DatastoreError::NotFound)
    }

    async fn has(&self, _key: &Key) -> Result<bool, DatastoreError> {
        Ok(false)
    }

    async fn put(&self, _key: Key, _value: Bytes) -> Result<(), DatastoreError> {
        Ok(())
    }

    async fn delete(&self, _key: &Key) -> Result<(), DatastoreError> {
        Ok(())
    }

    async fn query_keys(&self, _prefix: &Key) -> Result<Vec<Key>, DatastoreError> {
        Ok(Vec::new())
    }

    async fn commit(&self, _batch: Batch) -> Result<(), DatastoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writes_are_dropped() {
        let ds = NullDatastore;
        let key = Key::new("/x");
        ds.put(key.clone(), Bytes::from_static(b"1")).await.unwrap();
        assert!(!ds.has(&key).await.unwrap());
        assert!(ds.get(&key).await.unwrap_err().is_not_found());
    }
}
