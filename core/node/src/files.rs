use std::sync::Arc;

use bytes::Bytes;
use kiln_dag::{unixfs, DagService, Node};
use kiln_interfaces::prelude::*;
use tracing::{debug, info};

use crate::error::NodeError;

/// Where the CID of the root of the mutable file tree is kept.
pub const FILES_ROOT_KEY: &str = "/local/filesroot";

/// Loads the root of the mutable file tree, creating an empty directory on first use.
pub async fn load_files_root(
    datastore: &Arc<dyn Datastore>,
    dag: &DagService,
    sharding: bool,
) -> Result<Cid, NodeError> {
    let key = Key::new(FILES_ROOT_KEY);
    match datastore.get(&key).await {
        Ok(raw) => {
            let root = Cid::try_from(raw.as_ref()).map_err(|_| DatastoreError::Corrupt(key))?;
            dag.get(&root).await?;
            debug!("Loaded files root {root}");
            Ok(root)
        },
        Err(DatastoreError::NotFound) => {
            let node = Node::Pb(unixfs::empty_directory(sharding)?);
            let root = dag.add(&node).await?;
            set_files_root(datastore, &root).await?;
            info!("Created files root {root}");
            Ok(root)
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn set_files_root(datastore: &Arc<dyn Datastore>, root: &Cid) -> Result<(), NodeError> {
    datastore
        .put(Key::new(FILES_ROOT_KEY), Bytes::from(root.to_bytes()))
        .await?;
    Ok(())
}
