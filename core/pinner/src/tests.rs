use std::sync::Arc;

use bytes::Bytes;
use kiln_blockstore::BlockstoreBuilder;
use kiln_dag::{unixfs, BlockService, DagService, Node, PbLink};
use kiln_datastore::MapDatastore;
use kiln_exchange::OfflineExchange;
use kiln_interfaces::prelude::*;
use pretty_assertions::assert_eq;

use crate::{PinError, PinMode, Pinner, PINS_KEY};

struct Setup {
    datastore: Arc<dyn Datastore>,
    dag: Arc<DagService>,
}

impl Setup {
    async fn new() -> Self {
        let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
        let built = BlockstoreBuilder::new(datastore.clone())
            .build()
            .await
            .unwrap();
        let blockstore: Arc<dyn Blockstore> = built.blockstore;
        let exchange = Arc::new(OfflineExchange::new(blockstore.clone()));
        let dag = Arc::new(DagService::new(Arc::new(BlockService::new(blockstore, exchange))));
        Self { datastore, dag }
    }

    async fn load(&self) -> Result<Pinner, PinError> {
        Pinner::load(self.datastore.clone(), self.dag.clone(), self.dag.clone()).await
    }

    async fn load_or_create(&self) -> Result<Pinner, PinError> {
        Pinner::load_or_create(self.datastore.clone(), self.dag.clone(), self.dag.clone()).await
    }

    /// A directory with one raw child. Returns `(dir, child)`.
    async fn tree(&self, content: &'static [u8]) -> (Cid, Cid) {
        let child = self
            .dag
            .add(&Node::Raw(Bytes::from_static(content)))
            .await
            .unwrap();
        let dir = unixfs::UnixfsData::directory()
            .into_node(vec![PbLink {
                cid: child,
                name: Some("child".into()),
                size: None,
            }])
            .unwrap();
        (self.dag.add(&Node::Pb(dir)).await.unwrap(), child)
    }
}

#[tokio::test]
async fn test_fresh_repo_has_no_pins() {
    let setup = Setup::new().await;
    assert!(matches!(setup.load().await, Err(PinError::NotFound)));

    let pinner = setup.load_or_create().await.unwrap();
    assert!(pinner.direct_keys().is_empty());
    assert!(pinner.recursive_keys().is_empty());
    assert!(pinner.internal_pins().is_empty());
}

#[tokio::test]
async fn test_pins_survive_reload() {
    let setup = Setup::new().await;
    let (root, child) = setup.tree(b"recursive").await;
    let (direct, _) = setup.tree(b"direct").await;

    let pinner = setup.load_or_create().await.unwrap();
    pinner.pin(&root, true).await.unwrap();
    pinner.pin(&direct, false).await.unwrap();
    pinner.flush().await.unwrap();
    assert_eq!(pinner.internal_pins().len(), 3);

    let reloaded = setup.load().await.unwrap();
    assert_eq!(reloaded.recursive_keys(), vec![root]);
    assert_eq!(reloaded.direct_keys(), vec![direct]);
    assert_eq!(reloaded.internal_pins(), pinner.internal_pins());

    assert_eq!(reloaded.is_pinned(&root).await.unwrap(), Some(PinMode::Recursive));
    assert_eq!(reloaded.is_pinned(&direct).await.unwrap(), Some(PinMode::Direct));
    assert_eq!(
        reloaded.is_pinned(&child).await.unwrap(),
        Some(PinMode::Indirect(root))
    );
    let unrelated = Block::raw(&b"unrelated"[..]);
    assert_eq!(reloaded.is_pinned(unrelated.cid()).await.unwrap(), None);
}

#[tokio::test]
async fn test_unpin() {
    let setup = Setup::new().await;
    let (root, _) = setup.tree(b"tree").await;
    let pinner = setup.load_or_create().await.unwrap();
    pinner.pin(&root, true).await.unwrap();

    assert!(matches!(
        pinner.pin(&root, false).await,
        Err(PinError::PinnedRecursively(_))
    ));
    assert!(matches!(
        pinner.unpin(&root, false),
        Err(PinError::PinnedRecursively(_))
    ));
    pinner.unpin(&root, true).unwrap();
    assert!(matches!(pinner.unpin(&root, true), Err(PinError::NotPinned(_))));

    pinner.flush().await.unwrap();
    assert!(setup.load().await.unwrap().recursive_keys().is_empty());
}

#[tokio::test]
async fn test_recursive_pin_needs_the_whole_graph() {
    let setup = Setup::new().await;
    let (root, child) = setup.tree(b"partial").await;
    setup.dag.remove(&child).await.unwrap();

    let pinner = setup.load_or_create().await.unwrap();
    assert!(matches!(pinner.pin(&root, true).await, Err(PinError::Dag(e)) if e.is_not_found()));
    assert!(pinner.recursive_keys().is_empty());
}

#[tokio::test]
async fn test_corrupt_state_is_an_error() {
    let setup = Setup::new().await;
    setup
        .datastore
        .put(Key::new(PINS_KEY), Bytes::from_static(b"not a cid"))
        .await
        .unwrap();
    assert!(matches!(setup.load_or_create().await, Err(PinError::Corrupt(_))));

    // A valid CID whose node is missing.
    let missing = Block::raw(&b"missing"[..]);
    setup
        .datastore
        .put(Key::new(PINS_KEY), Bytes::from(missing.cid().to_bytes()))
        .await
        .unwrap();
    assert!(matches!(setup.load_or_create().await, Err(PinError::Corrupt(_))));
}
