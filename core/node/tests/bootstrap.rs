use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use kiln_blockstore::{DataRef, Layer};
use kiln_dag::unixfs::UnixfsData;
use kiln_dag::{Node as DagNode, PbLink};
use kiln_datastore::MapDatastore;
use kiln_interfaces::prelude::*;
use kiln_interfaces::HostParams;
use kiln_node::discovery::discover_once;
use kiln_node::files::FILES_ROOT_KEY;
use kiln_node::reprovider::Reprovider;
use kiln_node::{
    new_node,
    BuildConfig,
    CancellationToken,
    HostOption,
    Keypair,
    MemoryNetwork,
    MockRepo,
    Node,
    NodeError,
    Repo,
    RepoConfig,
    ReproviderStrategy,
    RoutingOption,
};
use kiln_pinner::PinMode;
use kiln_test_utils::datastore::FlakyDatastore;
use kiln_test_utils::logging;
use kiln_test_utils::random::{get_seedable_rng, random_blocks};
use pretty_assertions::assert_eq;
use tokio::sync::Notify;

const EMPTY_DIR: &str = "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn";

fn generated_config() -> RepoConfig {
    RepoConfig::generate(&Keypair::generate())
}

fn repo(datastore: Arc<dyn Datastore>, config: RepoConfig) -> Option<Arc<dyn Repo>> {
    Some(Arc::new(MockRepo::new(datastore, config)))
}

fn online(network: &MemoryNetwork) -> BuildConfig {
    BuildConfig {
        online: true,
        host: Some(HostOption::memory(network.clone())),
        routing: Some(RoutingOption::memory(network.clone())),
        ..Default::default()
    }
}

/// Adds a directory holding a single raw leaf. Returns the directory and the leaf.
async fn add_tree(node: &Node, content: &'static [u8]) -> (Cid, Cid) {
    let leaf = node
        .dag()
        .add(&DagNode::Raw(Bytes::from_static(content)))
        .await
        .unwrap();
    let dir = UnixfsData::directory()
        .into_node(vec![PbLink {
            cid: leaf,
            name: Some("leaf".to_string()),
            size: Some(content.len() as u64),
        }])
        .unwrap();
    let dir = node.dag().add(&DagNode::Pb(dir)).await.unwrap();
    (dir, leaf)
}

#[tokio::test]
async fn test_repo_and_nil_repo_conflict() {
    let datastore = Arc::new(FlakyDatastore::new());
    let cfg = BuildConfig {
        nil_repo: true,
        repo: repo(datastore.clone(), generated_config()),
        ..Default::default()
    };

    let res = new_node(CancellationToken::new(), cfg).await;
    assert!(matches!(res, Err(NodeError::ConfigConflict)));
    assert_eq!(datastore.calls(), 0);
    assert_eq!(datastore.closed(), 0);
}

#[tokio::test]
async fn test_offline_nil_repo() {
    logging::setup();
    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            nil_repo: true,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    assert!(!node.is_online());
    assert!(node.transport().is_none());
    assert!(node.reprovider().is_none());
    assert_eq!(
        node.layers(),
        &[
            Layer::Retry,
            Layer::Datastore,
            Layer::Verify,
            Layer::IdStore,
            Layer::CidV0V1,
            Layer::GcGuard,
        ]
    );

    let mut rng = get_seedable_rng();
    let block = random_blocks(&mut rng, 1, 64).remove(0);
    let err = node.block_service().get_block(block.cid()).await.unwrap_err();
    assert!(err.is_not_found());

    assert!(node.pinner().recursive_keys().is_empty());
    assert!(node.pinner().direct_keys().is_empty());
    assert_eq!(node.files_root().to_string(), EMPTY_DIR);
    node.close().await;
}

#[tokio::test]
async fn test_default_build_has_cache() {
    let node = new_node(CancellationToken::new(), BuildConfig::default())
        .await
        .unwrap();
    assert!(node.layers().contains(&Layer::Cache));
    assert!(node.filestore().is_none());
    node.close().await;
}

#[tokio::test]
async fn test_pins_survive_restart() {
    let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
    let config = generated_config();

    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore.clone(), config.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let (dir, leaf) = add_tree(&node, b"pinned content").await;
    node.pinner().pin(&dir, true).await.unwrap();
    node.pinner().flush().await.unwrap();
    let files_root = node.files_root();
    let identity = node.identity();
    node.close().await;

    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore, config),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(node.identity(), identity);
    assert_eq!(node.files_root(), files_root);
    assert_eq!(node.pinner().recursive_keys(), vec![dir]);
    assert_eq!(
        node.pinner().is_pinned(&dir).await.unwrap(),
        Some(PinMode::Recursive)
    );
    assert_eq!(
        node.pinner().is_pinned(&leaf).await.unwrap(),
        Some(PinMode::Indirect(dir))
    );
    node.close().await;
}

#[tokio::test]
async fn test_corrupt_pin_state_is_fatal() {
    let datastore = Arc::new(FlakyDatastore::new());
    datastore
        .put(Key::new("/local/pins"), Bytes::from_static(b"garbage"))
        .await
        .unwrap();

    let res = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore.clone(), generated_config()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(res, Err(NodeError::Pin(_))));
    assert_eq!(datastore.closed(), 1);
}

#[tokio::test]
async fn test_online_nodes_exchange_blocks() {
    logging::setup();
    let network = MemoryNetwork::new();
    let a = new_node(CancellationToken::new(), online(&network))
        .await
        .unwrap();
    let b = new_node(CancellationToken::new(), online(&network))
        .await
        .unwrap();
    assert!(a.is_online());
    assert_eq!(network.len(), 2);

    let block = Block::raw(&b"shared over the network"[..]);
    let cid = a.block_service().add_block(block.clone()).await.unwrap();

    let fetched = b.block_service().get_block(&cid).await.unwrap();
    assert_eq!(fetched.data(), block.data());
    assert!(b.blockstore().has(&cid).await.unwrap());
    assert!(!b.peerstore().peer_info(&a.identity()).addrs.is_empty());

    let (dir, leaf) = add_tree(&a, b"a small tree").await;
    let resolved = b
        .resolver()
        .resolve(&format!("/ipfs/{dir}/leaf"))
        .await
        .unwrap();
    assert_eq!(resolved, leaf);

    a.close().await;
    b.close().await;
    assert!(network.is_empty());
}

#[tokio::test]
async fn test_online_needs_private_key() {
    let datastore = Arc::new(FlakyDatastore::new());
    let mut config = generated_config();
    config.identity.priv_key = None;

    let network = MemoryNetwork::new();
    let res = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore.clone(), config),
            ..online(&network)
        },
    )
    .await;
    assert!(matches!(res, Err(NodeError::Identity(_))));
    assert_eq!(datastore.closed(), 1);
    assert!(network.is_empty());
}

#[tokio::test]
async fn test_missing_peer_id() {
    let mut config = generated_config();
    config.identity.peer_id = String::new();
    let res = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(Arc::new(MapDatastore::new()), config),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(res, Err(NodeError::Identity(_))));
}

#[tokio::test]
async fn test_host_failure_unwinds() {
    let datastore = Arc::new(FlakyDatastore::new());
    let res = new_node(
        CancellationToken::new(),
        BuildConfig {
            online: true,
            host: Some(HostOption::new(|_| Err(anyhow!("no sockets left")))),
            repo: repo(datastore.clone(), generated_config()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(res, Err(NodeError::Other(_))));
    assert_eq!(datastore.closed(), 1);
}

#[tokio::test]
async fn test_routing_failure_closes_host() {
    let network = MemoryNetwork::new();
    let datastore = Arc::new(FlakyDatastore::new());
    let res = new_node(
        CancellationToken::new(),
        BuildConfig {
            routing: Some(RoutingOption::new(|_| Err(anyhow!("no routing")))),
            repo: repo(datastore.clone(), generated_config()),
            ..online(&network)
        },
    )
    .await;
    assert!(matches!(res, Err(NodeError::Other(_))));
    assert!(network.is_empty());
    assert_eq!(datastore.closed(), 1);
}

#[tokio::test]
async fn test_cancelled_before_construction() {
    let token = CancellationToken::new();
    token.cancel();
    let datastore = Arc::new(FlakyDatastore::new());
    let res = new_node(
        token,
        BuildConfig {
            repo: repo(datastore.clone(), generated_config()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(res, Err(NodeError::Cancelled)));
    assert_eq!(datastore.closed(), 1);
}

/// A host whose listener never comes up.
struct StalledHost {
    inner: Arc<dyn PeerTransport>,
    listening: Arc<Notify>,
}

#[async_trait]
impl PeerTransport for StalledHost {
    fn local_peer(&self) -> PeerId {
        self.inner.local_peer()
    }

    async fn listen(&self, _addrs: &[String]) -> anyhow::Result<Vec<String>> {
        self.listening.notify_one();
        std::future::pending().await
    }

    async fn dial(&self, peer: &PeerInfo) -> anyhow::Result<()> {
        self.inner.dial(peer).await
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.inner.connected_peers()
    }

    async fn discover(&self) -> anyhow::Result<Vec<PeerInfo>> {
        self.inner.discover().await
    }

    fn serve(&self, blocks: Arc<dyn Blockstore>) {
        self.inner.serve(blocks)
    }

    async fn request_block(&self, peer: &PeerId, cid: &Cid) -> anyhow::Result<Option<Bytes>> {
        self.inner.request_block(peer, cid).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.inner.close().await
    }
}

/// Counts how often the wrapped routing was closed.
struct TrackedRouting {
    inner: Arc<dyn Routing>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl Routing for TrackedRouting {
    async fn bootstrap(&self, peers: &[PeerInfo]) -> anyhow::Result<()> {
        self.inner.bootstrap(peers).await
    }

    async fn provide(&self, cid: &Cid) -> anyhow::Result<()> {
        self.inner.provide(cid).await
    }

    async fn find_providers(&self, cid: &Cid, limit: usize) -> anyhow::Result<Vec<PeerInfo>> {
        self.inner.find_providers(cid, limit).await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_cancelled_while_host_starts_listening() {
    logging::setup();
    let network = MemoryNetwork::new();
    let listening = Arc::new(Notify::new());
    let routing_closed = Arc::new(AtomicUsize::new(0));

    let host = {
        let network = network.clone();
        let listening = listening.clone();
        HostOption::new(move |params: HostParams| {
            let inner: Arc<dyn PeerTransport> = Arc::new(network.transport(params)?);
            Ok(Arc::new(StalledHost {
                inner,
                listening: listening.clone(),
            }))
        })
    };
    let routing = {
        let network = network.clone();
        let closed = routing_closed.clone();
        RoutingOption::new(move |params| {
            Ok(Arc::new(TrackedRouting {
                inner: Arc::new(network.routing(params.peer_id)),
                closed: closed.clone(),
            }))
        })
    };

    let token = CancellationToken::new();
    let datastore = Arc::new(FlakyDatastore::new());
    let build = new_node(
        token.clone(),
        BuildConfig {
            online: true,
            host: Some(host),
            routing: Some(routing),
            repo: repo(datastore.clone(), generated_config()),
            ..Default::default()
        },
    );
    let cancel = async {
        listening.notified().await;
        assert_eq!(network.len(), 1);
        token.cancel();
    };
    let (res, ()) = tokio::join!(build, cancel);

    assert!(matches!(res, Err(NodeError::Cancelled)));
    assert_eq!(datastore.closed(), 1);
    assert_eq!(routing_closed.load(Ordering::SeqCst), 1);
    assert!(network.is_empty());
}

#[tokio::test]
async fn test_files_root_is_persisted() {
    let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
    let mut config = generated_config();
    config.experimental.sharding_enabled = true;

    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore.clone(), config.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let root = node.files_root();
    assert_ne!(root.to_string(), EMPTY_DIR);
    let DagNode::Pb(pb) = node.dag().get(&root).await.unwrap() else {
        panic!("files root is not a dag-pb node");
    };
    assert_eq!(UnixfsData::from_node(&pb).unwrap(), UnixfsData::hamt_shard());
    assert_eq!(
        datastore.get(&Key::new(FILES_ROOT_KEY)).await.unwrap(),
        Bytes::from(root.to_bytes())
    );
    node.close().await;

    // The stored root wins over the sharding switch.
    config.experimental.sharding_enabled = false;
    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore.clone(), config),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(node.files_root(), root);
    node.close().await;
}

#[tokio::test]
async fn test_corrupt_files_root() {
    let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
    datastore
        .put(Key::new(FILES_ROOT_KEY), Bytes::from_static(b"not a cid"))
        .await
        .unwrap();
    let res = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore, generated_config()),
            ..Default::default()
        },
    )
    .await;
    assert!(matches!(
        res,
        Err(NodeError::Datastore(DatastoreError::Corrupt(_)))
    ));
}

#[tokio::test]
async fn test_gc_keeps_pinned_blocks() {
    let node = new_node(CancellationToken::new(), BuildConfig::default())
        .await
        .unwrap();
    let (dir, leaf) = add_tree(&node, b"keep me").await;
    node.pinner().pin(&dir, true).await.unwrap();

    let direct = node
        .dag()
        .add(&DagNode::Raw(Bytes::from_static(b"pinned directly")))
        .await
        .unwrap();
    node.pinner().pin(&direct, false).await.unwrap();
    node.pinner().flush().await.unwrap();

    let garbage = node
        .dag()
        .add(&DagNode::Raw(Bytes::from_static(b"nobody wants me")))
        .await
        .unwrap();

    let removed = node.collect_garbage().await.unwrap();
    assert_eq!(removed, vec![garbage]);

    let blockstore = node.blockstore();
    for cid in [dir, leaf, direct, node.files_root()] {
        assert!(blockstore.has(&cid).await.unwrap(), "{cid} was collected");
    }
    for cid in node.pinner().internal_pins() {
        assert!(blockstore.has(&cid).await.unwrap());
    }
    assert!(!blockstore.has(&garbage).await.unwrap());
    assert!(!node.gc_locker().gc_requested());

    node.close().await;
    assert!(matches!(
        node.collect_garbage().await,
        Err(NodeError::Closed)
    ));
}

#[tokio::test]
async fn test_disabled_encryption_cannot_dial_encrypted_peers() {
    let network = MemoryNetwork::new();
    let secure = new_node(CancellationToken::new(), online(&network))
        .await
        .unwrap();
    let plain = new_node(
        CancellationToken::new(),
        BuildConfig {
            disable_encryption: true,
            ..online(&network)
        },
    )
    .await
    .unwrap();

    let target = PeerInfo {
        id: secure.identity(),
        addrs: vec![],
    };
    let transport = plain.transport().unwrap();
    assert!(transport.dial(&target).await.is_err());
    assert!(!transport.connected_peers().contains(&secure.identity()));

    secure.close().await;
    plain.close().await;
}

#[tokio::test]
async fn test_filestore_serves_file_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let content = b"some bytes that stay in a file";
    std::fs::write(dir.path().join("data.txt"), content).unwrap();

    let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
    let mut config = generated_config();
    config.experimental.filestore_enabled = true;
    let repo = MockRepo::new(datastore, config).with_file_manager(dir.path());

    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: Some(Arc::new(repo)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(node.layers().ends_with(&[Layer::Filestore, Layer::Verify, Layer::GcGuard]));

    let block = Block::raw(&content[..]);
    node.filestore()
        .unwrap()
        .put_ref(
            block.cid(),
            DataRef::File {
                path: dir.path().join("data.txt"),
                offset: 0,
                size: content.len() as u64,
            },
        )
        .await
        .unwrap();

    let fetched = node.block_service().get_block(block.cid()).await.unwrap();
    assert_eq!(fetched.data(), block.data());
    assert!(!node.base_blocks().has(block.cid()).await.unwrap());
    node.close().await;
}

#[tokio::test]
async fn test_filestore_follows_config_read_at_build() {
    let dir = tempfile::tempdir().unwrap();
    let content = b"enabled after the repo was opened";
    std::fs::write(dir.path().join("late.txt"), content).unwrap();

    let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
    let mut config = generated_config();
    let repo = MockRepo::new(datastore, config.clone()).with_file_manager(dir.path());
    config.experimental.filestore_enabled = true;
    repo.set_config(config);

    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: Some(Arc::new(repo)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(node.layers().contains(&Layer::Filestore));

    let block = Block::raw(&content[..]);
    node.filestore()
        .unwrap()
        .put_ref(
            block.cid(),
            DataRef::File {
                path: "late.txt".into(),
                offset: 0,
                size: content.len() as u64,
            },
        )
        .await
        .unwrap();
    assert_eq!(
        node.block_service().get_block(block.cid()).await.unwrap().data(),
        block.data()
    );
    node.close().await;
}

#[tokio::test]
async fn test_file_manager_without_switch_adds_no_overlay() {
    let dir = tempfile::tempdir().unwrap();
    let datastore: Arc<dyn Datastore> = Arc::new(MapDatastore::new());
    let repo = MockRepo::new(datastore, generated_config()).with_file_manager(dir.path());

    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: Some(Arc::new(repo)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(!node.layers().contains(&Layer::Filestore));
    assert!(node.filestore().is_none());
    node.close().await;
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let datastore = Arc::new(FlakyDatastore::new());
    let node = new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(datastore.clone(), generated_config()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    node.close().await;
    node.close().await;
    assert!(node.is_closed());
    assert_eq!(datastore.closed(), 1);
    assert!(matches!(
        node.set_files_root(node.files_root()).await,
        Err(NodeError::Closed)
    ));
}

/// An online node without background services.
async fn quiet_node(network: &MemoryNetwork) -> Node {
    let mut config = generated_config();
    config.discovery.mdns.enabled = false;
    config.reprovider.interval = Duration::ZERO;
    new_node(
        CancellationToken::new(),
        BuildConfig {
            repo: repo(Arc::new(MapDatastore::new()), config),
            ..online(network)
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_reprovider_strategies() {
    let network = MemoryNetwork::new();
    let node = quiet_node(&network).await;
    let (dir, leaf) = add_tree(&node, b"announced").await;
    node.pinner().pin(&dir, true).await.unwrap();
    let loose = node
        .dag()
        .add(&DagNode::Raw(Bytes::from_static(b"not pinned")))
        .await
        .unwrap();

    let reprovider = node.reprovider().unwrap();
    assert_eq!(reprovider.strategy(), ReproviderStrategy::All);
    let all = reprovider.keys().await.unwrap();
    assert!(all.is_superset(&BTreeSet::from([dir, leaf, loose, node.files_root()])));
    assert_eq!(reprovider.provide_all().await.unwrap(), all.len());

    let reprovider_with = |strategy| {
        Reprovider::new(
            strategy,
            node.blockstore().clone(),
            node.pinner().clone(),
            node.dag().clone(),
            node.routing().unwrap().clone(),
        )
    };
    assert_eq!(
        reprovider_with(ReproviderStrategy::Pinned)
            .keys()
            .await
            .unwrap(),
        BTreeSet::from([dir, leaf])
    );
    assert_eq!(
        reprovider_with(ReproviderStrategy::Roots)
            .keys()
            .await
            .unwrap(),
        BTreeSet::from([dir])
    );
    node.close().await;
}

#[tokio::test]
async fn test_local_discovery() {
    let network = MemoryNetwork::new();
    let a = quiet_node(&network).await;
    let b = quiet_node(&network).await;

    let transport = a.transport().unwrap();
    assert!(transport.connected_peers().is_empty());
    assert_eq!(discover_once(transport.as_ref()).await.unwrap(), 1);
    assert_eq!(transport.connected_peers(), vec![b.identity()]);
    assert_eq!(discover_once(transport.as_ref()).await.unwrap(), 0);

    a.close().await;
    b.close().await;
}
