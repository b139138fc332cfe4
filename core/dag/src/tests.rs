use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use kiln_blockstore::BlockstoreBuilder;
use kiln_datastore::MapDatastore;
use kiln_exchange::OfflineExchange;
use kiln_interfaces::prelude::*;
use pretty_assertions::assert_eq;

use crate::unixfs::{self, UnixfsData};
use crate::{BlockService, DagService, Node, PathResolver, PbLink};

async fn dag() -> Arc<DagService> {
    let built = BlockstoreBuilder::new(Arc::new(MapDatastore::new()))
        .build()
        .await
        .unwrap();
    let blockstore: Arc<dyn Blockstore> = built.blockstore;
    let exchange = Arc::new(OfflineExchange::new(blockstore.clone()));
    Arc::new(DagService::new(Arc::new(BlockService::new(blockstore, exchange))))
}

fn link(name: &str, cid: Cid) -> PbLink {
    PbLink {
        cid,
        name: Some(name.to_string()),
        size: None,
    }
}

async fn add_dir(dag: &DagService, links: Vec<PbLink>) -> Cid {
    let node = UnixfsData::directory().into_node(links).unwrap();
    dag.add(&Node::Pb(node)).await.unwrap()
}

#[tokio::test]
async fn test_add_and_get() {
    let dag = dag().await;

    let leaf = dag
        .add(&Node::Raw(Bytes::from_static(b"leaf")))
        .await
        .unwrap();
    assert_eq!(leaf.codec(), kiln_interfaces::hash::RAW);
    assert_eq!(
        dag.get(&leaf).await.unwrap(),
        Node::Raw(Bytes::from_static(b"leaf"))
    );

    let dir = add_dir(&dag, vec![link("leaf", leaf)]).await;
    assert_eq!(dir.version(), kiln_interfaces::cid::Version::V0);
    let node = dag.get(&dir).await.unwrap();
    assert_eq!(node.links().len(), 1);
    assert_eq!(node.links()[0].cid, leaf);

    dag.remove(&leaf).await.unwrap();
    assert!(dag.get(&leaf).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_walk_collects_descendants() {
    let dag = dag().await;
    let a = dag.add(&Node::Raw(Bytes::from_static(b"a"))).await.unwrap();
    let b = dag.add(&Node::Raw(Bytes::from_static(b"b"))).await.unwrap();
    let inner = add_dir(&dag, vec![link("b", b)]).await;
    // `a` is linked twice but reported once.
    let root = add_dir(&dag, vec![link("a", a), link("again", a), link("inner", inner)]).await;

    let walked = dag.walk(&root).await.unwrap();
    assert_eq!(walked, BTreeSet::from([root, inner, a, b]));
}

#[tokio::test]
async fn test_resolve_paths() {
    let dag = dag().await;
    let file = dag
        .add(&Node::Pb(unixfs::file_node(Bytes::from_static(b"content")).unwrap()))
        .await
        .unwrap();
    let sub = add_dir(&dag, vec![link("file.txt", file)]).await;
    let root = add_dir(&dag, vec![link("sub", sub)]).await;
    let resolver = PathResolver::new(dag.clone());

    assert_eq!(resolver.resolve(&format!("/ipfs/{root}")).await.unwrap(), root);
    assert_eq!(
        resolver
            .resolve(&format!("/ipfs/{root}/sub/file.txt"))
            .await
            .unwrap(),
        file
    );
    assert_eq!(resolver.resolve(&format!("{root}/sub")).await.unwrap(), sub);

    let err = resolver
        .resolve(&format!("/ipfs/{root}/missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, crate::DagError::NoLink { name, .. } if name == "missing"));
}

#[tokio::test]
async fn test_resolve_through_shards() {
    let dag = dag().await;
    let target = dag
        .add(&Node::Raw(Bytes::from_static(b"deep")))
        .await
        .unwrap();
    let nested = UnixfsData::hamt_shard()
        .into_node(vec![link("1Fname", target)])
        .unwrap();
    let nested = dag.add(&Node::Pb(nested)).await.unwrap();
    let shard = UnixfsData::hamt_shard()
        .into_node(vec![link("A3", nested)])
        .unwrap();
    let shard = dag.add(&Node::Pb(shard)).await.unwrap();

    let resolver = PathResolver::new(dag);
    assert_eq!(
        resolver.resolve(&format!("/ipfs/{shard}/name")).await.unwrap(),
        target
    );
}

#[tokio::test]
async fn test_empty_directory_is_stable() {
    let plain = Node::Pb(unixfs::empty_directory(false).unwrap());
    // The well known CID of an empty unixfs directory.
    assert_eq!(
        plain.encode().unwrap().cid().to_string(),
        "QmUNLLsPACCz1vLxQVkXqqLX5R1X345qqfHbsf67hvA3Nn"
    );
    let sharded = Node::Pb(unixfs::empty_directory(true).unwrap());
    assert_ne!(plain.encode().unwrap().cid(), sharded.encode().unwrap().cid());
}

#[tokio::test]
async fn test_decode_rejects_unknown_codec() {
    let block = Block::new_unchecked(
        Cid::new_v1(0x71, kiln_interfaces::hash::sha2_256(b"cbor")),
        &b"cbor"[..],
    );
    assert!(matches!(
        Node::decode(&block),
        Err(crate::DagError::UnsupportedCodec { codec: 0x71, .. })
    ));
}
