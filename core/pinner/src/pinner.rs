use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use kiln_dag::{DagService, Node, PbLink, PbNode};
use kiln_interfaces::prelude::*;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::PinError;

/// Datastore key holding the raw CID bytes of the pin set root.
pub const PINS_KEY: &str = "/local/pins";

const DIRECT_LINK: &str = "direct";
const RECURSIVE_LINK: &str = "recursive";

/// Why a block is kept alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinMode {
    Direct,
    Recursive,
    /// Reachable from the given recursive pin.
    Indirect(Cid),
}

#[derive(Default)]
struct PinSets {
    direct: BTreeSet<Cid>,
    recursive: BTreeSet<Cid>,
    /// The nodes the sets themselves are stored in.
    internal: BTreeSet<Cid>,
}

/// Keeps track of the blocks that must survive garbage collection.
///
/// Pins are persisted as a small DAG: a root node linking a `direct` and a `recursive` set
/// node, whose links are the pinned CIDs. The root CID is stored under [`PINS_KEY`].
pub struct Pinner {
    datastore: Arc<dyn Datastore>,
    dag: Arc<DagService>,
    internal: Arc<DagService>,
    sets: RwLock<PinSets>,
}

impl Pinner {
    /// An empty pinner. `internal` stores the pin set nodes and should never reach the
    /// network.
    pub fn new(datastore: Arc<dyn Datastore>, dag: Arc<DagService>, internal: Arc<DagService>) -> Self {
        Self {
            datastore,
            dag,
            internal,
            sets: RwLock::new(PinSets::default()),
        }
    }

    /// Loads the persisted pin sets. [`PinError::NotFound`] means nothing was ever stored;
    /// anything unreadable is reported as [`PinError::Corrupt`].
    pub async fn load(
        datastore: Arc<dyn Datastore>,
        dag: Arc<DagService>,
        internal: Arc<DagService>,
    ) -> Result<Self, PinError> {
        let raw = match datastore.get(&Key::new(PINS_KEY)).await {
            Ok(raw) => raw,
            Err(DatastoreError::NotFound) => return Err(PinError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let root = Cid::try_from(raw.as_ref())
            .map_err(|e| PinError::Corrupt(format!("invalid root cid: {e}")))?;

        let root_node = load_node(&internal, &root).await?;
        let mut sets = PinSets::default();
        sets.internal.insert(root);
        for (name, members) in [
            (DIRECT_LINK, &mut sets.direct),
            (RECURSIVE_LINK, &mut sets.recursive),
        ] {
            let link = root_node
                .links
                .iter()
                .find(|link| link.name.as_deref() == Some(name))
                .ok_or_else(|| PinError::Corrupt(format!("root {root} has no '{name}' set")))?;
            let set = load_node(&internal, &link.cid).await?;
            members.extend(set.links.iter().map(|link| link.cid));
            sets.internal.insert(link.cid);
        }

        info!(
            "Loaded {} recursive and {} direct pins",
            sets.recursive.len(),
            sets.direct.len()
        );
        Ok(Self {
            datastore,
            dag,
            internal,
            sets: RwLock::new(sets),
        })
    }

    /// Like [`Pinner::load`], but a repo without pin state gets a fresh, empty pinner.
    pub async fn load_or_create(
        datastore: Arc<dyn Datastore>,
        dag: Arc<DagService>,
        internal: Arc<DagService>,
    ) -> Result<Self, PinError> {
        match Self::load(datastore.clone(), dag.clone(), internal.clone()).await {
            Err(PinError::NotFound) => {
                warn!("No pin state found, starting with an empty pin set");
                Ok(Self::new(datastore, dag, internal))
            },
            res => res,
        }
    }

    /// Pins `cid`. A recursive pin first fetches the whole graph below it.
    pub async fn pin(&self, cid: &Cid, recursive: bool) -> Result<(), PinError> {
        let pinned_recursively = self.sets.read().recursive.contains(cid);
        if recursive {
            if pinned_recursively {
                return Ok(());
            }
            let size = self.dag.walk(cid).await?.len();
            debug!("Pinning {cid} and {} descendants", size - 1);
            let mut sets = self.sets.write();
            sets.direct.remove(cid);
            sets.recursive.insert(*cid);
        } else {
            if pinned_recursively {
                return Err(PinError::PinnedRecursively(*cid));
            }
            self.dag.get(cid).await?;
            self.sets.write().direct.insert(*cid);
        }
        Ok(())
    }

    /// Removes a pin. Removing a recursive pin requires `recursive`.
    pub fn unpin(&self, cid: &Cid, recursive: bool) -> Result<(), PinError> {
        let mut sets = self.sets.write();
        if sets.recursive.contains(cid) {
            if !recursive {
                return Err(PinError::PinnedRecursively(*cid));
            }
            sets.recursive.remove(cid);
            return Ok(());
        }
        if sets.direct.remove(cid) {
            return Ok(());
        }
        Err(PinError::NotPinned(*cid))
    }

    /// How `cid` is pinned, if at all. Indirect pins are found by walking the recursive pins
    /// through the local store only.
    pub async fn is_pinned(&self, cid: &Cid) -> Result<Option<PinMode>, PinError> {
        let recursive = {
            let sets = self.sets.read();
            if sets.recursive.contains(cid) {
                return Ok(Some(PinMode::Recursive));
            }
            if sets.direct.contains(cid) {
                return Ok(Some(PinMode::Direct));
            }
            sets.recursive.clone()
        };
        for root in recursive {
            if self.internal.walk(&root).await?.contains(cid) {
                return Ok(Some(PinMode::Indirect(root)));
            }
        }
        Ok(None)
    }

    pub fn direct_keys(&self) -> Vec<Cid> {
        self.sets.read().direct.iter().copied().collect()
    }

    pub fn recursive_keys(&self) -> Vec<Cid> {
        self.sets.read().recursive.iter().copied().collect()
    }

    /// The blocks the pin sets are stored in.
    pub fn internal_pins(&self) -> Vec<Cid> {
        self.sets.read().internal.iter().copied().collect()
    }

    /// Writes the current pin sets and points [`PINS_KEY`] at them.
    pub async fn flush(&self) -> Result<(), PinError> {
        let (direct, recursive) = {
            let sets = self.sets.read();
            (set_node(&sets.direct), set_node(&sets.recursive))
        };
        let direct = self.internal.add(&Node::Pb(direct)).await?;
        let recursive = self.internal.add(&Node::Pb(recursive)).await?;
        let root = PbNode {
            links: vec![named_link(DIRECT_LINK, direct), named_link(RECURSIVE_LINK, recursive)],
            data: None,
        };
        let root = self.internal.add(&Node::Pb(root)).await?;

        self.datastore
            .put(Key::new(PINS_KEY), Bytes::from(root.to_bytes()))
            .await?;
        self.sets.write().internal = BTreeSet::from([root, direct, recursive]);
        debug!("Flushed pin sets to {root}");
        Ok(())
    }
}

async fn load_node(dag: &DagService, cid: &Cid) -> Result<PbNode, PinError> {
    match dag.get(cid).await {
        Ok(Node::Pb(node)) => Ok(node),
        Ok(Node::Raw(_)) => Err(PinError::Corrupt(format!("{cid} is not a pin set node"))),
        Err(e) => Err(PinError::Corrupt(format!("cannot load {cid}: {e}"))),
    }
}

fn set_node(members: &BTreeSet<Cid>) -> PbNode {
    PbNode {
        links: members
            .iter()
            .map(|cid| PbLink {
                cid: *cid,
                name: Some(String::new()),
                size: None,
            })
            .collect(),
        // Distinguishes the set nodes from an empty unixfs node.
        data: Some(Bytes::from_static(b"pins")),
    }
}

fn named_link(name: &str, cid: Cid) -> PbLink {
    PbLink {
        cid,
        name: Some(name.to_string()),
        size: None,
    }
}
