use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kiln_blockstore::cidv0v1::other_version;
use kiln_blockstore::{Filestore, GcBlockstore, GcLocker, Layer, LayeredBlockstore};
use kiln_dag::{BlockService, DagService, PathResolver};
use kiln_exchange::OfflineExchange;
use kiln_interfaces::prelude::*;
use kiln_pinner::Pinner;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::files::set_files_root;
use crate::lifecycle::Lifecycle;
use crate::repo::Repo;
use crate::reprovider::Reprovider;
use crate::validator::NamespacedValidator;

/// The services only an online node runs.
#[derive(Default)]
pub(crate) struct Services {
    pub transport: Option<Arc<dyn PeerTransport>>,
    pub routing: Option<Arc<dyn Routing>>,
    pub reprovider: Option<Arc<Reprovider>>,
}

/// A running node. Built by [`crate::new_node`], stopped by [`Node::close`].
pub struct Node {
    pub(crate) identity: PeerId,
    pub(crate) peerstore: Arc<Peerstore>,
    pub(crate) validator: Arc<NamespacedValidator>,
    pub(crate) repo: Arc<dyn Repo>,
    pub(crate) blocks: LayeredBlockstore,
    pub(crate) exchange: Arc<dyn Exchange>,
    pub(crate) block_service: Arc<BlockService>,
    pub(crate) dag: Arc<DagService>,
    pub(crate) pinner: Arc<Pinner>,
    pub(crate) resolver: Arc<PathResolver>,
    pub(crate) files_root: RwLock<Cid>,
    pub(crate) online: bool,
    pub(crate) services: Services,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) closed: AtomicBool,
}

impl Node {
    pub fn identity(&self) -> PeerId {
        self.identity
    }

    pub fn peerstore(&self) -> &Arc<Peerstore> {
        &self.peerstore
    }

    pub fn validator(&self) -> &Arc<NamespacedValidator> {
        &self.validator
    }

    pub fn repo(&self) -> &Arc<dyn Repo> {
        &self.repo
    }

    /// The blockstore below the file overlay and the GC guard.
    pub fn base_blocks(&self) -> &Arc<dyn Blockstore> {
        &self.blocks.base
    }

    pub fn gc_locker(&self) -> &Arc<GcLocker> {
        &self.blocks.locker
    }

    pub fn blockstore(&self) -> &Arc<GcBlockstore> {
        &self.blocks.blockstore
    }

    pub fn filestore(&self) -> Option<&Arc<Filestore>> {
        self.blocks.filestore.as_ref()
    }

    /// The blockstore layers, innermost first.
    pub fn layers(&self) -> &[Layer] {
        self.blocks.layers()
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn block_service(&self) -> &Arc<BlockService> {
        &self.block_service
    }

    pub fn dag(&self) -> &Arc<DagService> {
        &self.dag
    }

    pub fn pinner(&self) -> &Arc<Pinner> {
        &self.pinner
    }

    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.resolver
    }

    pub fn files_root(&self) -> Cid {
        *self.files_root.read()
    }

    /// Points the files root at `root` and persists the pointer.
    pub async fn set_files_root(&self, root: Cid) -> Result<(), NodeError> {
        self.ensure_open()?;
        set_files_root(&self.repo.datastore(), &root).await?;
        *self.files_root.write() = root;
        Ok(())
    }

    pub fn transport(&self) -> Option<&Arc<dyn PeerTransport>> {
        self.services.transport.as_ref()
    }

    pub fn routing(&self) -> Option<&Arc<dyn Routing>> {
        self.services.routing.as_ref()
    }

    pub fn reprovider(&self) -> Option<&Arc<Reprovider>> {
        self.services.reprovider.as_ref()
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), NodeError> {
        if self.is_closed() {
            return Err(NodeError::Closed);
        }
        Ok(())
    }

    /// Deletes every block that is neither pinned, part of the pin sets, nor reachable from
    /// the files root. Returns the removed CIDs.
    ///
    /// All other blockstore users wait until the pass is over.
    pub async fn collect_garbage(&self) -> Result<Vec<Cid>, NodeError> {
        self.ensure_open()?;

        let guard = self.blocks.blockstore.gc_lock().await;
        let store = guard.blockstore().clone();
        let offline = DagService::new(Arc::new(BlockService::new(
            store.clone(),
            Arc::new(OfflineExchange::new(store.clone())),
        )));

        let mut live = BTreeSet::new();
        for root in self.pinner.recursive_keys() {
            live.extend(offline.walk(&root).await?);
        }
        live.extend(self.pinner.direct_keys());
        live.extend(self.pinner.internal_pins());

        let files_root = self.files_root();
        match offline.walk(&files_root).await {
            Ok(reachable) => live.extend(reachable),
            Err(e) if e.is_not_found() => {
                warn!("Files root {files_root} is incomplete, keeping what is there: {e}");
                live.insert(files_root);
            },
            Err(e) => return Err(e.into()),
        }

        let versions: Vec<Cid> = live.iter().filter_map(other_version).collect();
        live.extend(versions);

        let mut removed = Vec::new();
        for cid in store.all_keys().await? {
            if live.contains(&cid) {
                continue;
            }
            store.delete_block(&cid).await?;
            debug!("Removed {cid}");
            removed.push(cid);
        }

        info!(
            "Garbage collection removed {} blocks, kept {}",
            removed.len(),
            live.len()
        );
        Ok(removed)
    }

    /// Stops background services and tears every layer down in reverse order of
    /// construction. Calling it again does nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stopping node {}", self.identity);
        self.lifecycle.unwind().await;
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        // Teardown is async, so a dropped node only stops its background tasks.
        self.lifecycle.token().cancel();
    }
}
