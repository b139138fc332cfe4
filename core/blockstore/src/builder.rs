use std::fmt;
use std::sync::Arc;

use kiln_datastore::{RetryDatastore, RetryPolicy};
use kiln_interfaces::prelude::*;
use tracing::debug;

use crate::base::DatastoreBlockstore;
use crate::cache::CachedBlockstore;
use crate::cidv0v1::CidV0V1Blockstore;
use crate::config::CacheOpts;
use crate::filestore::{FileManager, Filestore};
use crate::gc::{GcBlockstore, GcLocker};
use crate::idstore::IdStore;
use crate::verify::VerifyingBlockstore;

/// One wrapper of a built blockstore chain, innermost first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    Retry,
    Datastore,
    Verify,
    Cache,
    IdStore,
    CidV0V1,
    Filestore,
    GcGuard,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Retry => "retry",
            Layer::Datastore => "datastore",
            Layer::Verify => "verify",
            Layer::Cache => "cache",
            Layer::IdStore => "idstore",
            Layer::CidV0V1 => "cidv0v1",
            Layer::Filestore => "filestore",
            Layer::GcGuard => "gc",
        };
        f.write_str(name)
    }
}

/// Assembles the blockstore chain of a node on top of a repo datastore.
pub struct BlockstoreBuilder {
    datastore: Arc<dyn Datastore>,
    retry: RetryPolicy,
    cache: Option<CacheOpts>,
    hash_on_read: bool,
    filestore_enabled: bool,
    urlstore_enabled: bool,
    file_manager: Option<Arc<FileManager>>,
}

/// A built chain together with the handles a node keeps on its inner parts.
pub struct LayeredBlockstore {
    /// Everything below the file overlay and the GC guard.
    pub base: Arc<dyn Blockstore>,
    pub filestore: Option<Arc<Filestore>>,
    pub blockstore: Arc<GcBlockstore>,
    pub locker: Arc<GcLocker>,
    layers: Vec<Layer>,
}

impl LayeredBlockstore {
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }
}

impl BlockstoreBuilder {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self {
            datastore,
            retry: RetryPolicy::default(),
            cache: Some(CacheOpts::default()),
            hash_on_read: false,
            filestore_enabled: false,
            urlstore_enabled: false,
            file_manager: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Pass `None` to build without the caching layer.
    pub fn with_cache(mut self, opts: Option<CacheOpts>) -> Self {
        self.cache = opts;
        self
    }

    pub fn with_hash_on_read(mut self, enabled: bool) -> Self {
        self.hash_on_read = enabled;
        self
    }

    /// Turns on the file overlay for local files or urls. Needs a file manager as well.
    pub fn with_filestore(mut self, filestore: bool, urlstore: bool) -> Self {
        self.filestore_enabled = filestore;
        self.urlstore_enabled = urlstore;
        self
    }

    pub fn with_file_manager(mut self, file_manager: Option<Arc<FileManager>>) -> Self {
        self.file_manager = file_manager;
        self
    }

    pub async fn build(self) -> Result<LayeredBlockstore, BlockstoreError> {
        let mut layers = vec![Layer::Retry, Layer::Datastore, Layer::Verify];

        let datastore: Arc<dyn Datastore> =
            Arc::new(RetryDatastore::new(self.datastore, self.retry));
        let mut bs: Arc<dyn Blockstore> = Arc::new(DatastoreBlockstore::new(datastore));
        bs = Arc::new(VerifyingBlockstore::new(bs));

        if let Some(opts) = self.cache {
            bs = Arc::new(CachedBlockstore::new(bs, opts).await?);
            layers.push(Layer::Cache);
        }

        bs = Arc::new(IdStore::new(bs));
        layers.push(Layer::IdStore);
        bs = Arc::new(CidV0V1Blockstore::new(bs));
        layers.push(Layer::CidV0V1);

        if self.hash_on_read {
            bs.hash_on_read(true);
        }
        let base = bs.clone();

        let file_manager = self
            .file_manager
            .filter(|_| self.filestore_enabled || self.urlstore_enabled);
        let filestore = match file_manager {
            Some(fm) => {
                let filestore = Arc::new(Filestore::new(bs, fm));
                bs = Arc::new(VerifyingBlockstore::new(filestore.clone()));
                layers.extend([Layer::Filestore, Layer::Verify]);
                Some(filestore)
            },
            None => None,
        };

        let locker = Arc::new(GcLocker::new());
        let blockstore = Arc::new(GcBlockstore::new(bs, locker.clone()));
        layers.push(Layer::GcGuard);

        debug!(
            "Built blockstore chain: {}",
            layers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(LayeredBlockstore {
            base,
            filestore,
            blockstore,
            locker,
            layers,
        })
    }
}
