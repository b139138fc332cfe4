use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kiln_blockstore::FileManager;
use kiln_interfaces::prelude::*;
use parking_lot::RwLock;

use crate::config::RepoConfig;

/// The persistent state a node is built on.
#[async_trait]
pub trait Repo: Send + Sync {
    fn datastore(&self) -> Arc<dyn Datastore>;

    fn config(&self) -> anyhow::Result<RepoConfig>;

    /// The manager of blocks referenced by file or url, when the repo has one.
    fn file_manager(&self) -> Option<Arc<FileManager>>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// A repo that lives next to the node: a datastore plus a config held in memory.
pub struct MockRepo {
    datastore: Arc<dyn Datastore>,
    config: RwLock<RepoConfig>,
    file_root: Option<PathBuf>,
}

impl MockRepo {
    pub fn new(datastore: Arc<dyn Datastore>, config: RepoConfig) -> Self {
        Self {
            datastore,
            config: RwLock::new(config),
            file_root: None,
        }
    }

    /// Attaches a file manager rooted at `root`. It follows the experimental switches of the
    /// config current at the time it is handed out.
    pub fn with_file_manager(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    pub fn set_config(&self, config: RepoConfig) {
        *self.config.write() = config;
    }
}

#[async_trait]
impl Repo for MockRepo {
    fn datastore(&self) -> Arc<dyn Datastore> {
        self.datastore.clone()
    }

    fn config(&self) -> anyhow::Result<RepoConfig> {
        Ok(self.config.read().clone())
    }

    fn file_manager(&self) -> Option<Arc<FileManager>> {
        let root = self.file_root.clone()?;
        let experimental = self.config.read().experimental.clone();
        Some(Arc::new(
            FileManager::new(self.datastore.clone(), root)
                .with_files(experimental.filestore_enabled)
                .with_urls(experimental.urlstore_enabled),
        ))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.datastore.close().await?;
        Ok(())
    }
}
