use std::collections::BTreeSet;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use kiln_interfaces::hash;
use kiln_interfaces::prelude::*;
use reqwest::header::RANGE;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, trace};

/// Namespace the file manager keeps its references under.
pub const FILESTORE_PREFIX: &str = "/filestore";

/// Largest byte range a single reference may cover.
pub const MAX_REFERENCED_SIZE: u64 = 2 << 20;

/// Where the content of a block lives outside of the blockstore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataRef {
    /// A byte range of a file below the file manager root.
    File {
        path: PathBuf,
        offset: u64,
        size: u64,
    },
    /// A byte range of an http(s) resource.
    Url { url: String, offset: u64, size: u64 },
}

impl DataRef {
    pub fn size(&self) -> u64 {
        match self {
            DataRef::File { size, .. } | DataRef::Url { size, .. } => *size,
        }
    }

    pub fn offset(&self) -> u64 {
        match self {
            DataRef::File { offset, .. } | DataRef::Url { offset, .. } => *offset,
        }
    }

    /// Returns the exclusive end of the referenced range.
    fn end(&self) -> Result<u64, BlockstoreError> {
        let (offset, size) = (self.offset(), self.size());
        if size > MAX_REFERENCED_SIZE {
            return Err(BlockstoreError::Filestore(format!(
                "referenced range of {size} bytes exceeds the limit of {MAX_REFERENCED_SIZE}"
            )));
        }
        offset.checked_add(size).ok_or_else(|| {
            BlockstoreError::Filestore(format!("referenced range at {offset} overflows"))
        })
    }
}

/// Tracks blocks whose bytes are kept in user files or behind URLs instead of being copied
/// into the repo.
pub struct FileManager {
    datastore: Arc<dyn Datastore>,
    root: PathBuf,
    allow_files: bool,
    allow_urls: bool,
    client: reqwest::Client,
}

impl FileManager {
    pub fn new(datastore: Arc<dyn Datastore>, root: impl Into<PathBuf>) -> Self {
        Self {
            datastore,
            root: root.into(),
            allow_files: false,
            allow_urls: false,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_files(mut self, allow: bool) -> Self {
        self.allow_files = allow;
        self
    }

    pub fn with_urls(mut self, allow: bool) -> Self {
        self.allow_urls = allow;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key(cid: &Cid) -> Key {
        Key::new(FILESTORE_PREFIX).child(cid.to_string())
    }

    /// Records that the content of `cid` lives at `data_ref`.
    ///
    /// File paths may be given relative to the root or as absolute paths inside it. They are
    /// stored relative to the root.
    pub async fn put_ref(&self, cid: &Cid, data_ref: DataRef) -> Result<(), BlockstoreError> {
        data_ref.end()?;
        let data_ref = match data_ref {
            DataRef::File { path, offset, size } => {
                if !self.allow_files {
                    return Err(BlockstoreError::Filestore(
                        "filestore is not enabled".to_string(),
                    ));
                }
                DataRef::File {
                    path: self.relative(&path)?,
                    offset,
                    size,
                }
            },
            DataRef::Url { url, offset, size } => {
                if !self.allow_urls {
                    return Err(BlockstoreError::Filestore(
                        "urlstore is not enabled".to_string(),
                    ));
                }
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(BlockstoreError::Filestore(format!(
                        "unsupported url scheme in {url}"
                    )));
                }
                DataRef::Url { url, offset, size }
            },
        };

        let encoded = serde_json::to_vec(&data_ref)
            .map_err(|e| BlockstoreError::Filestore(format!("could not encode reference: {e}")))?;
        self.datastore.put(Self::key(cid), encoded.into()).await?;
        Ok(())
    }

    fn relative(&self, path: &Path) -> Result<PathBuf, BlockstoreError> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| {
                BlockstoreError::Filestore(format!(
                    "cannot reference {} outside of {}",
                    path.display(),
                    self.root.display()
                ))
            })?
        } else {
            path
        };
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(BlockstoreError::Filestore(format!(
                "invalid path {}",
                path.display()
            )));
        }
        Ok(relative.to_path_buf())
    }

    pub async fn get_ref(&self, cid: &Cid) -> Result<DataRef, BlockstoreError> {
        let raw = self.datastore.get(&Self::key(cid)).await.map_err(|e| match e {
            DatastoreError::NotFound => BlockstoreError::NotFound(*cid),
            e => e.into(),
        })?;
        serde_json::from_slice(&raw).map_err(|e| {
            BlockstoreError::Filestore(format!("corrupt reference for {cid}: {e}"))
        })
    }

    /// Reads the referenced bytes and checks them against `cid`.
    pub async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        let data_ref = self.get_ref(cid).await?;
        let end = data_ref.end()?;
        let data = match data_ref {
            DataRef::File { path, offset, size } => {
                if !self.allow_files {
                    return Err(BlockstoreError::Filestore(
                        "filestore is not enabled".to_string(),
                    ));
                }
                self.read_file(&path, offset, size).await?
            },
            DataRef::Url { url, offset, size } => {
                if !self.allow_urls {
                    return Err(BlockstoreError::Filestore(
                        "urlstore is not enabled".to_string(),
                    ));
                }
                self.read_url(&url, offset, end).await?
            },
        };

        if !hash::verify(cid, &data).unwrap_or(false) {
            debug!("Referenced data for {cid} changed since it was added");
            return Err(BlockstoreError::IntegrityViolation(*cid));
        }
        Ok(Block::new_unchecked(*cid, data))
    }

    async fn read_file(&self, path: &Path, offset: u64, size: u64) -> Result<Bytes, BlockstoreError> {
        let full = self.root.join(path);
        trace!("Reading {size} bytes at {offset} from {}", full.display());
        let read = async {
            let mut file = tokio::fs::File::open(&full).await?;
            file.seek(SeekFrom::Start(offset)).await?;
            let mut buf = vec![0; size as usize];
            file.read_exact(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        };
        read.await.map(Bytes::from).map_err(|e| {
            BlockstoreError::Filestore(format!("could not read {}: {e}", full.display()))
        })
    }

    async fn read_url(&self, url: &str, offset: u64, end: u64) -> Result<Bytes, BlockstoreError> {
        if end == offset {
            return Ok(Bytes::new());
        }
        let range = format!("bytes={}-{}", offset, end - 1);
        let res = self
            .client
            .get(url)
            .header(RANGE, range)
            .send()
            .await
            .map_err(|e| BlockstoreError::Filestore(format!("request to {url} failed: {e}")))?;
        if !res.status().is_success() {
            return Err(BlockstoreError::Filestore(format!(
                "request to {url} returned {}",
                res.status()
            )));
        }
        let body = res
            .bytes()
            .await
            .map_err(|e| BlockstoreError::Filestore(format!("reading {url} failed: {e}")))?;
        // Servers that ignore the range send the whole resource.
        let body = if body.len() as u64 > end - offset {
            let start = offset.min(body.len() as u64) as usize;
            let end = end.min(body.len() as u64) as usize;
            body.slice(start..end)
        } else {
            body
        };
        Ok(body)
    }

    pub async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        Ok(self.datastore.has(&Self::key(cid)).await?)
    }

    pub async fn delete(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        Ok(self.datastore.delete(&Self::key(cid)).await?)
    }

    pub async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError> {
        let keys = self.datastore.query_keys(&Key::new(FILESTORE_PREFIX)).await?;
        Ok(keys
            .iter()
            .filter_map(|key| Cid::try_from(key.name()).ok())
            .collect())
    }
}

/// Serves blocks from the regular blockstore first and from referenced files second.
pub struct Filestore {
    blocks: Arc<dyn Blockstore>,
    files: Arc<FileManager>,
}

impl Filestore {
    pub fn new(blocks: Arc<dyn Blockstore>, files: Arc<FileManager>) -> Self {
        Self { blocks, files }
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.files
    }

    /// Adds a block by reference. The referenced bytes are read and checked before the
    /// reference is recorded.
    pub async fn put_ref(&self, cid: &Cid, data_ref: DataRef) -> Result<(), BlockstoreError> {
        self.files.put_ref(cid, data_ref).await?;
        if let Err(e) = self.files.get(cid).await {
            self.files.delete(cid).await?;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Blockstore for Filestore {
    async fn get(&self, cid: &Cid) -> Result<Block, BlockstoreError> {
        match self.blocks.get(cid).await {
            Err(BlockstoreError::NotFound(_)) => self.files.get(cid).await,
            res => res,
        }
    }

    async fn has(&self, cid: &Cid) -> Result<bool, BlockstoreError> {
        if self.blocks.has(cid).await? {
            return Ok(true);
        }
        self.files.has(cid).await
    }

    async fn get_size(&self, cid: &Cid) -> Result<usize, BlockstoreError> {
        match self.blocks.get_size(cid).await {
            Err(BlockstoreError::NotFound(_)) => {
                Ok(self.files.get_ref(cid).await?.size() as usize)
            },
            res => res,
        }
    }

    async fn put(&self, block: Block) -> Result<(), BlockstoreError> {
        self.blocks.put(block).await
    }

    async fn put_many(&self, blocks: Vec<Block>) -> Result<(), BlockstoreError> {
        self.blocks.put_many(blocks).await
    }

    async fn delete_block(&self, cid: &Cid) -> Result<(), BlockstoreError> {
        self.blocks.delete_block(cid).await?;
        self.files.delete(cid).await
    }

    async fn all_keys(&self) -> Result<Vec<Cid>, BlockstoreError> {
        let mut keys: BTreeSet<Cid> = self.blocks.all_keys().await?.into_iter().collect();
        keys.extend(self.files.all_keys().await?);
        Ok(keys.into_iter().collect())
    }

    fn hash_on_read(&self, enabled: bool) {
        self.blocks.hash_on_read(enabled)
    }
}
