//! The unixfs data carried in the `Data` field of dag-pb nodes.
//!
//! Only what a node needs for its own bookkeeping is built here: directories, sharded
//! directories and single-block files.

mod proto;

use std::borrow::Cow;

use bytes::Bytes;
use ipld_dagpb::{PbLink, PbNode};
pub use proto::unixfs::mod_Data::DataType;
use proto::unixfs::Data;
use quick_protobuf::{BytesReader, MessageRead, MessageWrite, Writer};

use crate::error::DagError;

/// Multihash code of the murmur3-x64-64 hash that HAMT shards bucket names with.
pub const HAMT_HASH_MURMUR3: u64 = 0x22;
/// Buckets per HAMT shard level.
pub const HAMT_FANOUT: u64 = 256;

/// Owned, decoded unixfs metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnixfsData {
    pub kind: DataType,
    pub data: Option<Bytes>,
    pub filesize: Option<u64>,
    pub blocksizes: Vec<u64>,
    pub hash_type: Option<u64>,
    pub fanout: Option<u64>,
}

impl UnixfsData {
    fn empty(kind: DataType) -> Self {
        Self {
            kind,
            data: None,
            filesize: None,
            blocksizes: vec![],
            hash_type: None,
            fanout: None,
        }
    }

    pub fn directory() -> Self {
        Self::empty(DataType::Directory)
    }

    pub fn hamt_shard() -> Self {
        Self {
            hash_type: Some(HAMT_HASH_MURMUR3),
            fanout: Some(HAMT_FANOUT),
            ..Self::empty(DataType::HAMTShard)
        }
    }

    pub fn file(content: Bytes) -> Self {
        Self {
            filesize: Some(content.len() as u64),
            data: Some(content),
            ..Self::empty(DataType::File)
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, DataType::Directory | DataType::HAMTShard)
    }

    pub fn encode(&self) -> Result<Vec<u8>, DagError> {
        let msg = Data {
            Type: self.kind,
            Data: self.data.as_deref().map(Cow::Borrowed),
            filesize: self.filesize,
            blocksizes: self.blocksizes.clone(),
            hashType: self.hash_type,
            fanout: self.fanout,
        };
        let mut buf = Vec::with_capacity(msg.get_size());
        let mut writer = Writer::new(&mut buf);
        msg.write_message(&mut writer)
            .map_err(|e| DagError::UnixFs(e.to_string()))?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DagError> {
        let msg = Data::from_reader(&mut BytesReader::from_bytes(bytes), bytes)
            .map_err(|e| DagError::UnixFs(e.to_string()))?;
        Ok(Self {
            kind: msg.Type,
            data: msg.Data.map(|d| Bytes::copy_from_slice(&d)),
            filesize: msg.filesize,
            blocksizes: msg.blocksizes,
            hash_type: msg.hashType,
            fanout: msg.fanout,
        })
    }

    /// Reads the unixfs metadata of a dag-pb node.
    pub fn from_node(node: &PbNode) -> Result<Self, DagError> {
        let data = node
            .data
            .as_ref()
            .ok_or_else(|| DagError::UnixFs("node carries no unixfs data".to_string()))?;
        Self::decode(data)
    }

    pub fn into_node(self, mut links: Vec<PbLink>) -> Result<PbNode, DagError> {
        // dag-pb requires links sorted by name.
        links.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(PbNode {
            links,
            data: Some(Bytes::from(self.encode()?)),
        })
    }
}

/// An empty directory node. `sharded` selects the HAMT layout.
pub fn empty_directory(sharded: bool) -> Result<PbNode, DagError> {
    let data = if sharded {
        UnixfsData::hamt_shard()
    } else {
        UnixfsData::directory()
    };
    data.into_node(vec![])
}

/// A file that fits in a single node.
pub fn file_node(content: Bytes) -> Result<PbNode, DagError> {
    UnixfsData::file(content).into_node(vec![])
}
