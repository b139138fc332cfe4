use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use ipld_core::codec::Codec;
use ipld_dagpb::{DagPbCodec, PbLink, PbNode};
use kiln_interfaces::hash;
use kiln_interfaces::prelude::*;

use crate::blockservice::BlockService;
use crate::error::DagError;

/// A decoded merkle-DAG node.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// A dag-pb node with named links.
    Pb(PbNode),
    /// A leaf of opaque bytes.
    Raw(Bytes),
}

impl Node {
    pub fn links(&self) -> &[PbLink] {
        match self {
            Node::Pb(node) => &node.links,
            Node::Raw(_) => &[],
        }
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Node::Pb(node) => node.data.as_ref(),
            Node::Raw(data) => Some(data),
        }
    }

    /// Encodes the node into the block it is stored as. dag-pb nodes get a CIDv0, raw leaves a
    /// CIDv1.
    pub fn encode(&self) -> Result<Block, DagError> {
        match self {
            Node::Pb(node) => {
                let data = <DagPbCodec as Codec<PbNode>>::encode_to_vec(node)
                    .map_err(|e| DagError::Encode(e.to_string()))?;
                let cid = Cid::new_v0(hash::sha2_256(&data))
                    .map_err(|e| DagError::Encode(e.to_string()))?;
                Ok(Block::new_unchecked(cid, data))
            },
            Node::Raw(data) => Ok(Block::raw(data.clone())),
        }
    }

    pub fn decode(block: &Block) -> Result<Self, DagError> {
        let cid = block.cid();
        match cid.codec() {
            hash::DAG_PB => {
                let node: PbNode = <DagPbCodec as Codec<PbNode>>::decode_from_slice(block.data()).map_err(|e| {
                    DagError::Decode {
                        cid: *cid,
                        reason: e.to_string(),
                    }
                })?;
                Ok(Node::Pb(node))
            },
            hash::RAW => Ok(Node::Raw(block.data().clone())),
            codec => Err(DagError::UnsupportedCodec { cid: *cid, codec }),
        }
    }
}

/// Stores and loads DAG nodes through a [`BlockService`].
pub struct DagService {
    blocks: Arc<BlockService>,
}

impl DagService {
    pub fn new(blocks: Arc<BlockService>) -> Self {
        Self { blocks }
    }

    pub fn block_service(&self) -> &Arc<BlockService> {
        &self.blocks
    }

    pub async fn get(&self, cid: &Cid) -> Result<Node, DagError> {
        let block = self.blocks.get_block(cid).await?;
        Node::decode(&block)
    }

    pub async fn add(&self, node: &Node) -> Result<Cid, DagError> {
        let block = node.encode()?;
        Ok(self.blocks.add_block(block).await?)
    }

    pub async fn remove(&self, cid: &Cid) -> Result<(), DagError> {
        Ok(self.blocks.delete_block(cid).await?)
    }

    /// Every CID reachable from `root`, the root included. Each node is loaded, so a
    /// successful walk means the whole graph is available.
    pub async fn walk(&self, root: &Cid) -> Result<BTreeSet<Cid>, DagError> {
        let mut seen = BTreeSet::from([*root]);
        let mut queue = VecDeque::from([*root]);
        while let Some(cid) = queue.pop_front() {
            for link in self.get(&cid).await?.links() {
                if seen.insert(link.cid) {
                    queue.push_back(link.cid);
                }
            }
        }
        Ok(seen)
    }
}
