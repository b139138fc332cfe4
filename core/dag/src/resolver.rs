use std::sync::Arc;

use ipld_dagpb::PbLink;
use kiln_interfaces::prelude::*;
use tracing::trace;

use crate::dag::{DagService, Node};
use crate::error::DagError;
use crate::unixfs::{DataType, UnixfsData};

/// Resolves paths of the form `/ipfs/<cid>/a/b` (or `<cid>/a/b`) by following named links.
pub struct PathResolver {
    dag: Arc<DagService>,
}

impl PathResolver {
    pub fn new(dag: Arc<DagService>) -> Self {
        Self { dag }
    }

    pub async fn resolve(&self, path: &str) -> Result<Cid, DagError> {
        let (root, segments) = split_path(path)?;
        let mut current = root;
        for segment in segments {
            let node = self.dag.get(&current).await?;
            current = self.resolve_link(&current, &node, segment).await?;
            trace!("Resolved '{segment}' to {current}");
        }
        Ok(current)
    }

    pub async fn resolve_node(&self, path: &str) -> Result<Node, DagError> {
        let cid = self.resolve(path).await?;
        self.dag.get(&cid).await
    }

    async fn resolve_link(&self, parent: &Cid, node: &Node, name: &str) -> Result<Cid, DagError> {
        let no_link = || DagError::NoLink {
            cid: *parent,
            name: name.to_string(),
        };
        let Node::Pb(pb) = node else {
            return Err(no_link());
        };

        let sharded = pb
            .data
            .as_ref()
            .and_then(|data| UnixfsData::decode(data).ok())
            .is_some_and(|data| data.kind == DataType::HAMTShard);
        if !sharded {
            return find(&pb.links, name).ok_or_else(no_link);
        }

        // Shard entries are named with a two hex digit bucket prefix. Bare prefixes point at
        // nested shards.
        let mut shards = vec![pb.links.clone()];
        while let Some(links) = shards.pop() {
            for link in &links {
                let Some(link_name) = link.name.as_deref() else {
                    continue;
                };
                if link_name.len() == 2 {
                    if let Node::Pb(child) = self.dag.get(&link.cid).await? {
                        shards.push(child.links);
                    }
                } else if link_name.get(2..) == Some(name) {
                    return Ok(link.cid);
                }
            }
        }
        Err(no_link())
    }
}

fn find(links: &[PbLink], name: &str) -> Option<Cid> {
    links
        .iter()
        .find(|link| link.name.as_deref() == Some(name))
        .map(|link| link.cid)
}

fn split_path(path: &str) -> Result<(Cid, Vec<&str>), DagError> {
    let trimmed = path
        .strip_prefix("/ipfs/")
        .or_else(|| path.strip_prefix('/'))
        .unwrap_or(path);
    let mut segments = trimmed.split('/').filter(|s| !s.is_empty());
    let root = segments
        .next()
        .ok_or_else(|| DagError::InvalidPath(path.to_string()))?;
    let root = Cid::try_from(root).map_err(|_| DagError::InvalidPath(path.to_string()))?;
    Ok((root, segments.collect()))
}
