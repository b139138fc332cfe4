use std::fmt;
use std::sync::Arc;

use kiln_interfaces::prelude::*;
use kiln_interfaces::HostParams;

use crate::memory::{MemoryNetwork, NullRouting};

type HostConstructor = dyn Fn(HostParams) -> anyhow::Result<Arc<dyn PeerTransport>> + Send + Sync;
type RoutingConstructor =
    dyn Fn(RoutingParams) -> anyhow::Result<Arc<dyn Routing>> + Send + Sync;

/// Builds the peer transport of an online node.
#[derive(Clone)]
pub struct HostOption(Arc<HostConstructor>);

impl HostOption {
    pub fn new(
        f: impl Fn(HostParams) -> anyhow::Result<Arc<dyn PeerTransport>> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Hosts attached to the given in-process network.
    pub fn memory(network: MemoryNetwork) -> Self {
        Self::new(move |params| Ok(Arc::new(network.transport(params)?)))
    }

    pub fn build(&self, params: HostParams) -> anyhow::Result<Arc<dyn PeerTransport>> {
        (self.0)(params)
    }
}

impl Default for HostOption {
    /// A host on a private network of its own.
    fn default() -> Self {
        Self::new(|params| Ok(Arc::new(MemoryNetwork::new().transport(params)?)))
    }
}

impl fmt::Debug for HostOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostOption")
    }
}

/// Everything a routing option may use to build the content routing of a node.
pub struct RoutingParams {
    pub peer_id: PeerId,
    pub transport: Arc<dyn PeerTransport>,
    pub datastore: Arc<dyn Datastore>,
}

/// Builds the content routing of an online node.
#[derive(Clone)]
pub struct RoutingOption(Arc<RoutingConstructor>);

impl RoutingOption {
    pub fn new(
        f: impl Fn(RoutingParams) -> anyhow::Result<Arc<dyn Routing>> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    /// Provider records shared through an in-process network.
    pub fn memory(network: MemoryNetwork) -> Self {
        Self::new(move |params| Ok(Arc::new(network.routing(params.peer_id))))
    }

    pub fn build(&self, params: RoutingParams) -> anyhow::Result<Arc<dyn Routing>> {
        (self.0)(params)
    }
}

impl Default for RoutingOption {
    /// No content routing at all.
    fn default() -> Self {
        Self::new(|_| Ok(Arc::new(NullRouting)))
    }
}

impl fmt::Debug for RoutingOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RoutingOption")
    }
}
