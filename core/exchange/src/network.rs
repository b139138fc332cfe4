use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use kiln_interfaces::prelude::*;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::Config;

/// Fetches missing blocks from other peers.
///
/// The local blockstore is checked first. After that the providers known to content routing
/// are asked, then every peer we are already connected to. Fetched blocks are checked against
/// their CID and stored locally before they are returned.
pub struct NetworkExchange {
    blockstore: Arc<dyn Blockstore>,
    transport: Arc<dyn PeerTransport>,
    routing: Arc<dyn Routing>,
    config: Config,
    closed: AtomicBool,
}

impl NetworkExchange {
    pub fn new(
        blockstore: Arc<dyn Blockstore>,
        transport: Arc<dyn PeerTransport>,
        routing: Arc<dyn Routing>,
        config: Config,
    ) -> Self {
        transport.serve(blockstore.clone());
        Self {
            blockstore,
            transport,
            routing,
            config,
            closed: AtomicBool::new(false),
        }
    }

    async fn candidates(&self, cid: &Cid) -> Vec<PeerId> {
        let mut peers = Vec::new();
        match self
            .routing
            .find_providers(cid, self.config.max_providers)
            .await
        {
            Ok(providers) => {
                for provider in providers {
                    if !self.transport.connected_peers().contains(&provider.id) {
                        if let Err(e) = self.transport.dial(&provider).await {
                            debug!("Failed to dial provider {}: {e:#}", provider.id);
                            continue;
                        }
                    }
                    peers.push(provider.id);
                }
            },
            Err(e) => warn!("Failed to find providers for {cid}: {e:#}"),
        }

        let seen: HashSet<PeerId> = peers.iter().copied().collect();
        peers.extend(
            self.transport
                .connected_peers()
                .into_iter()
                .filter(|peer| !seen.contains(peer)),
        );
        peers
    }

    async fn fetch_from(&self, peer: &PeerId, cid: &Cid) -> Option<Block> {
        let res = timeout(
            self.config.request_timeout,
            self.transport.request_block(peer, cid),
        )
        .await;
        let data = match res {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                trace!("Peer {peer} does not have {cid}");
                return None;
            },
            Ok(Err(e)) => {
                debug!("Request for {cid} to {peer} failed: {e:#}");
                return None;
            },
            Err(_) => {
                debug!("Request for {cid} to {peer} timed out");
                return None;
            },
        };
        match Block::new(*cid, data) {
            Ok(block) => Some(block),
            Err(e) => {
                warn!("Peer {peer} sent a bad block for {cid}: {e}");
                None
            },
        }
    }
}

#[async_trait]
impl Exchange for NetworkExchange {
    async fn get_block(&self, cid: &Cid) -> Result<Block, ExchangeError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ExchangeError::Closed);
        }
        match self.blockstore.get(cid).await {
            Ok(block) => return Ok(block),
            Err(BlockstoreError::NotFound(_)) => {},
            Err(e) => return Err(e.into()),
        }

        for peer in self.candidates(cid).await {
            if let Some(block) = self.fetch_from(&peer, cid).await {
                self.blockstore.put(block.clone()).await?;
                debug!("Fetched {cid} from {peer}");
                return Ok(block);
            }
        }
        Err(ExchangeError::NotFound(*cid))
    }

    async fn has_block(&self, block: &Block) -> Result<(), ExchangeError> {
        self.routing
            .provide(block.cid())
            .await
            .map_err(ExchangeError::Transport)
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        if self.closed.swap(true, Ordering::Relaxed) {
            return Ok(());
        }
        self.routing.close().await.map_err(ExchangeError::Transport)?;
        self.transport.close().await.map_err(ExchangeError::Transport)
    }
}
