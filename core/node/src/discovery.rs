use std::sync::Arc;
use std::time::Duration;

use kiln_interfaces::prelude::*;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

/// Dials every newly discovered local peer. Returns the number of new connections.
pub async fn discover_once(transport: &dyn PeerTransport) -> anyhow::Result<usize> {
    let local = transport.local_peer();
    let connected = transport.connected_peers();
    let mut dialed = 0;
    for peer in transport.discover().await? {
        if peer.id == local || connected.contains(&peer.id) {
            continue;
        }
        match transport.dial(&peer).await {
            Ok(()) => {
                debug!("Connected to discovered peer {}", peer.id);
                dialed += 1;
            },
            Err(e) => trace!("Failed to dial discovered peer {}: {e:#}", peer.id),
        }
    }
    Ok(dialed)
}

/// Runs local discovery every `interval` until the future is dropped.
pub async fn run_discovery(transport: Arc<dyn PeerTransport>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = discover_once(transport.as_ref()).await {
            debug!("Local discovery failed: {e:#}");
        }
    }
}
