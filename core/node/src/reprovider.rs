//! Periodic announcement of local content to the content routing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use kiln_dag::DagService;
use kiln_interfaces::prelude::*;
use kiln_pinner::Pinner;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ReproviderStrategy;
use crate::error::NodeError;

pub struct Reprovider {
    strategy: ReproviderStrategy,
    blockstore: Arc<dyn Blockstore>,
    pinner: Arc<Pinner>,
    dag: Arc<DagService>,
    routing: Arc<dyn Routing>,
}

impl Reprovider {
    pub fn new(
        strategy: ReproviderStrategy,
        blockstore: Arc<dyn Blockstore>,
        pinner: Arc<Pinner>,
        dag: Arc<DagService>,
        routing: Arc<dyn Routing>,
    ) -> Self {
        Self {
            strategy,
            blockstore,
            pinner,
            dag,
            routing,
        }
    }

    pub fn strategy(&self) -> ReproviderStrategy {
        self.strategy
    }

    /// The CIDs announced by one round.
    pub async fn keys(&self) -> Result<BTreeSet<Cid>, NodeError> {
        let mut keys = BTreeSet::new();
        match self.strategy {
            ReproviderStrategy::All => {
                keys.extend(self.blockstore.all_keys().await?);
            },
            ReproviderStrategy::Roots => {
                keys.extend(self.pinner.direct_keys());
                keys.extend(self.pinner.recursive_keys());
            },
            ReproviderStrategy::Pinned => {
                keys.extend(self.pinner.direct_keys());
                for root in self.pinner.recursive_keys() {
                    keys.extend(self.dag.walk(&root).await?);
                }
            },
        }
        Ok(keys)
    }

    /// Announces every key once. Keys that fail to be announced are skipped.
    pub async fn provide_all(&self) -> Result<usize, NodeError> {
        let keys = self.keys().await?;
        let mut provided = 0;
        for cid in &keys {
            match self.routing.provide(cid).await {
                Ok(()) => provided += 1,
                Err(e) => debug!("Failed to provide {cid}: {e:#}"),
            }
        }
        Ok(provided)
    }

    /// Runs a round every `interval`, starting right away. Never returns; stop it by dropping
    /// the future.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.provide_all().await {
                Ok(count) => info!("Reprovided {count} keys"),
                Err(e) => warn!("Reprovide round failed: {e}"),
            }
        }
    }
}
