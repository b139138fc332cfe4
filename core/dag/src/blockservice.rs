use std::sync::Arc;

use kiln_interfaces::prelude::*;
use tracing::trace;

/// Joins the local blockstore and the exchange: reads fall back to the exchange, writes are
/// announced through it.
pub struct BlockService {
    blockstore: Arc<dyn Blockstore>,
    exchange: Arc<dyn Exchange>,
}

impl BlockService {
    pub fn new(blockstore: Arc<dyn Blockstore>, exchange: Arc<dyn Exchange>) -> Self {
        Self {
            blockstore,
            exchange,
        }
    }

    pub fn blockstore(&self) -> &Arc<dyn Blockstore> {
        &self.blockstore
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn is_online(&self) -> bool {
        self.exchange.is_online()
    }

    pub async fn get_block(&self, cid: &Cid) -> Result<Block, ExchangeError> {
        match self.blockstore.get(cid).await {
            Ok(block) => Ok(block),
            Err(BlockstoreError::NotFound(_)) => {
                trace!("Block {cid} not held locally, asking the exchange");
                self.exchange.get_block(cid).await
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Stores the block and announces it.
    pub async fn add_block(&self, block: Block) -> Result<Cid, ExchangeError> {
        let cid = *block.cid();
        self.blockstore.put(block.clone()).await?;
        self.exchange.has_block(&block).await?;
        Ok(cid)
    }

    pub async fn delete_block(&self, cid: &Cid) -> Result<(), ExchangeError> {
        Ok(self.blockstore.delete_block(cid).await?)
    }
}
