use std::sync::Arc;

use async_trait::async_trait;
use kiln_interfaces::prelude::*;

/// Answers from the local blockstore only. A miss is final.
pub struct OfflineExchange {
    blockstore: Arc<dyn Blockstore>,
}

impl OfflineExchange {
    pub fn new(blockstore: Arc<dyn Blockstore>) -> Self {
        Self { blockstore }
    }
}

#[async_trait]
impl Exchange for OfflineExchange {
    async fn get_block(&self, cid: &Cid) -> Result<Block, ExchangeError> {
        match self.blockstore.get(cid).await {
            Ok(block) => Ok(block),
            Err(BlockstoreError::NotFound(_)) => Err(ExchangeError::NotFound(*cid)),
            Err(e) => Err(e.into()),
        }
    }

    async fn has_block(&self, _block: &Block) -> Result<(), ExchangeError> {
        Ok(())
    }

    fn is_online(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}
