use async_trait::async_trait;
use cid::Cid;
use thiserror::Error;

use crate::blockstore::BlockstoreError;
use crate::types::Block;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange: block not found: {0}")]
    NotFound(Cid),

    #[error(transparent)]
    Blockstore(#[from] BlockstoreError),

    #[error("exchange: transport failure: {0:#}")]
    Transport(anyhow::Error),

    #[error("exchange: closed")]
    Closed,
}

impl ExchangeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ExchangeError::NotFound(_) | ExchangeError::Blockstore(BlockstoreError::NotFound(_))
        )
    }
}

/// The strategy used to obtain blocks that are not held locally.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn get_block(&self, cid: &Cid) -> Result<Block, ExchangeError>;

    /// Announce that a block is now available locally.
    async fn has_block(&self, block: &Block) -> Result<(), ExchangeError>;

    fn is_online(&self) -> bool;

    async fn close(&self) -> Result<(), ExchangeError>;
}
