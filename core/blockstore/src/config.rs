use serde::{Deserialize, Serialize};

/// Sizing of the caching layer. A zero size disables the corresponding cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOpts {
    /// Number of presence/size entries remembered.
    pub has_cache_size: usize,
    /// Number of blocks whose content is kept in memory.
    pub block_cache_size: usize,
    /// Size of the bloom filter in bytes.
    pub bloom_filter_size: usize,
    pub bloom_filter_hashes: usize,
}

impl Default for CacheOpts {
    fn default() -> Self {
        Self {
            has_cache_size: 64 << 10,
            block_cache_size: 1 << 10,
            bloom_filter_size: 512 << 10,
            bloom_filter_hashes: 7,
        }
    }
}
