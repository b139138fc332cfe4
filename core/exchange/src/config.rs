use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// How long a single peer gets to answer a block request.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    // Maximum number of providers asked for one block.
    pub max_providers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            max_providers: 8,
        }
    }
}
