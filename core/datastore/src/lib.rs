mod map;
mod null;
pub mod retry;

pub use map::MapDatastore;
pub use null::NullDatastore;
pub use retry::{RetryDatastore, RetryPolicy};
