mod lru;
mod pagebuffer;
mod stats;

pub use lru::RecencyList;
pub use pagebuffer::{DestroyError, PageBuffer, PageBufferError};
pub use stats::{ClassStats, PageBufferStats};
