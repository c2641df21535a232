pub mod cache;
pub mod config;
pub mod file;
pub mod pages;
pub mod storage;

pub use cache::{DestroyError, PageBuffer, PageBufferError, PageBufferStats};
pub use config::{AccumulatorConfig, PageBufferConfig};
pub use file::PagedFile;
pub use pages::{Address, PageClass};
