mod accum;
mod backend;
mod io;
mod memory;

pub use accum::MetadataAccumulator;
pub use backend::{DriverError, FileDriver, StorageDriver};
pub use io::FileIo;
pub use memory::{IoRecord, MemoryDriver};
