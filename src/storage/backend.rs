use crate::pages::{Address, PageClass};

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("access of {len} bytes at {addr:#x} is beyond the end of allocation")]
    AddressOverflow { addr: Address, len: usize },
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Byte-addressable storage below the page buffer.
///
/// Drivers are shared by reference, so implementations that need to mutate
/// state do it through interior mutability.
pub trait StorageDriver: Send + Sync {
    fn read(&self, class: PageClass, addr: Address, buf: &mut [u8]) -> Result<(), DriverError>;
    fn write(&self, class: PageClass, addr: Address, data: &[u8]) -> Result<(), DriverError>;
    /// End of allocation for `class`.
    fn eoa(&self, class: PageClass) -> Result<Address, DriverError>;
    fn set_eoa(&self, class: PageClass, addr: Address) -> Result<(), DriverError>;
    /// End of file, `None` when the driver cannot know it (multi-writer).
    fn eof(&self) -> Result<Option<Address>, DriverError>;
    /// Allocation page size, `None` when the driver does not allocate by page.
    fn page_size(&self) -> Option<usize>;
    fn fsync(&self) -> Result<(), DriverError>;

    /// Whether other processes write to the same file concurrently.
    fn multi_writer(&self) -> bool {
        false
    }
}

pub(crate) fn check_bounds(addr: Address, len: usize, eoa: Address) -> Result<(), DriverError> {
    match addr.checked_add(len as u64) {
        Some(end) if end <= eoa => Ok(()),
        _ => Err(DriverError::AddressOverflow { addr, len }),
    }
}

/// Positional I/O on a regular file.
///
/// Reads past the physical end of the file return zeros, so a page that
/// was allocated but never written reads back empty.
pub struct FileDriver {
    file: File,
    page_size: Option<usize>,
    eoa: AtomicU64,
}

impl FileDriver {
    /// Creates (or truncates) a file.
    pub fn create<P: AsRef<Path>>(path: P, page_size: Option<usize>) -> Result<Self, DriverError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(DriverError::Io)?;

        Ok(Self {
            file,
            page_size,
            eoa: AtomicU64::new(0),
        })
    }

    /// Opens an existing file, the end of allocation starts at its length.
    pub fn open<P: AsRef<Path>>(path: P, page_size: Option<usize>) -> Result<Self, DriverError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(false)
            .truncate(false)
            .open(path)
            .map_err(DriverError::Io)?;

        let len = file.metadata()?.len();

        Ok(Self {
            file,
            page_size,
            eoa: AtomicU64::new(len),
        })
    }
}

impl StorageDriver for FileDriver {
    fn read(&self, _class: PageClass, addr: Address, buf: &mut [u8]) -> Result<(), DriverError> {
        check_bounds(addr, buf.len(), self.eoa.load(Ordering::Relaxed))?;

        let mut done = 0;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], addr + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(DriverError::Io(err)),
            }
        }
        // past eof
        buf[done..].fill(0);

        Ok(())
    }

    fn write(&self, _class: PageClass, addr: Address, data: &[u8]) -> Result<(), DriverError> {
        check_bounds(addr, data.len(), self.eoa.load(Ordering::Relaxed))?;

        self.file
            .write_all_at(data, addr)
            .map_err(DriverError::Io)
    }

    fn eoa(&self, _class: PageClass) -> Result<Address, DriverError> {
        Ok(self.eoa.load(Ordering::Relaxed))
    }

    fn set_eoa(&self, _class: PageClass, addr: Address) -> Result<(), DriverError> {
        self.eoa.store(addr, Ordering::Relaxed);
        Ok(())
    }

    fn eof(&self) -> Result<Option<Address>, DriverError> {
        Ok(Some(self.file.metadata()?.len()))
    }

    fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    /// Syncs file data and metadata to the disk.
    fn fsync(&self) -> Result<(), DriverError> {
        self.file.sync_all().map_err(DriverError::Io)
    }
}
