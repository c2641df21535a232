use super::backend::{DriverError, StorageDriver, check_bounds};
use crate::pages::{Address, PageClass};

use parking_lot::Mutex;

/// One call made against a [`MemoryDriver`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IoRecord {
    Read {
        class: PageClass,
        addr: Address,
        len: usize,
    },
    Write {
        class: PageClass,
        addr: Address,
        data: Vec<u8>,
    },
}

#[derive(Default)]
struct MemoryInner {
    data: Vec<u8>,
    eoa: Address,
    log: Vec<IoRecord>,
}

/// Storage kept in a growable vector.
///
/// Every read and write is appended to an I/O log, which makes the driver
/// a convenient double for checking what the page buffer sends down.
pub struct MemoryDriver {
    inner: Mutex<MemoryInner>,
    page_size: Option<usize>,
    multi_writer: bool,
}

impl MemoryDriver {
    /// A driver allocating by pages of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            page_size: Some(page_size),
            multi_writer: false,
        }
    }

    pub fn unpaged() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            page_size: None,
            multi_writer: false,
        }
    }

    pub fn with_eoa(self, eoa: Address) -> Self {
        self.inner.lock().eoa = eoa;
        self
    }

    pub fn with_multi_writer(mut self) -> Self {
        self.multi_writer = true;
        self
    }

    /// Reads stored bytes without going through the log.
    pub fn contents(&self, addr: Address, len: usize) -> Vec<u8> {
        let inner = self.inner.lock();
        let mut out = vec![0u8; len];
        let start = addr as usize;
        if start < inner.data.len() {
            let end = (start + len).min(inner.data.len());
            out[..end - start].copy_from_slice(&inner.data[start..end]);
        }
        out
    }

    /// Stores bytes without going through the log, as another writer would.
    pub fn poke(&self, addr: Address, data: &[u8]) {
        let mut inner = self.inner.lock();
        store(&mut inner.data, addr, data);
    }

    pub fn log(&self) -> Vec<IoRecord> {
        self.inner.lock().log.clone()
    }

    pub fn reads(&self) -> Vec<(Address, usize)> {
        self.inner
            .lock()
            .log
            .iter()
            .filter_map(|record| match record {
                IoRecord::Read { addr, len, .. } => Some((*addr, *len)),
                IoRecord::Write { .. } => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(Address, Vec<u8>)> {
        self.inner
            .lock()
            .log
            .iter()
            .filter_map(|record| match record {
                IoRecord::Write { addr, data, .. } => Some((*addr, data.clone())),
                IoRecord::Read { .. } => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.inner.lock().log.clear();
    }
}

fn store(data: &mut Vec<u8>, addr: Address, bytes: &[u8]) {
    let start = addr as usize;
    let end = start + bytes.len();
    if data.len() < end {
        data.resize(end, 0);
    }
    data[start..end].copy_from_slice(bytes);
}

impl StorageDriver for MemoryDriver {
    fn read(&self, class: PageClass, addr: Address, buf: &mut [u8]) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        check_bounds(addr, buf.len(), inner.eoa)?;
        inner.log.push(IoRecord::Read {
            class,
            addr,
            len: buf.len(),
        });

        buf.fill(0);
        let start = addr as usize;
        if start < inner.data.len() {
            let end = (start + buf.len()).min(inner.data.len());
            buf[..end - start].copy_from_slice(&inner.data[start..end]);
        }

        Ok(())
    }

    fn write(&self, class: PageClass, addr: Address, data: &[u8]) -> Result<(), DriverError> {
        let mut inner = self.inner.lock();
        check_bounds(addr, data.len(), inner.eoa)?;
        inner.log.push(IoRecord::Write {
            class,
            addr,
            data: data.to_vec(),
        });
        store(&mut inner.data, addr, data);

        Ok(())
    }

    fn eoa(&self, _class: PageClass) -> Result<Address, DriverError> {
        Ok(self.inner.lock().eoa)
    }

    fn set_eoa(&self, _class: PageClass, addr: Address) -> Result<(), DriverError> {
        self.inner.lock().eoa = addr;
        Ok(())
    }

    fn eof(&self) -> Result<Option<Address>, DriverError> {
        if self.multi_writer {
            return Ok(None);
        }
        Ok(Some(self.inner.lock().data.len() as Address))
    }

    fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    fn fsync(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn multi_writer(&self) -> bool {
        self.multi_writer
    }
}
