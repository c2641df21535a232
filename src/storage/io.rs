use super::accum::MetadataAccumulator;
use super::backend::{DriverError, StorageDriver};
use crate::config::AccumulatorConfig;
use crate::pages::{Address, PageClass};

/// Ranges that wrap around the address space never reach the accumulator.
fn check_range(addr: Address, len: usize) -> Result<(), DriverError> {
    match addr.checked_add(len as u64) {
        Some(_) => Ok(()),
        None => Err(DriverError::AddressOverflow { addr, len }),
    }
}

/// The layer below the page buffer: a storage driver plus the optional
/// metadata accumulator sitting in front of it.
pub struct FileIo<D: StorageDriver> {
    driver: D,
    accum: Option<MetadataAccumulator>,
}

impl<D: StorageDriver> FileIo<D> {
    pub fn new(driver: D, config: &AccumulatorConfig) -> Self {
        let accum = config
            .is_enabled()
            .then(|| MetadataAccumulator::new(config));
        Self { driver, accum }
    }

    /// No accumulator, every call goes straight to the driver.
    pub fn direct(driver: D) -> Self {
        Self {
            driver,
            accum: None,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn accumulator(&self) -> Option<&MetadataAccumulator> {
        self.accum.as_ref()
    }

    pub fn read(&self, class: PageClass, addr: Address, buf: &mut [u8]) -> Result<(), DriverError> {
        if buf.is_empty() {
            return Ok(());
        }
        check_range(addr, buf.len())?;
        match &self.accum {
            Some(accum) => accum.read(&self.driver, class, addr, buf),
            None => self.driver.read(class, addr, buf),
        }
    }

    /// Writes through the accumulator, small metadata writes may be delayed.
    pub fn write(&mut self, class: PageClass, addr: Address, data: &[u8]) -> Result<(), DriverError> {
        if data.is_empty() {
            return Ok(());
        }
        check_range(addr, data.len())?;
        match &mut self.accum {
            Some(accum) => accum.write(&self.driver, class, addr, data),
            None => self.driver.write(class, addr, data),
        }
    }

    /// Writes to the driver immediately.
    pub fn write_through(
        &mut self,
        class: PageClass,
        addr: Address,
        data: &[u8],
    ) -> Result<(), DriverError> {
        if data.is_empty() {
            return Ok(());
        }
        check_range(addr, data.len())?;
        match &mut self.accum {
            Some(accum) => accum.write_through(&self.driver, class, addr, data),
            None => self.driver.write(class, addr, data),
        }
    }

    pub fn eoa(&self, class: PageClass) -> Result<Address, DriverError> {
        self.driver.eoa(class)
    }

    pub fn eof(&self) -> Result<Option<Address>, DriverError> {
        self.driver.eof()
    }

    pub fn flush(&mut self) -> Result<(), DriverError> {
        match &mut self.accum {
            Some(accum) => accum.flush(&self.driver),
            None => Ok(()),
        }
    }

    /// Flushes the accumulator and hands the driver back.
    pub fn into_driver(mut self) -> Result<D, DriverError> {
        self.flush()?;
        Ok(self.driver)
    }
}
