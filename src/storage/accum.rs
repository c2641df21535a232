use super::backend::{DriverError, StorageDriver};
use crate::config::AccumulatorConfig;
use crate::pages::{Address, PageClass};

use tracing::trace;

/// Intersection of two byte ranges, as `(start, end)`.
fn overlap(a: Address, a_len: usize, b: Address, b_len: usize) -> Option<(Address, Address)> {
    let start = a.max(b);
    let end = (a + a_len as u64).min(b + b_len as u64);
    (start < end).then_some((start, end))
}

/// Coalesces small contiguous metadata writes into one region.
///
/// The region always holds bytes that have not reached the driver yet.
/// Anything that writes to the driver behind its back must go through
/// [`MetadataAccumulator::write_through`] so the region cannot clobber
/// newer bytes when it is flushed.
pub struct MetadataAccumulator {
    max_size: usize,
    addr: Address,
    data: Vec<u8>,
}

impl MetadataAccumulator {
    pub fn new(config: &AccumulatorConfig) -> Self {
        Self {
            max_size: config.max_size,
            addr: 0,
            data: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Start address and length of the accumulated region.
    pub fn region(&self) -> Option<(Address, usize)> {
        (!self.data.is_empty()).then_some((self.addr, self.data.len()))
    }

    fn end(&self) -> Address {
        self.addr + self.data.len() as u64
    }

    pub fn read<D: StorageDriver + ?Sized>(
        &self,
        driver: &D,
        class: PageClass,
        addr: Address,
        buf: &mut [u8],
    ) -> Result<(), DriverError> {
        let len = buf.len();
        if !self.data.is_empty() && addr >= self.addr && addr + len as u64 <= self.end() {
            let offset = (addr - self.addr) as usize;
            buf.copy_from_slice(&self.data[offset..offset + len]);
            return Ok(());
        }

        driver.read(class, addr, buf)?;
        self.overlay(addr, buf);
        Ok(())
    }

    /// Copies accumulated bytes over the matching part of `buf`.
    fn overlay(&self, addr: Address, buf: &mut [u8]) {
        if let Some((start, end)) = overlap(addr, buf.len(), self.addr, self.data.len()) {
            let src = (start - self.addr) as usize..(end - self.addr) as usize;
            let dst = (start - addr) as usize..(end - addr) as usize;
            buf[dst].copy_from_slice(&self.data[src]);
        }
    }

    /// Copies `data` over the matching part of the region.
    fn patch(&mut self, addr: Address, data: &[u8]) {
        if let Some((start, end)) = overlap(addr, data.len(), self.addr, self.data.len()) {
            let dst = (start - self.addr) as usize..(end - self.addr) as usize;
            let src = (start - addr) as usize..(end - addr) as usize;
            self.data[dst].copy_from_slice(&data[src]);
        }
    }

    pub fn write<D: StorageDriver + ?Sized>(
        &mut self,
        driver: &D,
        class: PageClass,
        addr: Address,
        data: &[u8],
    ) -> Result<(), DriverError> {
        if class == PageClass::RawData || data.len() > self.max_size {
            return self.write_through(driver, class, addr, data);
        }

        if self.data.is_empty() {
            self.addr = addr;
            self.data.extend_from_slice(data);
            return Ok(());
        }

        let end = addr + data.len() as u64;
        let touches = addr <= self.end() && end >= self.addr;
        let start = addr.min(self.addr);
        let merged_len = (end.max(self.end()) - start) as usize;

        if touches && merged_len <= self.max_size {
            if addr < self.addr {
                let shift = (self.addr - addr) as usize;
                self.data.splice(0..0, std::iter::repeat_n(0, shift));
                self.addr = addr;
            }
            if self.data.len() < merged_len {
                self.data.resize(merged_len, 0);
            }
            let offset = (addr - self.addr) as usize;
            self.data[offset..offset + data.len()].copy_from_slice(data);
            trace!(addr, len = data.len(), "metadata write accumulated");
            return Ok(());
        }

        self.flush(driver)?;
        self.addr = addr;
        self.data.extend_from_slice(data);
        Ok(())
    }

    /// Writes straight to the driver, keeping the region consistent.
    pub fn write_through<D: StorageDriver + ?Sized>(
        &mut self,
        driver: &D,
        class: PageClass,
        addr: Address,
        data: &[u8],
    ) -> Result<(), DriverError> {
        driver.write(class, addr, data)?;
        self.patch(addr, data);
        Ok(())
    }

    pub fn flush<D: StorageDriver + ?Sized>(&mut self, driver: &D) -> Result<(), DriverError> {
        if self.data.is_empty() {
            return Ok(());
        }
        driver.write(PageClass::Metadata, self.addr, &self.data)?;
        trace!(addr = self.addr, len = self.data.len(), "accumulator flushed");
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDriver;

    fn accumulator(max_size: usize) -> MetadataAccumulator {
        MetadataAccumulator::new(&AccumulatorConfig { max_size })
    }

    #[test]
    fn contiguous_writes_are_coalesced() {
        let driver = MemoryDriver::new(4096).with_eoa(4096);
        let mut accum = accumulator(1024);

        accum.write(&driver, PageClass::Metadata, 100, &[1; 10]).unwrap();
        accum.write(&driver, PageClass::Metadata, 110, &[2; 10]).unwrap();
        accum.write(&driver, PageClass::Metadata, 90, &[3; 10]).unwrap();
        assert!(driver.log().is_empty());
        assert_eq!(accum.region(), Some((90, 30)));

        accum.flush(&driver).unwrap();
        let writes = driver.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 90);
        assert_eq!(&writes[0].1[..10], &[3; 10]);
        assert_eq!(&writes[0].1[10..20], &[1; 10]);
        assert_eq!(&writes[0].1[20..], &[2; 10]);
        assert!(accum.is_empty());
    }

    #[test]
    fn disjoint_write_flushes_region() {
        let driver = MemoryDriver::new(4096).with_eoa(8192);
        let mut accum = accumulator(1024);

        accum.write(&driver, PageClass::Metadata, 0, &[1; 8]).unwrap();
        accum.write(&driver, PageClass::Metadata, 5000, &[2; 8]).unwrap();
        assert_eq!(driver.writes(), vec![(0, vec![1; 8])]);
        assert_eq!(accum.region(), Some((5000, 8)));
    }

    #[test]
    fn region_is_bounded() {
        let driver = MemoryDriver::new(4096).with_eoa(4096);
        let mut accum = accumulator(16);

        accum.write(&driver, PageClass::Metadata, 0, &[1; 12]).unwrap();
        accum.write(&driver, PageClass::Metadata, 12, &[2; 12]).unwrap();
        assert_eq!(driver.writes(), vec![(0, vec![1; 12])]);

        // larger than the region itself
        accum.write(&driver, PageClass::Metadata, 100, &[3; 32]).unwrap();
        assert_eq!(driver.writes().len(), 2);
        assert_eq!(accum.region(), Some((12, 12)));
    }

    #[test]
    fn reads_see_accumulated_bytes() {
        let driver = MemoryDriver::new(4096).with_eoa(4096);
        driver.poke(0, &[9; 64]);
        let mut accum = accumulator(1024);
        accum.write(&driver, PageClass::Metadata, 16, &[5; 8]).unwrap();

        let mut inside = [0u8; 4];
        accum.read(&driver, PageClass::Metadata, 18, &mut inside).unwrap();
        assert_eq!(inside, [5; 4]);
        assert!(driver.reads().is_empty());

        let mut around = [0u8; 32];
        accum.read(&driver, PageClass::Metadata, 8, &mut around).unwrap();
        assert_eq!(&around[..8], &[9; 8]);
        assert_eq!(&around[8..16], &[5; 8]);
        assert_eq!(&around[16..], &[9; 16]);
    }

    #[test]
    fn raw_write_patches_region() {
        let driver = MemoryDriver::new(4096).with_eoa(4096);
        let mut accum = accumulator(1024);
        accum.write(&driver, PageClass::Metadata, 0, &[1; 16]).unwrap();
        accum.write(&driver, PageClass::RawData, 8, &[2; 16]).unwrap();

        accum.flush(&driver).unwrap();
        assert_eq!(driver.contents(0, 24), [[1u8; 8], [2; 8], [2; 8]].concat());
    }
}
