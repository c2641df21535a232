use crate::cache::{PageBuffer, PageBufferError, PageBufferStats};
use crate::config::{AccumulatorConfig, PageBufferConfig};
use crate::pages::{Address, PageClass};
use crate::storage::{DriverError, FileIo, StorageDriver};

use tracing::{debug, warn};

const CLOSED: &str = "paged file used after close";

/// An open file: the storage driver, the metadata accumulator and, once
/// enabled, the page buffer.
///
/// Without a page buffer every access goes straight to the accumulator and
/// driver. Dropping the file without [`PagedFile::close`] still writes back
/// what it can.
pub struct PagedFile<D: StorageDriver> {
    // only taken by `close`
    io: Option<FileIo<D>>,
    page_buffer: Option<PageBuffer>,
}

impl<D: StorageDriver> PagedFile<D> {
    pub fn open(driver: D, accum: &AccumulatorConfig) -> Self {
        Self {
            io: Some(FileIo::new(driver, accum)),
            page_buffer: None,
        }
    }

    pub fn enable_page_buffer(&mut self, config: &PageBufferConfig) -> Result<(), PageBufferError> {
        if self.page_buffer.is_some() {
            return Err(PageBufferError::Configuration(
                "page buffer already enabled".to_string(),
            ));
        }
        self.page_buffer = Some(PageBuffer::create(self.driver(), config)?);
        Ok(())
    }

    /// Flushes and drops the page buffer, if any.
    ///
    /// On failure the page buffer stays enabled with its dirty pages.
    pub fn disable_page_buffer(&mut self) -> Result<(), PageBufferError> {
        let io = self.io.as_mut().expect(CLOSED);
        if let Some(page_buffer) = self.page_buffer.take()
            && let Err(err) = page_buffer.destroy(io)
        {
            self.page_buffer = Some(*err.buffer);
            return Err(err.source);
        }
        Ok(())
    }

    pub fn page_buffer(&self) -> Option<&PageBuffer> {
        self.page_buffer.as_ref()
    }

    pub fn page_buffer_mut(&mut self) -> Option<&mut PageBuffer> {
        self.page_buffer.as_mut()
    }

    pub fn stats(&self) -> Option<PageBufferStats> {
        self.page_buffer.as_ref().map(PageBuffer::stats)
    }

    pub fn driver(&self) -> &D {
        self.io.as_ref().expect(CLOSED).driver()
    }

    pub fn read(
        &mut self,
        class: PageClass,
        addr: Address,
        buf: &mut [u8],
    ) -> Result<(), PageBufferError> {
        let io = self.io.as_mut().expect(CLOSED);
        match &mut self.page_buffer {
            Some(page_buffer) => page_buffer.read(io, class, addr, buf),
            None => Ok(io.read(class, addr, buf)?),
        }
    }

    pub fn write(&mut self, class: PageClass, addr: Address, data: &[u8]) -> Result<(), PageBufferError> {
        let io = self.io.as_mut().expect(CLOSED);
        match &mut self.page_buffer {
            Some(page_buffer) => page_buffer.write(io, class, addr, data),
            None => Ok(io.write(class, addr, data)?),
        }
    }

    /// Extends the end of allocation by one page and returns its address.
    ///
    /// The page is registered as fresh with the page buffer so its first
    /// access does not read storage.
    pub fn allocate_page(&mut self, class: PageClass) -> Result<Address, PageBufferError> {
        let io = self.io.as_ref().expect(CLOSED);
        let page_size = io
            .driver()
            .page_size()
            .ok_or(DriverError::Unsupported("page allocation on an unpaged driver"))?
            as u64;

        let addr = io.eoa(class)?.next_multiple_of(page_size);
        io.driver().set_eoa(class, addr + page_size)?;
        if let Some(page_buffer) = &mut self.page_buffer {
            page_buffer.register_fresh_page(class, addr)?;
        }

        debug!(%class, addr, "page allocated");
        Ok(addr)
    }

    pub fn flush(&mut self) -> Result<(), PageBufferError> {
        let io = self.io.as_mut().expect(CLOSED);
        match &mut self.page_buffer {
            Some(page_buffer) => page_buffer.flush(io),
            None => Ok(io.flush()?),
        }
    }

    /// Writes everything back, syncs and returns the driver.
    ///
    /// On failure nothing is lost yet: the file is dropped, which retries the
    /// write-back.
    pub fn close(mut self) -> Result<D, PageBufferError> {
        self.disable_page_buffer()?;
        self.flush()?;
        let driver = self.io.take().expect(CLOSED).into_driver()?;
        driver.fsync()?;
        Ok(driver)
    }
}

impl<D: StorageDriver> Drop for PagedFile<D> {
    fn drop(&mut self) {
        let Some(io) = self.io.as_mut() else {
            return;
        };
        let result = match &mut self.page_buffer {
            Some(page_buffer) => page_buffer.flush(io),
            None => io.flush().map_err(PageBufferError::from),
        };
        if let Err(err) = result {
            warn!(error = %err, "paged file dropped with unwritten data");
        }
    }
}
