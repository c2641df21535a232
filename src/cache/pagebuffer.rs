use crate::cache::lru::RecencyList;
use crate::cache::stats::PageBufferStats;
use crate::config::PageBufferConfig;
use crate::pages::{Address, FreshPage, PageClass, PageEntry, PageSpan, page_align};
use crate::storage::{DriverError, FileIo, StorageDriver};

use std::collections::{BTreeMap, TryReserveError};
use std::ops::Range;

use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Error, Debug)]
pub enum PageBufferError {
    #[error("page allocation failed")]
    Allocation(#[from] TryReserveError),
    #[error("invalid page buffer configuration: {0}")]
    Configuration(String),
    #[error("storage driver")]
    Io(#[from] DriverError),
    #[error("page at {addr:#x} lies beyond the end of allocation {eoa:#x}")]
    OutOfRange { addr: Address, eoa: Address },
    #[error("address {addr:#x} is not aligned to the page size {page_size}")]
    Misaligned { addr: Address, page_size: usize },
}

/// A `destroy` that could not write back every dirty page.
///
/// The buffer is handed back untouched so the caller can retry.
#[derive(Error, Debug)]
#[error("page buffer could not be flushed before destruction")]
pub struct DestroyError {
    pub buffer: Box<PageBuffer>,
    #[source]
    pub source: PageBufferError,
}

/// How a non-resident page got its contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Fault {
    /// Registered as fresh, zero-filled.
    Fresh,
    /// At or past end of file, zero-filled.
    Unwritten,
    Read,
}

/// Where a resident page and a byte range overlap.
struct Overlap {
    page_addr: Address,
    page_range: Range<usize>,
    buf_range: Range<usize>,
    whole_page: bool,
}

/// Bounded page cache sitting between typed file accesses and the driver.
///
/// Pages are kept in an ordered resident index plus a recency list. Each
/// class (metadata, raw data) can reserve a minimum number of pages that
/// eviction for the other class will not take away. Pages the free-space
/// manager just allocated are tracked in a separate fresh index so they can
/// be admitted without reading storage.
///
/// The buffer is not synchronized; it is owned by one open file and all
/// operations take `&mut self`.
#[derive(Debug)]
pub struct PageBuffer {
    page_size: usize,
    max_size: usize,
    min_count: [usize; 2],
    count: [usize; 2],
    resident: BTreeMap<Address, PageEntry>,
    fresh: BTreeMap<Address, FreshPage>,
    lru: RecencyList,
    stats: PageBufferStats,
}

impl PageBuffer {
    /// Creates a page buffer for a file served by `driver`.
    ///
    /// The page size is the driver's allocation page size. A size above one
    /// page is rounded down to a page multiple, anything smaller is refused.
    pub fn create<D: StorageDriver + ?Sized>(
        driver: &D,
        config: &PageBufferConfig,
    ) -> Result<Self, PageBufferError> {
        let page_size = driver.page_size().ok_or_else(|| {
            PageBufferError::Configuration(
                "page buffering requires a driver with paged allocation".to_string(),
            )
        })?;
        if page_size == 0 {
            return Err(PageBufferError::Configuration(
                "page size cannot be 0".to_string(),
            ));
        }
        if config.min_meta_perc as u64 + config.min_raw_perc as u64 > 100 {
            return Err(PageBufferError::Configuration(format!(
                "metadata ({}%) and raw data ({}%) reservations exceed 100%",
                config.min_meta_perc, config.min_raw_perc
            )));
        }
        if config.size < page_size {
            return Err(PageBufferError::Configuration(format!(
                "page buffer size {} is smaller than the page size {}",
                config.size, page_size
            )));
        }

        let max_size = (config.size / page_size) * page_size;
        if max_size != config.size {
            debug!(
                requested = config.size,
                max_size, "page buffer size rounded down to a page multiple"
            );
        }

        let capacity = max_size / page_size;
        let min_count = [
            capacity * config.min_meta_perc as usize / 100,
            capacity * config.min_raw_perc as usize / 100,
        ];

        debug!(
            page_size,
            capacity,
            min_meta = min_count[0],
            min_raw = min_count[1],
            "page buffer created"
        );

        Ok(Self {
            page_size,
            max_size,
            min_count,
            count: [0; 2],
            resident: BTreeMap::new(),
            fresh: BTreeMap::new(),
            lru: RecencyList::new(),
            stats: PageBufferStats::default(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Capacity in bytes.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn capacity_pages(&self) -> usize {
        self.max_size / self.page_size
    }

    /// Pages reserved for `class`.
    pub fn min_count(&self, class: PageClass) -> usize {
        self.min_count[class.index()]
    }

    /// Resident pages of `class`.
    pub fn count(&self, class: PageClass) -> usize {
        self.count[class.index()]
    }

    pub fn len(&self) -> usize {
        self.resident.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resident.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.resident.len() >= self.capacity_pages()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.resident.contains_key(&page_align(addr, self.page_size))
    }

    pub fn page(&self, addr: Address) -> Option<&PageEntry> {
        self.resident.get(&page_align(addr, self.page_size))
    }

    /// Resident pages in address order.
    pub fn pages(&self) -> impl Iterator<Item = &PageEntry> {
        self.resident.values()
    }

    /// Resident page addresses, most recently used first.
    pub fn recency(&self) -> impl Iterator<Item = Address> + '_ {
        self.lru.iter()
    }

    pub fn is_fresh(&self, addr: Address) -> bool {
        self.fresh.contains_key(&addr)
    }

    pub fn fresh_count(&self) -> usize {
        self.fresh.len()
    }

    pub fn stats(&self) -> PageBufferStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn print_stats(&self) {
        print!("{}", self.stats);
    }

    /// Reads `buf.len()` bytes at `addr`.
    ///
    /// Requests of a page or more, and raw data on multi-writer files, go to
    /// the lower layer; dirty resident pages they overlap are copied over the
    /// result. Smaller requests are served from the one or two pages they
    /// touch, faulting pages in as needed.
    pub fn read<D: StorageDriver>(
        &mut self,
        io: &mut FileIo<D>,
        class: PageClass,
        addr: Address,
        buf: &mut [u8],
    ) -> Result<(), PageBufferError> {
        if buf.is_empty() {
            return Ok(());
        }
        check_range(io, class, addr, buf.len())?;
        self.stats.class_mut(class).accesses += 1;

        let multi_writer_raw = class == PageClass::RawData && io.driver().multi_writer();
        if buf.len() >= self.page_size || multi_writer_raw {
            io.read(class, addr, buf)?;
            self.stats.class_mut(class).bypasses += 1;
            trace!(%class, addr, len = buf.len(), "read bypassed page buffer");
            self.overlay_dirty(addr, buf);
            return Ok(());
        }

        for chunk in PageSpan::new(addr, buf.len(), self.page_size) {
            if let Some(entry) = self.resident.get(&chunk.page_addr) {
                buf[chunk.buf_range()].copy_from_slice(&entry.data[chunk.page_range()]);
                self.lru.touch(chunk.page_addr);
                self.stats.class_mut(class).hits += 1;
                trace!(%class, page = chunk.page_addr, "read hit");
                continue;
            }

            if !self.reserve_slot(io, class)? {
                // no legal victim, serve the rest uncached
                let rest_addr = addr + chunk.buf_offset as u64;
                let rest = &mut buf[chunk.buf_offset..];
                io.read(class, rest_addr, rest)?;
                self.overlay_dirty(rest_addr, rest);
                return Ok(());
            }

            let (entry, fault) = self.load_page(io, class, chunk.page_addr, false)?;
            buf[chunk.buf_range()].copy_from_slice(&entry.data[chunk.page_range()]);
            self.insert(entry);
            self.count_fault(class, fault);
            trace!(%class, page = chunk.page_addr, ?fault, "read fault");
        }

        self.debug_check_counts();
        Ok(())
    }

    /// Writes `data` at `addr`.
    ///
    /// Writes of a page or more go to the lower layer: resident pages they
    /// fully cover are discarded, pages they partially cover are updated.
    /// On multi-writer files every write goes to the lower layer and
    /// metadata bytes are then pushed into the resident pages.
    pub fn write<D: StorageDriver>(
        &mut self,
        io: &mut FileIo<D>,
        class: PageClass,
        addr: Address,
        data: &[u8],
    ) -> Result<(), PageBufferError> {
        if data.is_empty() {
            return Ok(());
        }
        check_range(io, class, addr, data.len())?;
        self.stats.class_mut(class).accesses += 1;

        let multi_writer = io.driver().multi_writer();
        if data.len() >= self.page_size || multi_writer {
            io.write(class, addr, data)?;
            self.stats.class_mut(class).bypasses += 1;
            trace!(%class, addr, len = data.len(), "write bypassed page buffer");
            self.forget_fresh(addr, data.len());
            if data.len() >= self.page_size {
                self.reconcile(addr, data, !multi_writer);
            } else if class == PageClass::Metadata {
                self.update_entry(addr, data);
            }
            return Ok(());
        }

        for chunk in PageSpan::new(addr, data.len(), self.page_size) {
            if let Some(entry) = self.resident.get_mut(&chunk.page_addr) {
                entry.data[chunk.page_range()].copy_from_slice(&data[chunk.buf_range()]);
                entry.set_dirty();
                self.lru.touch(chunk.page_addr);
                self.stats.class_mut(class).hits += 1;
                trace!(%class, page = chunk.page_addr, "write hit");
                continue;
            }

            if !self.reserve_slot(io, class)? {
                let rest_addr = addr + chunk.buf_offset as u64;
                let rest = &data[chunk.buf_offset..];
                io.write(class, rest_addr, rest)?;
                self.forget_fresh(rest_addr, rest.len());
                self.update_entry(rest_addr, rest);
                return Ok(());
            }

            let (mut entry, fault) = self.load_page(io, class, chunk.page_addr, true)?;
            entry.data[chunk.page_range()].copy_from_slice(&data[chunk.buf_range()]);
            entry.set_dirty();
            self.insert(entry);
            self.count_fault(class, fault);
            trace!(%class, page = chunk.page_addr, ?fault, "write fault");
        }

        self.debug_check_counts();
        Ok(())
    }

    /// Records that the page at `addr` was just allocated and is empty.
    ///
    /// A later fault on that page is zero-filled instead of read. Does
    /// nothing if the page is already resident or already registered.
    pub fn register_fresh_page(
        &mut self,
        class: PageClass,
        addr: Address,
    ) -> Result<(), PageBufferError> {
        if addr % self.page_size as u64 != 0 {
            return Err(PageBufferError::Misaligned {
                addr,
                page_size: self.page_size,
            });
        }
        if self.resident.contains_key(&addr) || self.fresh.contains_key(&addr) {
            trace!(%class, page = addr, "fresh page already known");
            return Ok(());
        }

        self.fresh.insert(addr, FreshPage { class });
        trace!(%class, page = addr, "fresh page registered");
        Ok(())
    }

    /// Drops the resident page containing `addr` without writing it back.
    ///
    /// Returns whether a page was dropped.
    pub fn remove_entry(&mut self, addr: Address) -> bool {
        let page_addr = page_align(addr, self.page_size);
        let removed = self.detach(page_addr).is_some();
        if removed {
            trace!(page = page_addr, "page removed");
        }
        removed
    }

    /// Copies bytes written elsewhere into the resident pages they touch.
    ///
    /// Pages are promoted but not marked dirty, and nothing is inserted.
    /// Returns the number of pages updated.
    pub fn update_entry(&mut self, addr: Address, data: &[u8]) -> usize {
        if addr.checked_add(data.len() as u64).is_none() {
            return 0;
        }
        let overlaps = self.resident_overlaps(addr, data.len());
        for overlap in &overlaps {
            if let Some(entry) = self.resident.get_mut(&overlap.page_addr) {
                entry.data[overlap.page_range.clone()]
                    .copy_from_slice(&data[overlap.buf_range.clone()]);
                self.lru.touch(overlap.page_addr);
            }
        }
        overlaps.len()
    }

    /// Writes back every dirty page, then flushes the lower layer.
    pub fn flush<D: StorageDriver>(&mut self, io: &mut FileIo<D>) -> Result<(), PageBufferError> {
        for entry in self.resident.values_mut().filter(|entry| entry.is_dirty()) {
            write_back(io, entry)?;
        }
        io.flush()?;
        Ok(())
    }

    /// Flushes and releases the buffer.
    ///
    /// If a write-back fails the buffer comes back inside the error, dirty
    /// pages included.
    pub fn destroy<D: StorageDriver>(mut self, io: &mut FileIo<D>) -> Result<(), DestroyError> {
        if let Err(source) = self.flush(io) {
            return Err(DestroyError {
                buffer: Box::new(self),
                source,
            });
        }
        debug!(
            resident = self.resident.len(),
            fresh = self.fresh.len(),
            "page buffer destroyed"
        );
        Ok(())
    }

    /// Panics if the indices, the recency list and the counters disagree.
    pub fn check_invariants(&self) {
        assert_eq!(self.count[0] + self.count[1], self.resident.len());
        assert_eq!(self.lru.len(), self.resident.len());
        assert!(self.resident.len() <= self.capacity_pages());

        let mut per_class = [0usize; 2];
        for (&addr, entry) in &self.resident {
            assert_eq!(addr, entry.address());
            assert_eq!(addr % self.page_size as u64, 0);
            assert!(self.lru.contains(addr));
            assert!(!self.fresh.contains_key(&addr));
            per_class[entry.class().index()] += 1;
        }
        assert_eq!(per_class, self.count);

        for &addr in self.fresh.keys() {
            assert_eq!(addr % self.page_size as u64, 0);
        }
    }

    fn count_fault(&mut self, class: PageClass, fault: Fault) {
        let stats = self.stats.class_mut(class);
        match fault {
            Fault::Fresh => stats.hits += 1,
            Fault::Read => stats.misses += 1,
            Fault::Unwritten => {}
        }
    }

    fn debug_check_counts(&self) {
        debug_assert_eq!(self.count[0] + self.count[1], self.resident.len());
        debug_assert_eq!(self.lru.len(), self.resident.len());
    }

    /// Makes room for one page of `class`; false if no page may be evicted.
    fn reserve_slot<D: StorageDriver>(
        &mut self,
        io: &mut FileIo<D>,
        class: PageClass,
    ) -> Result<bool, PageBufferError> {
        if !self.is_full() {
            return Ok(true);
        }
        self.make_space(io, class)
    }

    /// Evicts the least recently used page that can legally go.
    ///
    /// A page of the requesting class can always go. A page of the other
    /// class can only go while that class stays at or above its reservation.
    fn make_space<D: StorageDriver>(
        &mut self,
        io: &mut FileIo<D>,
        class: PageClass,
    ) -> Result<bool, PageBufferError> {
        let victim = self.lru.iter_from_tail().find(|addr| {
            let victim_class = self.resident[addr].class();
            victim_class == class
                || self.count[victim_class.index()] > self.min_count[victim_class.index()]
        });

        let Some(addr) = victim else {
            warn!(
                %class,
                meta = self.count[0],
                raw = self.count[1],
                "no page can be evicted without breaking a reservation, bypassing"
            );
            return Ok(false);
        };

        // a failed write-back leaves the victim resident and dirty
        if let Some(entry) = self.resident.get_mut(&addr)
            && entry.is_dirty()
        {
            write_back(io, entry)?;
        }

        if let Some(entry) = self.detach(addr) {
            self.stats.class_mut(entry.class()).evictions += 1;
            trace!(class = %entry.class(), page = addr, "page evicted");
        }
        Ok(true)
    }

    /// Builds the entry for a page that is not resident.
    ///
    /// A fresh page keeps the class it was registered with.
    fn load_page<D: StorageDriver>(
        &mut self,
        io: &FileIo<D>,
        class: PageClass,
        page_addr: Address,
        for_write: bool,
    ) -> Result<(PageEntry, Fault), PageBufferError> {
        if let Some(fresh) = self.fresh.get(&page_addr) {
            let entry = PageEntry::try_new(page_addr, fresh.class, self.page_size)?;
            self.fresh.remove(&page_addr);
            trace!(class = %entry.class(), page = page_addr, "fresh page admitted without a read");
            return Ok((entry, Fault::Fresh));
        }

        let mut entry = PageEntry::try_new(page_addr, class, self.page_size)?;

        let eoa = io.eoa(class)?;
        if page_addr > eoa {
            return Err(PageBufferError::OutOfRange {
                addr: page_addr,
                eoa,
            });
        }

        if for_write
            && let Some(eof) = io.eof()?
            && page_addr >= eof
        {
            // nothing on storage yet
            return Ok((entry, Fault::Unwritten));
        }

        let len = clip_to_eoa(page_addr, eoa, self.page_size);
        io.read(class, page_addr, &mut entry.data[..len])?;
        Ok((entry, Fault::Read))
    }

    fn insert(&mut self, entry: PageEntry) {
        let addr = entry.address();
        assert!(
            self.resident.len() < self.capacity_pages(),
            "page buffer over capacity"
        );
        debug_assert!(!self.fresh.contains_key(&addr));

        self.count[entry.class().index()] += 1;
        self.lru.push_front(addr);
        let previous = self.resident.insert(addr, entry);
        assert!(previous.is_none(), "page inserted twice");
    }

    fn detach(&mut self, page_addr: Address) -> Option<PageEntry> {
        let entry = self.resident.remove(&page_addr)?;
        assert!(self.lru.remove(page_addr), "page missing from recency list");
        self.count[entry.class().index()] -= 1;
        Some(entry)
    }

    fn resident_overlaps(&self, addr: Address, len: usize) -> Vec<Overlap> {
        let start = page_align(addr, self.page_size);
        let end = addr.saturating_add(len as u64);
        let page_size = self.page_size as u64;

        self.resident
            .range(start..end)
            .map(|(&page_addr, _)| {
                let page_end = page_addr.saturating_add(page_size);
                let lo = addr.max(page_addr);
                let hi = end.min(page_end);
                Overlap {
                    page_addr,
                    page_range: (lo - page_addr) as usize..(hi - page_addr) as usize,
                    buf_range: (lo - addr) as usize..(hi - addr) as usize,
                    whole_page: lo == page_addr && hi == page_end,
                }
            })
            .collect()
    }

    /// Copies dirty resident bytes over a buffer read from the lower layer.
    fn overlay_dirty(&mut self, addr: Address, buf: &mut [u8]) {
        for overlap in self.resident_overlaps(addr, buf.len()) {
            if let Some(entry) = self.resident.get(&overlap.page_addr)
                && entry.is_dirty()
            {
                buf[overlap.buf_range].copy_from_slice(&entry.data[overlap.page_range]);
                self.lru.touch(overlap.page_addr);
            }
        }
    }

    /// Brings resident pages in line with a write that bypassed them.
    fn reconcile(&mut self, addr: Address, data: &[u8], mark_dirty: bool) {
        for overlap in self.resident_overlaps(addr, data.len()) {
            if overlap.whole_page {
                self.detach(overlap.page_addr);
                trace!(page = overlap.page_addr, "page superseded by a full-page write");
            } else if let Some(entry) = self.resident.get_mut(&overlap.page_addr) {
                entry.data[overlap.page_range].copy_from_slice(&data[overlap.buf_range]);
                if mark_dirty {
                    entry.set_dirty();
                }
                self.lru.touch(overlap.page_addr);
            }
        }
    }

    /// Pages written behind the cache are no longer known to be empty.
    fn forget_fresh(&mut self, addr: Address, len: usize) {
        let start = page_align(addr, self.page_size);
        let end = addr.saturating_add(len as u64);
        let stale: Vec<Address> = self.fresh.range(start..end).map(|(&a, _)| a).collect();
        for page_addr in stale {
            self.fresh.remove(&page_addr);
            trace!(page = page_addr, "fresh page written behind the page buffer");
        }
    }
}

/// Requests running past the end of the address space can never be served.
fn check_range<D: StorageDriver>(
    io: &FileIo<D>,
    class: PageClass,
    addr: Address,
    len: usize,
) -> Result<(), PageBufferError> {
    if addr.checked_add(len as u64).is_none() {
        return Err(PageBufferError::OutOfRange {
            addr,
            eoa: io.eoa(class)?,
        });
    }
    Ok(())
}

/// Number of bytes of the page at `page_addr` that lie below `eoa`.
fn clip_to_eoa(page_addr: Address, eoa: Address, page_size: usize) -> usize {
    usize::try_from(eoa.saturating_sub(page_addr))
        .unwrap_or(usize::MAX)
        .min(page_size)
}

/// Writes a dirty page back, clipped to the end of allocation.
fn write_back<D: StorageDriver>(
    io: &mut FileIo<D>,
    entry: &mut PageEntry,
) -> Result<(), PageBufferError> {
    let eoa = io.eoa(entry.class())?;
    if entry.address() > eoa {
        warn!(
            page = entry.address(),
            eoa, "dropping dirty page beyond the end of allocation"
        );
        entry.clear_dirty();
        return Ok(());
    }

    let len = clip_to_eoa(entry.address(), eoa, entry.data.len());
    io.write_through(entry.class(), entry.address(), &entry.data[..len])?;
    entry.clear_dirty();
    Ok(())
}
