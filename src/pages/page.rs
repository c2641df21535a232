use std::collections::TryReserveError;
use std::fmt;

pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Absolute byte offset in the file.
pub type Address = u64;

/// Caller-supplied tag deciding which reservation a page counts against.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum PageClass {
    Metadata,
    RawData,
}

impl PageClass {
    pub fn index(self) -> usize {
        match self {
            PageClass::Metadata => 0,
            PageClass::RawData => 1,
        }
    }
}

impl fmt::Display for PageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageClass::Metadata => f.write_str("metadata"),
            PageClass::RawData => f.write_str("raw data"),
        }
    }
}

/// Rounds `addr` down to the start of its page.
pub fn page_align(addr: Address, page_size: usize) -> Address {
    let page_size = page_size as u64;
    (addr / page_size) * page_size
}

/// One cached page.
///
/// The byte block is always `page_size` long. Bytes past the end of
/// allocation stay zero and are never written back.
pub struct PageEntry {
    address: Address,
    class: PageClass,
    dirty: bool,
    pub data: Box<[u8]>,
}

impl PageEntry {
    /// Allocates a zero-filled page.
    ///
    /// Returns an error instead of aborting when the allocator refuses.
    pub fn try_new(
        address: Address,
        class: PageClass,
        page_size: usize,
    ) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(page_size)?;
        data.resize(page_size, 0);

        Ok(Self {
            address,
            class,
            dirty: false,
            data: data.into_boxed_slice(),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn class(&self) -> PageClass {
        self.class
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn set_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("address", &self.address)
            .field("class", &self.class)
            .field("dirty", &self.dirty)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A page known to be newly allocated and empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreshPage {
    pub class: PageClass,
}

/// The part of one page touched by a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageChunk {
    /// Page-aligned start of the page.
    pub page_addr: Address,
    /// Offset of the first touched byte inside the page.
    pub page_offset: usize,
    /// Number of touched bytes in this page.
    pub len: usize,
    /// Offset of the first touched byte inside the caller's buffer.
    pub buf_offset: usize,
}

impl PageChunk {
    pub fn page_range(&self) -> std::ops::Range<usize> {
        self.page_offset..self.page_offset + self.len
    }

    pub fn buf_range(&self) -> std::ops::Range<usize> {
        self.buf_offset..self.buf_offset + self.len
    }
}

/// Splits `(addr, size)` into per-page chunks, first page first.
///
/// # Examples
///
/// ```
/// use pagebuf::pages::PageSpan;
///
/// let chunks: Vec<_> = PageSpan::new(4000, 200, 4096).collect();
/// assert_eq!(chunks.len(), 2);
/// assert_eq!(chunks[0].len, 96);
/// assert_eq!(chunks[1].page_addr, 4096);
/// assert_eq!(chunks[1].buf_offset, 96);
/// ```
#[derive(Clone, Debug)]
pub struct PageSpan {
    addr: Address,
    remaining: usize,
    buf_offset: usize,
    page_size: usize,
}

impl PageSpan {
    pub fn new(addr: Address, size: usize, page_size: usize) -> Self {
        assert!(page_size > 0);
        Self {
            addr,
            remaining: size,
            buf_offset: 0,
            page_size,
        }
    }

    pub fn page_count(&self) -> usize {
        if self.remaining == 0 {
            return 0;
        }
        let first = self.addr / self.page_size as u64;
        let last = (self.addr + self.remaining as u64 - 1) / self.page_size as u64;
        (last - first + 1) as usize
    }
}

impl Iterator for PageSpan {
    type Item = PageChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let page_addr = page_align(self.addr, self.page_size);
        let page_offset = (self.addr - page_addr) as usize;
        let len = (self.page_size - page_offset).min(self.remaining);
        let chunk = PageChunk {
            page_addr,
            page_offset,
            len,
            buf_offset: self.buf_offset,
        };

        self.addr += len as u64;
        self.remaining -= len;
        self.buf_offset += len;

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.page_count();
        (n, Some(n))
    }
}

impl ExactSizeIterator for PageSpan {}
