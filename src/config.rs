/// Default page buffer capacity in bytes (256 pages of 4 KiB).
pub const DEFAULT_PAGE_BUFFER_SIZE: usize = 1024 * 1024;
/// Default accumulator capacity in bytes.
pub const DEFAULT_ACCUMULATOR_SIZE: usize = 1024 * 1024;

/// Settings used when paging is enabled for a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageBufferConfig {
    /// Capacity in bytes, rounded down to a page multiple at creation.
    pub size: usize,
    /// Percentage of the capacity reserved for metadata pages.
    pub min_meta_perc: u32,
    /// Percentage of the capacity reserved for raw data pages.
    pub min_raw_perc: u32,
}

impl Default for PageBufferConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_PAGE_BUFFER_SIZE,
            min_meta_perc: 0,
            min_raw_perc: 0,
        }
    }
}

impl PageBufferConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    pub fn with_min_meta_perc(mut self, perc: u32) -> Self {
        self.min_meta_perc = perc;
        self
    }

    pub fn with_min_raw_perc(mut self, perc: u32) -> Self {
        self.min_raw_perc = perc;
        self
    }
}

/// Settings of the metadata accumulator on the bypass path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccumulatorConfig {
    // 0 disables accumulation
    pub max_size: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_ACCUMULATOR_SIZE,
        }
    }
}

impl AccumulatorConfig {
    pub fn disabled() -> Self {
        Self { max_size: 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_size > 0
    }
}
