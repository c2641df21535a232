use crate::pages::PageClass;

use std::fmt;

/// Counters for one page class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassStats {
    /// Requests that reached the page buffer, bypasses included.
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub bypasses: u64,
}

impl ClassStats {
    /// Hits over cached (non-bypassed) accesses, as a percentage.
    pub fn hit_rate(&self) -> Option<f64> {
        let cached = self.accesses.saturating_sub(self.bypasses);
        (cached > 0).then(|| self.hits as f64 / cached as f64 * 100.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageBufferStats {
    pub metadata: ClassStats,
    pub raw: ClassStats,
}

impl PageBufferStats {
    pub fn class(&self, class: PageClass) -> &ClassStats {
        match class {
            PageClass::Metadata => &self.metadata,
            PageClass::RawData => &self.raw,
        }
    }

    pub(crate) fn class_mut(&mut self, class: PageClass) -> &mut ClassStats {
        match class {
            PageClass::Metadata => &mut self.metadata,
            PageClass::RawData => &mut self.raw,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for PageBufferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PAGE BUFFER STATISTICS:")?;
        for (title, class) in [("METADATA", PageClass::Metadata), ("RAWDATA", PageClass::RawData)] {
            let stats = self.class(class);
            writeln!(f, "******* {title}")?;
            writeln!(f, "\t Total Accesses: {}", stats.accesses)?;
            writeln!(f, "\t Hits: {}", stats.hits)?;
            writeln!(f, "\t Misses: {}", stats.misses)?;
            writeln!(f, "\t Evictions: {}", stats.evictions)?;
            writeln!(f, "\t Bypasses: {}", stats.bypasses)?;
            match stats.hit_rate() {
                Some(rate) => writeln!(f, "\t Hit Rate = {rate:.2}%")?,
                None => writeln!(f, "\t Hit Rate = n/a")?,
            }
            writeln!(f, "*****************")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_rate_ignores_bypasses() {
        let stats = ClassStats {
            accesses: 10,
            hits: 6,
            misses: 2,
            evictions: 0,
            bypasses: 2,
        };
        assert_eq!(stats.hit_rate(), Some(75.0));
        assert_eq!(ClassStats::default().hit_rate(), None);
    }

    #[test]
    fn report_lists_both_classes() {
        let mut stats = PageBufferStats::default();
        stats.class_mut(PageClass::RawData).hits = 3;
        stats.class_mut(PageClass::RawData).accesses = 4;
        let report = stats.to_string();

        assert!(report.starts_with("PAGE BUFFER STATISTICS:"));
        assert!(report.contains("******* METADATA"));
        assert!(report.contains("******* RAWDATA"));
        assert!(report.contains("Hit Rate = 75.00%"));
        assert!(report.contains("Hit Rate = n/a"));

        stats.reset();
        assert_eq!(stats, PageBufferStats::default());
    }
}
