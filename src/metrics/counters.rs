//! Monotonic totals such as rows written or pages fetched.

use super::Descriptor;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing total.
#[derive(Debug)]
pub struct Counter {
    desc: Descriptor,
    total: AtomicU64,
}

impl Counter {
    /// Create a counter at zero.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Descriptor { name, help },
            total: AtomicU64::new(0),
        }
    }

    /// Get the counter name and help text.
    pub fn descriptor(&self) -> Descriptor {
        self.desc
    }

    /// Add one.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Add a row or byte count as reported by the read and write paths.
    pub fn add(&self, amount: usize) {
        self.total.fetch_add(amount as u64, Ordering::Relaxed);
    }

    /// Get the current total.
    pub fn get(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub(super) fn render(&self, out: &mut String) {
        self.desc.header(out, "counter");
        self.desc.sample(out, "", self.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_rows_and_bytes() {
        let pages = Counter::new("pages_fetched_total", "Result pages fetched");
        assert_eq!(pages.get(), 0);

        pages.inc();
        pages.add(41);
        assert_eq!(pages.get(), 42);
        assert_eq!(pages.descriptor().name, "pages_fetched_total");
    }

    #[test]
    fn test_render() {
        let rows = Counter::new("rows_read_total", "Rows read");
        rows.add(7);

        let mut out = String::new();
        rows.render(&mut out);
        assert_eq!(
            out,
            "# HELP rows_read_total Rows read\n# TYPE rows_read_total counter\nrows_read_total 7\n"
        );
    }
}
