//! Level gauges.

use super::Descriptor;
use std::sync::atomic::{AtomicI64, Ordering};

/// A level that rises and falls, with a high-water mark.
///
/// The writer raises it when a batch is handed to the session and lowers it
/// on completion, so the high-water mark is the most batches that were ever
/// executing at once. That is the number to compare against the configured
/// parallelism.
#[derive(Debug)]
pub struct Gauge {
    desc: Descriptor,
    level: AtomicI64,
    high_water: AtomicI64,
}

impl Gauge {
    /// Create a gauge at zero.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            desc: Descriptor { name, help },
            level: AtomicI64::new(0),
            high_water: AtomicI64::new(0),
        }
    }

    /// Get the gauge name and help text.
    pub fn descriptor(&self) -> Descriptor {
        self.desc
    }

    /// Raise the level by one, updating the high-water mark.
    pub fn inc(&self) {
        let level = self.level.fetch_add(1, Ordering::AcqRel) + 1;
        self.high_water.fetch_max(level, Ordering::AcqRel);
    }

    /// Lower the level by one.
    pub fn dec(&self) {
        self.level.fetch_sub(1, Ordering::AcqRel);
    }

    /// Get the current level.
    pub fn get(&self) -> i64 {
        self.level.load(Ordering::Acquire)
    }

    /// Get the highest level reached.
    pub fn peak(&self) -> i64 {
        self.high_water.load(Ordering::Acquire)
    }

    pub(super) fn render(&self, out: &mut String) {
        self.desc.header(out, "gauge");
        self.desc.sample(out, "", self.get());
        // The high-water mark goes out as its own series.
        self.desc.sample(out, "_peak", self.peak());
    }
}
