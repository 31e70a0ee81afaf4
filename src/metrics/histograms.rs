//! Bucketed distributions of batch latency and batch size.

use super::Descriptor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Batch latency buckets in seconds.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Batch size buckets in bytes, from a single small row up to a few MiB.
pub const SIZE_BUCKETS: &[f64] = &[
    256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0,
];

/// A histogram with fixed upper bounds and an implicit `+Inf` bucket.
#[derive(Debug)]
pub struct Histogram {
    desc: Descriptor,
    bounds: Box<[f64]>,
    // One slot per bound plus a trailing overflow slot. Slots are not
    // cumulative; snapshots accumulate them.
    slots: Box<[AtomicU64]>,
    sum_bits: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Create a histogram over `bounds`, sorted and deduplicated.
    pub fn new(name: &'static str, help: &'static str, bounds: &[f64]) -> Self {
        let mut bounds = bounds.to_vec();
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        let slots = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();

        Self {
            desc: Descriptor { name, help },
            bounds: bounds.into_boxed_slice(),
            slots,
            sum_bits: AtomicU64::new(0.0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    /// Get the histogram name and help text.
    pub fn descriptor(&self) -> Descriptor {
        self.desc
    }

    /// Record one value.
    pub fn observe(&self, value: f64) {
        let slot = self.bounds.partition_point(|&upper| upper < value);
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
        let _ = self
            .sum_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + value).to_bits())
            });
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duration in seconds.
    pub fn observe_duration(&self, elapsed: Duration) {
        self.observe(elapsed.as_secs_f64());
    }

    /// Copy the current state with cumulative bucket counts.
    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut running = 0;
        let bucket_counts = self
            .slots
            .iter()
            .take(self.bounds.len())
            .map(|slot| {
                running += slot.load(Ordering::Relaxed);
                running
            })
            .collect();

        HistogramSnapshot {
            buckets: self.bounds.to_vec(),
            bucket_counts,
            sum: f64::from_bits(self.sum_bits.load(Ordering::Relaxed)),
            count: self.count.load(Ordering::Relaxed),
        }
    }

    pub(super) fn render(&self, out: &mut String) {
        let snap = self.snapshot();
        self.desc.header(out, "histogram");
        for (upper, count) in snap.buckets.iter().zip(&snap.bucket_counts) {
            self.desc
                .sample(out, &format!("_bucket{{le=\"{}\"}}", upper), count);
        }
        self.desc.sample(out, "_bucket{le=\"+Inf\"}", snap.count);
        self.desc.sample(out, "_sum", snap.sum);
        self.desc.sample(out, "_count", snap.count);
    }
}

/// Point-in-time copy of a histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<f64>,
    /// Observations `<=` each bucket boundary.
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramSnapshot {
    /// Mean of all observations, zero when empty.
    pub fn mean(&self) -> f64 {
        match self.count {
            0 => 0.0,
            n => self.sum / n as f64,
        }
    }

    /// Estimated value at percentile `p` (0 to 100).
    ///
    /// Observations are assumed to be spread evenly inside their bucket.
    /// Anything past the last boundary reports that boundary.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let rank = (self.count as f64 * p / 100.0).ceil().max(1.0) as u64;
        let Some(i) = self.bucket_counts.iter().position(|&c| c >= rank) else {
            return self.buckets.last().copied().unwrap_or(0.0);
        };

        let (lower, below) = match i {
            0 => (0.0, 0),
            _ => (self.buckets[i - 1], self.bucket_counts[i - 1]),
        };
        let within = (self.bucket_counts[i] - below) as f64;
        lower + (self.buckets[i] - lower) * (rank - below) as f64 / within
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_are_cumulative() {
        let latency = Histogram::new("batch_latency_seconds", "Batch latency", LATENCY_BUCKETS);
        latency.observe_duration(Duration::from_millis(3));
        latency.observe_duration(Duration::from_millis(30));
        latency.observe_duration(Duration::from_secs(20));

        let snap = latency.snapshot();
        assert_eq!(snap.count, 3);
        assert!((snap.sum - 20.033).abs() < 1e-9);
        assert_eq!(&snap.bucket_counts[..5], &[0, 1, 1, 1, 2]);
        // The 20s batch only shows up in the +Inf bucket.
        assert_eq!(*snap.bucket_counts.last().unwrap(), 2);
    }

    #[test]
    fn test_batch_size_percentile() {
        let sizes = Histogram::new("batch_bytes", "Batch size", SIZE_BUCKETS);
        for _ in 0..100 {
            sizes.observe(1000.0);
        }
        let snap = sizes.snapshot();
        assert_eq!(snap.percentile(50.0), 640.0);
        assert_eq!(snap.percentile(100.0), 1024.0);
        assert_eq!(snap.mean(), 1000.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let sizes = Histogram::new("batch_bytes", "Batch size", &[10.0, 1.0, 10.0]);
        let snap = sizes.snapshot();
        assert_eq!(snap.buckets, vec![1.0, 10.0]);
        assert_eq!(snap.percentile(99.0), 0.0);
        assert_eq!(snap.mean(), 0.0);
    }
}
