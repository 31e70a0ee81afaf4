//! Split planning.
//!
//! Turns the topology's token ranges into splits of roughly
//! `split_size_bytes` of data each. Ranges are walked in ring order and
//! accumulated greedily. A topology range is never subdivided here: a split
//! closes at the end of the range that reaches the target, and a range
//! heavier than the target becomes a split of its own. With locality enabled
//! the walk happens separately per replica set, so a split never mixes
//! ranges owned by different replicas.
//!
//! Without a usable size estimate the planner produces exactly
//! `1 + 2 * parallelism` splits of equal ring share instead, cutting ranges
//! when the topology exposes fewer ranges than that.

use crate::error::{Error, Result};
use crate::token::{Partitioner, TokenRange};
use crate::types::Endpoint;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

const EPSILON: f64 = 1e-9;

/// A unit of parallel work: contiguous token ranges read by one task.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub index: usize,
    pub ranges: Vec<TokenRange>,
    /// Replicas owning every range, or the union when locality is off.
    pub endpoints: BTreeSet<Endpoint>,
    pub estimated_bytes: u64,
    pub ring_fraction: f64,
}

/// Plans splits for one table.
#[derive(Debug, Clone)]
pub struct SplitPlanner {
    partitioner: Partitioner,
    split_size_bytes: u64,
    parallelism: usize,
    locality_aware: bool,
}

/// A range with its estimated weight.
#[derive(Debug, Clone)]
struct Weighted {
    range: TokenRange,
    fraction: f64,
    bytes: f64,
}

impl SplitPlanner {
    /// Create a planner aiming at `split_size_bytes` per split.
    ///
    /// Locality is on by default. Zero sizes and parallelism are raised to one.
    pub fn new(partitioner: Partitioner, split_size_bytes: u64, parallelism: usize) -> Self {
        Self {
            partitioner,
            split_size_bytes: split_size_bytes.max(1),
            parallelism: parallelism.max(1),
            locality_aware: true,
        }
    }

    /// Keep ranges of different replica sets in different splits.
    pub fn with_locality_aware(mut self, enabled: bool) -> Self {
        self.locality_aware = enabled;
        self
    }

    /// Split count used when the data size is unknown.
    pub fn minimal_split_count(&self) -> usize {
        1 + 2 * self.parallelism
    }

    /// Plan splits over `ranges` for a table of `data_size_bytes`.
    ///
    /// A data size that is zero, negative or not finite means the estimate
    /// is missing or overflowed; both take the equal-share fallback.
    pub fn plan(&self, ranges: Vec<TokenRange>, data_size_bytes: f64) -> Result<Vec<Split>> {
        if ranges.is_empty() {
            return Err(Error::Topology("no token ranges to plan".to_string()));
        }

        let groups = self.group(ranges);
        let splits = if data_size_bytes.is_finite() && data_size_bytes > 0.0 {
            self.plan_by_size(groups, data_size_bytes)
        } else {
            warn!(
                data_size_bytes,
                splits = self.minimal_split_count(),
                "Table size estimate unavailable, splitting the ring evenly"
            );
            self.plan_evenly(groups)
        };

        debug!(
            splits = splits.len(),
            target_bytes = self.split_size_bytes,
            locality_aware = self.locality_aware,
            "Planned splits"
        );
        Ok(splits)
    }

    /// Ranges in ring order, partitioned by replica set when locality is on.
    fn group(&self, mut ranges: Vec<TokenRange>) -> Vec<Vec<TokenRange>> {
        ranges.sort_by_key(|r| r.start());
        if !self.locality_aware {
            return vec![ranges];
        }

        let mut by_replicas: BTreeMap<BTreeSet<Endpoint>, Vec<TokenRange>> = BTreeMap::new();
        for range in ranges {
            by_replicas
                .entry(range.replicas().clone())
                .or_default()
                .push(range);
        }
        by_replicas.into_values().collect()
    }

    fn plan_by_size(&self, groups: Vec<Vec<TokenRange>>, data_size_bytes: f64) -> Vec<Split> {
        let minimal = self.minimal_split_count() as f64;
        let target = (self.split_size_bytes as f64)
            .min(data_size_bytes / minimal)
            .max(1.0);

        let mut splits = Vec::new();
        for group in groups {
            let mut current: Vec<Weighted> = Vec::new();
            let mut accumulated = 0.0;

            for unit in self.weigh(group, data_size_bytes) {
                accumulated += unit.bytes;
                current.push(unit);
                // A split closes at the end of the range that reaches the target.
                if accumulated >= target * (1.0 - EPSILON) {
                    splits.push(self.seal(splits.len(), std::mem::take(&mut current)));
                    accumulated = 0.0;
                }
            }
            if !current.is_empty() {
                splits.push(self.seal(splits.len(), current));
            }
        }
        splits
    }

    fn weigh(&self, ranges: Vec<TokenRange>, data_size_bytes: f64) -> Vec<Weighted> {
        ranges
            .into_iter()
            .map(|range| {
                let fraction = range.ring_fraction(self.partitioner);
                Weighted {
                    range,
                    fraction,
                    bytes: data_size_bytes * fraction,
                }
            })
            .collect()
    }

    fn plan_evenly(&self, groups: Vec<Vec<TokenRange>>) -> Vec<Split> {
        let n = self.minimal_split_count();
        let single_group = groups.len() == 1;

        let mut splits = Vec::new();
        for group in groups {
            let share: f64 = group
                .iter()
                .map(|r| r.ring_fraction(self.partitioner))
                .sum();

            // Units no larger than 1/n of the ring each.
            let units: Vec<Weighted> = group
                .into_iter()
                .flat_map(|range| {
                    let pieces = (range.ring_fraction(self.partitioner) * n as f64 - EPSILON)
                        .ceil()
                        .max(1.0) as usize;
                    self.weigh(range.split(self.partitioner, pieces), 0.0)
                })
                .collect();

            let wanted = if single_group {
                n
            } else {
                ((share * n as f64 - EPSILON).ceil() as usize).max(1)
            };
            let count = wanted.min(units.len());

            for chunk in distribute(units, count, share) {
                splits.push(self.seal(splits.len(), chunk));
            }
        }
        splits
    }

    fn seal(&self, index: usize, units: Vec<Weighted>) -> Split {
        let mut endpoints = BTreeSet::new();
        let mut bytes = 0.0;
        let mut fraction = 0.0;
        let mut ranges = Vec::with_capacity(units.len());
        for unit in units {
            endpoints.extend(unit.range.replicas().iter().copied());
            bytes += unit.bytes;
            fraction += unit.fraction;
            ranges.push(unit.range);
        }
        Split {
            index,
            ranges,
            endpoints,
            estimated_bytes: bytes.round() as u64,
            ring_fraction: fraction,
        }
    }
}

/// Divide contiguous units into exactly `count` non-empty groups of near
/// equal ring share. Requires `units.len() >= count`.
fn distribute(units: Vec<Weighted>, count: usize, share: f64) -> Vec<Vec<Weighted>> {
    let total = units.len();
    let mut groups = Vec::with_capacity(count);
    let mut current = Vec::new();
    let mut covered = 0.0;

    for (i, unit) in units.into_iter().enumerate() {
        covered += unit.fraction;
        current.push(unit);

        let groups_after = count - groups.len() - 1;
        if groups_after == 0 {
            continue;
        }
        let units_after = total - i - 1;
        let due = covered + EPSILON >= share * (groups.len() + 1) as f64 / count as f64;
        if due || units_after == groups_after {
            groups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::size_estimates::full_ring_estimate;
    use crate::token::Token;
    use test_log::test;

    fn node(n: u8) -> Endpoint {
        format!("10.0.0.{}:9042", n).parse().unwrap()
    }

    /// `count` equal ranges over the Murmur3 ring, owned round-robin by `nodes`.
    fn ring(count: usize, nodes: u8) -> Vec<TokenRange> {
        let p = Partitioner::Murmur3;
        let whole = TokenRange::full_ring(p, []);
        whole
            .split(p, count)
            .into_iter()
            .enumerate()
            .map(|(i, r)| TokenRange::new(r.start(), r.end(), [node((i % nodes as usize) as u8 + 1)]))
            .collect()
    }

    /// Every input range's key space is covered exactly once.
    fn assert_exact_cover(splits: &[Split]) {
        let p = Partitioner::Murmur3;
        let mut pieces: Vec<&TokenRange> = splits.iter().flat_map(|s| s.ranges.iter()).collect();
        pieces.sort_by_key(|r| r.start());

        assert_eq!(pieces[0].start(), p.min_token());
        for pair in pieces.windows(2) {
            assert_eq!(pair[0].end(), pair[1].start(), "gap or overlap at {}", pair[0]);
        }
        assert_eq!(pieces.last().unwrap().end(), p.min_token());

        let coverage: f64 = splits.iter().map(|s| s.ring_fraction).sum();
        assert!((coverage - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_topology_is_an_error() {
        let planner = SplitPlanner::new(Partitioner::Murmur3, 1024, 2);
        assert!(matches!(planner.plan(vec![], 1e6), Err(Error::Topology(_))));
    }

    #[test]
    fn test_size_based_planning() {
        // 16 ranges, 16 MiB of data, 2 MiB splits: 8 splits of two ranges.
        let planner = SplitPlanner::new(Partitioner::Murmur3, 2 << 20, 1)
            .with_locality_aware(false);
        let splits = planner.plan(ring(16, 4), 16.0 * (1 << 20) as f64).unwrap();

        assert_eq!(splits.len(), 8);
        assert!(splits.iter().all(|s| s.ranges.len() == 2));
        assert!(splits
            .iter()
            .all(|s| (s.estimated_bytes as i64 - (2 << 20)).abs() <= 1));
        for (i, s) in splits.iter().enumerate() {
            assert_eq!(s.index, i);
        }
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_boundary_rounds_up_to_range_end() {
        // Ranges of 3 MiB each against a 4 MiB target: each split takes two.
        let planner = SplitPlanner::new(Partitioner::Murmur3, 4 << 20, 1)
            .with_locality_aware(false);
        let splits = planner.plan(ring(4, 1), 12.0 * (1 << 20) as f64).unwrap();

        assert_eq!(splits.len(), 2);
        assert!(splits.iter().all(|s| s.ranges.len() == 2));
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_heavy_range_is_not_subdivided() {
        // 4 ranges of 10 000 bytes against a 1000 byte target.
        let planner = SplitPlanner::new(Partitioner::Murmur3, 1000, 1)
            .with_locality_aware(false);
        let input = ring(4, 1);
        let splits = planner.plan(input.clone(), 40_000.0).unwrap();

        assert_eq!(splits.len(), 4);
        for (split, range) in splits.iter().zip(&input) {
            assert_eq!(split.ranges, vec![range.clone()]);
            assert_eq!(split.estimated_bytes, 10_000);
        }
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_sized_splits_only_hold_topology_ranges() {
        let input = ring(24, 3);
        for (target, locality) in [(500, false), (3000, false), (7000, true), (1 << 30, true)] {
            let planner = SplitPlanner::new(Partitioner::Murmur3, target, 2)
                .with_locality_aware(locality);
            let splits = planner.plan(input.clone(), 48_000.0).unwrap();

            let planned: Vec<&TokenRange> = splits.iter().flat_map(|s| s.ranges.iter()).collect();
            assert_eq!(planned.len(), input.len());
            assert!(planned.iter().all(|r| input.contains(r)), "target {}", target);
            assert_exact_cover(&splits);
        }
    }

    #[test]
    fn test_target_shrinks_to_reach_parallelism() {
        // 64 MiB splits would give one split; parallelism 4 asks for nine.
        let planner = SplitPlanner::new(Partitioner::Murmur3, 64 << 20, 4)
            .with_locality_aware(false);
        let splits = planner.plan(ring(36, 3), 9_000_000.0).unwrap();

        assert!(splits.len() >= planner.minimal_split_count());
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_locality_keeps_replica_sets_apart() {
        let planner = SplitPlanner::new(Partitioner::Murmur3, 3 << 20, 1);
        let splits = planner.plan(ring(12, 3), 12.0 * (1 << 20) as f64).unwrap();

        for split in &splits {
            assert_eq!(split.endpoints.len(), 1, "split {} mixes replicas", split.index);
            assert!(split
                .ranges
                .iter()
                .all(|r| r.replicas() == &split.endpoints));
        }
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_missing_estimates_fall_back_to_minimal_count() {
        let estimates = crate::planning::SizeEstimates::empty(Partitioner::Murmur3);
        let planner = SplitPlanner::new(Partitioner::Murmur3, 1024, 3)
            .with_locality_aware(false);
        let splits = planner.plan(ring(4, 2), estimates.data_size_bytes()).unwrap();

        assert_eq!(splits.len(), 7);
        assert!(splits.iter().all(|s| !s.ranges.is_empty()));
        assert!(splits.iter().all(|s| s.ring_fraction <= 2.0 / 7.0 + 1e-9));
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_overflowed_estimate_falls_back() {
        let planner = SplitPlanner::new(Partitioner::Murmur3, 1024, 2)
            .with_locality_aware(false);
        for size in [f64::INFINITY, f64::NAN, -5.0] {
            let splits = planner.plan(ring(8, 2), size).unwrap();
            assert_eq!(splits.len(), planner.minimal_split_count());
            assert_exact_cover(&splits);
        }
    }

    #[test]
    fn test_fallback_with_locality() {
        let planner = SplitPlanner::new(Partitioner::Murmur3, 1024, 2);
        let splits = planner.plan(ring(6, 3), 0.0).unwrap();

        assert!(splits.len() >= planner.minimal_split_count());
        assert!(splits.iter().all(|s| s.endpoints.len() == 1));
        assert_exact_cover(&splits);
    }

    #[test]
    fn test_single_full_ring_range() {
        let p = Partitioner::Murmur3;
        let estimates = full_ring_estimate(p, 1000, 100);
        let planner = SplitPlanner::new(p, 10_000, 1);
        let whole = TokenRange::full_ring(p, [node(1)]);
        let splits = planner
            .plan(vec![whole.clone()], estimates.data_size_bytes())
            .unwrap();

        // The only topology range is read whole.
        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].ranges, vec![whole]);
        assert_eq!(splits[0].estimated_bytes, 100_000);
        assert!((splits[0].ring_fraction - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrap_around_input_range() {
        let p = Partitioner::Murmur3;
        let ranges = vec![
            TokenRange::new(Token::Long(-100), Token::Long(100), [node(1)]),
            TokenRange::new(Token::Long(100), Token::Long(-100), [node(2)]),
        ];
        let planner = SplitPlanner::new(p, 1024, 1).with_locality_aware(false);
        let splits = planner.plan(ranges, 0.0).unwrap();

        assert_eq!(splits.len(), 3);
        let coverage: f64 = splits.iter().map(|s| s.ring_fraction).sum();
        assert!((coverage - 1.0).abs() < 1e-9);
    }
}
