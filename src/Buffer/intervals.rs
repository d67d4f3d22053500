//! Ordered set of disjoint time ranges.
//!
//! The writer keeps one of these per board and publishes it into the
//! region's range table after every change. Adjacent and overlapping ranges
//! are merged, so the set never holds two ranges that touch.

use std::ops::Range;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<Range<u64>>,
    /// Maximum number of ranges kept; the oldest are dropped beyond it.
    limit: usize,
}

impl IntervalSet {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            ranges: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Build from arbitrary ranges (unsorted, overlapping and empty ones allowed).
    pub fn from_ranges<I>(ranges: I, limit: usize) -> Self
    where
        I: IntoIterator<Item = Range<u64>>,
    {
        let mut set = Self::with_limit(limit);
        for range in ranges {
            set.insert(range);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn as_slice(&self) -> &[Range<u64>] {
        &self.ranges
    }

    pub fn iter(&self) -> impl Iterator<Item = &Range<u64>> {
        self.ranges.iter()
    }

    /// Add `range`. Returns whether the set changed.
    pub fn insert(&mut self, range: Range<u64>) -> bool {
        if range.start >= range.end {
            return false;
        }
        // Ranges touching or overlapping `range` are exactly lo..hi.
        let lo = self.ranges.partition_point(|r| r.end < range.start);
        let hi = self.ranges.partition_point(|r| r.start <= range.end);

        if lo < hi {
            let covered = lo + 1 == hi
                && self.ranges[lo].start <= range.start
                && self.ranges[lo].end >= range.end;
            if covered {
                return false;
            }
            let merged = self.ranges[lo].start.min(range.start)..self.ranges[hi - 1].end.max(range.end);
            self.ranges.splice(lo..hi, std::iter::once(merged));
        } else {
            self.ranges.insert(lo, range);
        }

        if self.ranges.len() > self.limit {
            let excess = self.ranges.len() - self.limit;
            self.ranges.drain(..excess);
        }
        true
    }

    /// Whether inserting `range` would push `range` itself straight back out:
    /// the set is full and `range` would become a new, oldest entry.
    pub fn evicts(&self, range: Range<u64>) -> bool {
        if range.start >= range.end || self.ranges.len() < self.limit {
            return false;
        }
        let lo = self.ranges.partition_point(|r| r.end < range.start);
        let hi = self.ranges.partition_point(|r| r.start <= range.end);
        lo == 0 && hi == 0
    }

    /// Whether every index of `range` is in the set.
    pub fn contains(&self, range: Range<u64>) -> bool {
        if range.start >= range.end {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.end < range.end);
        self.ranges
            .get(idx)
            .is_some_and(|r| r.start <= range.start)
    }

    /// Drop everything below `t`. Returns whether the set changed.
    pub fn exclude_before(&mut self, t: u64) -> bool {
        let gone = self.ranges.partition_point(|r| r.end <= t);
        let mut changed = gone > 0;
        self.ranges.drain(..gone);
        if let Some(first) = self.ranges.first_mut() {
            if first.start < t {
                first.start = t;
                changed = true;
            }
        }
        changed
    }

    /// Parts of the set inside `[from, to)`.
    pub fn clipped(&self, from: u64, to: u64) -> Vec<Range<u64>> {
        clip(&self.ranges, from, to)
    }
}

/// Parts of sorted, disjoint `ranges` inside `[from, to)`.
pub fn clip(ranges: &[Range<u64>], from: u64, to: u64) -> Vec<Range<u64>> {
    ranges
        .iter()
        .filter_map(|r| {
            let start = r.start.max(from);
            let end = r.end.min(to);
            (start < end).then_some(start..end)
        })
        .collect()
}

/// Intersection of two sorted, disjoint range lists.
pub fn intersect(a: &[Range<u64>], b: &[Range<u64>]) -> Vec<Range<u64>> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            out.push(start..end);
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}
