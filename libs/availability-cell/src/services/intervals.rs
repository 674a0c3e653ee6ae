// libs/availability-cell/src/services/intervals.rs
//
// Half-open interval arithmetic shared by wall-clock windows and instant ranges.

use std::cmp::{max, min};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// `[start, end)`. Constructed only through [`Interval::new`] when it must be non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval<T> {
    pub start: T,
    pub end: T,
}

pub type TimeRange = Interval<DateTime<Utc>>;

impl<T: Ord + Copy> Interval<T> {
    pub fn new(start: T, end: T) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn intersection(&self, other: &Self) -> Option<Self> {
        Self::new(max(self.start, other.start), min(self.end, other.end))
    }
}

impl Interval<DateTime<Utc>> {
    /// `None` when `minutes` is not positive or the end falls outside chrono's range.
    pub fn starting_at(start: DateTime<Utc>, minutes: i64) -> Option<Self> {
        let end = start.checked_add_signed(Duration::try_minutes(minutes)?)?;
        Self::new(start, end)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Sorts and merges overlapping or touching intervals.
pub fn union<T: Ord + Copy>(mut ranges: Vec<Interval<T>>) -> Vec<Interval<T>> {
    ranges.retain(|r| r.start < r.end);
    ranges.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));

    let mut merged: Vec<Interval<T>> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end => last.end = max(last.end, range.end),
            _ => merged.push(range),
        }
    }
    merged
}

/// `base` minus every interval in `cuts`. Output is sorted and disjoint.
pub fn subtract<T: Ord + Copy>(base: Vec<Interval<T>>, cuts: Vec<Interval<T>>) -> Vec<Interval<T>> {
    let cuts = union(cuts);
    let mut result = Vec::new();

    for range in union(base) {
        let mut cursor = range.start;
        for cut in cuts.iter().filter(|c| c.overlaps(&range)) {
            if cut.start > cursor {
                result.push(Interval { start: cursor, end: cut.start });
            }
            cursor = max(cursor, cut.end);
            if cursor >= range.end {
                break;
            }
        }
        if cursor < range.end {
            result.push(Interval { start: cursor, end: range.end });
        }
    }
    result
}

/// Clips every interval to `envelope`, dropping what falls outside.
pub fn clip<T: Ord + Copy>(ranges: Vec<Interval<T>>, envelope: &Interval<T>) -> Vec<Interval<T>> {
    union(ranges)
        .iter()
        .filter_map(|r| r.intersection(envelope))
        .collect()
}
