//! UID range to fwmark association
//!
//! The controller records which UID ranges are steered into which table
//! before installing the matching `MARK` rule. Ranges never overlap, so a
//! UID resolves to at most one mark.

use std::collections::BTreeMap;

/// Bookkeeping for UID ranges and the marks they are assigned
pub trait UidMarkMap: Send {
    /// Associate `start..=end` with `mark`
    ///
    /// Returns `false` if the range is inverted or overlaps an existing range.
    fn add(&mut self, start: u32, end: u32, mark: u32) -> bool;

    /// Drop the association of exactly `start..=end` with `mark`
    ///
    /// Returns `false` if no such association exists.
    fn remove(&mut self, start: u32, end: u32, mark: u32) -> bool;

    /// Mark assigned to the range containing `uid`
    fn mark_for_uid(&self, uid: u32) -> Option<u32>;
}

/// Ordered, non-overlapping UID ranges
#[derive(Debug, Clone, Default)]
pub struct UidRangeMarkMap {
    /// start -> (end, mark)
    ranges: BTreeMap<u32, (u32, u32)>,
}

impl UidRangeMarkMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// `(start, end, mark)` triples in UID order
    pub fn entries(&self) -> Vec<(u32, u32, u32)> {
        self.ranges
            .iter()
            .map(|(&start, &(end, mark))| (start, end, mark))
            .collect()
    }

    /// Range with the greatest start not above `uid`
    fn floor(&self, uid: u32) -> Option<(u32, u32, u32)> {
        self.ranges
            .range(..=uid)
            .next_back()
            .map(|(&start, &(end, mark))| (start, end, mark))
    }
}

impl UidMarkMap for UidRangeMarkMap {
    fn add(&mut self, start: u32, end: u32, mark: u32) -> bool {
        if start > end {
            return false;
        }
        // Ranges are disjoint, so only the last one starting at or before
        // `end` can reach into `start..=end`.
        if let Some((_, existing_end, _)) = self.floor(end) {
            if existing_end >= start {
                return false;
            }
        }
        self.ranges.insert(start, (end, mark));
        true
    }

    fn remove(&mut self, start: u32, end: u32, mark: u32) -> bool {
        if self.ranges.get(&start) == Some(&(end, mark)) {
            self.ranges.remove(&start);
            true
        } else {
            false
        }
    }

    fn mark_for_uid(&self, uid: u32) -> Option<u32> {
        self.floor(uid)
            .filter(|&(_, end, _)| end >= uid)
            .map(|(_, _, mark)| mark)
    }
}
