//! Half-open address intervals and the interval set backing memory taint
//!
//! [`AddressIntervalSet`] is an augmented binary search tree keyed by interval
//! start, where every node records the largest end point found in its subtree.
//! Stored intervals are not coalesced: overlapping or touching intervals may
//! coexist, and only [`AddressIntervalSet::to_sorted_merged`] consolidates them.
//!
//! The tree is not rebalanced. Insertion is O(log n) on average and O(n) when
//! the insertion order degenerates the tree (e.g. strictly increasing starts).
//! All traversals are iterative, so a degenerate tree costs time but never
//! stack depth.

use serde::Serialize;
use std::fmt;

use crate::{Result, TaintError};

/// Half-open address range `[start, end)`, never empty
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Interval {
    start: u64,
    end: u64,
}

impl Interval {
    /// Create the interval `[start, end)`
    ///
    /// # Panics
    /// If `start >= end`.
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start < end, "empty interval [{:#x}, {:#x})", start, end);
        Self { start, end }
    }

    /// Interval covering `size` bytes from `address`
    ///
    /// Returns `Ok(None)` for `size == 0` and an error if the range does not
    /// fit below `u64::MAX`.
    pub fn with_size(address: u64, size: u64) -> Result<Option<Self>> {
        if size == 0 {
            return Ok(None);
        }
        let end = address
            .checked_add(size)
            .ok_or(TaintError::AddressOverflow { address, size })?;
        Ok(Some(Self { start: address, end }))
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes covered
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, point: u64) -> bool {
        self.start <= point && point < self.end
    }

    /// True if the two intervals share at least one address
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True if one interval ends exactly where the other starts
    pub fn is_adjacent(&self, other: &Interval) -> bool {
        self.end == other.start || other.end == self.start
    }

    /// The common sub-range of both intervals, if any
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Interval {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }
}

impl fmt::Debug for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

impl From<Interval> for (u64, u64) {
    fn from(interval: Interval) -> Self {
        (interval.start, interval.end)
    }
}

#[derive(Debug, Clone)]
struct Node {
    interval: Interval,
    /// Largest `end` in the subtree rooted here
    max_end: u64,
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
}

/// Collection of possibly overlapping address intervals
///
/// Nodes live in an arena; links are indices into it. Left children hold
/// strictly smaller starts, right children equal or larger ones.
#[derive(Debug, Clone, Default)]
pub struct AddressIntervalSet {
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: Option<usize>,
    len: usize,
}

impl AddressIntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored intervals (not merged)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
    }

    /// Insert an interval without merging or deduplication
    pub fn add(&mut self, interval: Interval) {
        let new = self.alloc(interval);
        let Some(mut current) = self.root else {
            self.root = Some(new);
            return;
        };

        loop {
            let node = &mut self.nodes[current];
            if node.max_end < interval.end {
                node.max_end = interval.end;
            }
            let next = if interval.start < node.interval.start {
                &mut node.left
            } else {
                &mut node.right
            };
            match *next {
                Some(child) => current = child,
                None => {
                    *next = Some(new);
                    self.nodes[new].parent = Some(current);
                    return;
                }
            }
        }
    }

    /// Remove every stored interval whose bounds equal `interval` exactly
    ///
    /// Stored intervals that merely overlap or contain `interval` are left
    /// untouched. Returns whether anything was removed.
    pub fn remove(&mut self, interval: &Interval) -> bool {
        let mut removed = false;
        while self.remove_one(interval) {
            removed = true;
        }
        removed
    }

    /// Remove the addresses of `query` from the covered set
    ///
    /// Unlike [`remove`](Self::remove), stored intervals overlapping the query
    /// are trimmed or split so that no address inside `query` stays covered.
    pub fn subtract(&mut self, query: &Interval) {
        let overlapping: Vec<Interval> = self.overlapping(query).collect();
        for stored in overlapping {
            self.remove_one(&stored);
            if stored.start < query.start {
                self.add(Interval::new(stored.start, query.start));
            }
            if query.end < stored.end {
                self.add(Interval::new(query.end, stored.end));
            }
        }
    }

    /// True if some stored interval contains `point`
    pub fn contains(&self, point: u64) -> bool {
        // no interval can reach u64::MAX, ends are exclusive
        point != u64::MAX && self.intersects(&Interval::new(point, point + 1))
    }

    /// True if some stored interval overlaps `query`
    pub fn intersects(&self, query: &Interval) -> bool {
        self.overlapping(query).next().is_some()
    }

    /// Every stored interval clipped to `query`
    ///
    /// Results come in tree pre-order and may overlap each other; sort them if
    /// order matters.
    pub fn intersection(&self, query: &Interval) -> Vec<Interval> {
        self.overlapping(query)
            .filter_map(|stored| stored.intersect(query))
            .collect()
    }

    /// Ascending, non-overlapping, maximally merged view of the covered set
    pub fn to_sorted_merged(&self) -> Vec<Interval> {
        let mut merged: Vec<Interval> = Vec::new();
        for interval in self.iter() {
            match merged.last_mut() {
                Some(last) if last.end >= interval.start => {
                    last.end = last.end.max(interval.end);
                }
                _ => merged.push(interval),
            }
        }
        merged
    }

    /// Stored intervals in ascending start order
    pub fn iter(&self) -> Iter<'_> {
        let mut iter = Iter {
            set: self,
            stack: Vec::new(),
        };
        iter.push_left_spine(self.root);
        iter
    }

    /// Height of the backing tree, 0 when empty
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut stack: Vec<(usize, usize)> = self.root.map(|r| (r, 1)).into_iter().collect();
        while let Some((idx, depth)) = stack.pop() {
            height = height.max(depth);
            let node = &self.nodes[idx];
            stack.extend(node.left.map(|c| (c, depth + 1)));
            stack.extend(node.right.map(|c| (c, depth + 1)));
        }
        height
    }

    /// Stored intervals overlapping `query`, unclipped, in tree pre-order
    pub fn overlapping(&self, query: &Interval) -> Overlapping<'_> {
        Overlapping {
            set: self,
            query: *query,
            stack: self.root.into_iter().collect(),
        }
    }

    fn alloc(&mut self, interval: Interval) -> usize {
        let node = Node {
            interval,
            max_end: interval.end,
            parent: None,
            left: None,
            right: None,
        };
        self.len += 1;
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn find_exact(&self, interval: &Interval) -> Option<usize> {
        let mut current = self.root;
        while let Some(idx) = current {
            let node = &self.nodes[idx];
            if interval.start < node.interval.start {
                current = node.left;
            } else if node.interval == *interval {
                return Some(idx);
            } else {
                current = node.right;
            }
        }
        None
    }

    fn remove_one(&mut self, interval: &Interval) -> bool {
        let Some(target) = self.find_exact(interval) else {
            return false;
        };

        // with two children, move the in-order successor's interval up and
        // unlink the successor instead
        let unlinked = match (self.nodes[target].left, self.nodes[target].right) {
            (Some(_), Some(right)) => {
                let mut successor = right;
                while let Some(left) = self.nodes[successor].left {
                    successor = left;
                }
                self.nodes[target].interval = self.nodes[successor].interval;
                successor
            }
            _ => target,
        };

        let node = &self.nodes[unlinked];
        let child = node.left.or(node.right);
        let parent = node.parent;
        if let Some(child) = child {
            self.nodes[child].parent = parent;
        }
        match parent {
            Some(p) => {
                if self.nodes[p].left == Some(unlinked) {
                    self.nodes[p].left = child;
                } else {
                    self.nodes[p].right = child;
                }
            }
            None => self.root = child,
        }

        self.free.push(unlinked);
        self.len -= 1;
        self.refresh_max_upward(parent);
        true
    }

    /// Recompute `max_end` from `start` up to the root
    fn refresh_max_upward(&mut self, start: Option<usize>) {
        let mut current = start;
        while let Some(idx) = current {
            let node = &self.nodes[idx];
            let mut max_end = node.interval.end;
            for child in [node.left, node.right].into_iter().flatten() {
                max_end = max_end.max(self.nodes[child].max_end);
            }
            self.nodes[idx].max_end = max_end;
            current = self.nodes[idx].parent;
        }
    }
}

/// In-order iterator over the stored intervals
pub struct Iter<'a> {
    set: &'a AddressIntervalSet,
    stack: Vec<usize>,
}

impl Iter<'_> {
    fn push_left_spine(&mut self, mut current: Option<usize>) {
        while let Some(idx) = current {
            self.stack.push(idx);
            current = self.set.nodes[idx].left;
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        let set = self.set;
        let idx = self.stack.pop()?;
        let node = &set.nodes[idx];
        self.push_left_spine(node.right);
        Some(node.interval)
    }
}

/// Pre-order walk over stored intervals overlapping a query, pruned by `max_end`
pub struct Overlapping<'a> {
    set: &'a AddressIntervalSet,
    query: Interval,
    stack: Vec<usize>,
}

impl Iterator for Overlapping<'_> {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        let set = self.set;
        while let Some(idx) = self.stack.pop() {
            let node = &set.nodes[idx];
            // nothing below ends after the query starts
            if node.max_end <= self.query.start {
                continue;
            }
            // right subtree starts at or after this node
            if node.interval.start < self.query.end {
                self.stack.extend(node.right);
            }
            self.stack.extend(node.left);
            if node.interval.overlaps(&self.query) {
                return Some(node.interval);
            }
        }
        None
    }
}
