//! Taint tracking for process memory

use crate::bitset::BitSet;
use crate::interval::{AddressIntervalSet, Interval};
use crate::Result;

/// Interval-based taint set over the 64-bit address space
///
/// Zero-sized ranges are ignored by every mutation and never reported as
/// tainted. Ranges reaching past `u64::MAX` are rejected.
#[derive(Debug, Clone, Default)]
pub struct MemoryTaintState {
    intervals: AddressIntervalSet,
}

impl MemoryTaintState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Taint `size` bytes at `address`
    pub fn mark_tainted(&mut self, address: u64, size: u64) -> Result<()> {
        if let Some(range) = Interval::with_size(address, size)? {
            self.intervals.add(range);
        }
        Ok(())
    }

    /// Untaint the stored range `[address, address + size)`
    ///
    /// Only a stored interval with exactly these bounds is removed; untainting
    /// a sub-range of a larger tainted region has no effect. Use
    /// [`clear_range`](Self::clear_range) to untaint arbitrary ranges.
    pub fn mark_untainted(&mut self, address: u64, size: u64) -> Result<()> {
        if let Some(range) = Interval::with_size(address, size)? {
            self.intervals.remove(&range);
        }
        Ok(())
    }

    /// Untaint every byte in `[address, address + size)`, splitting stored
    /// intervals as needed
    pub fn clear_range(&mut self, address: u64, size: u64) -> Result<()> {
        if let Some(range) = Interval::with_size(address, size)? {
            self.intervals.subtract(&range);
        }
        Ok(())
    }

    /// True if any byte of the range is tainted
    pub fn is_tainted(&self, address: u64, size: u64) -> Result<bool> {
        Ok(match Interval::with_size(address, size)? {
            Some(range) => self.intervals.intersects(&range),
            None => false,
        })
    }

    /// True if exactly one stored interval overlaps the range and its bounds
    /// are the range's bounds
    ///
    /// This is stricter than coverage: neither a region assembled from several
    /// stored intervals nor a single larger interval counts.
    pub fn is_fully_tainted(&self, address: u64, size: u64) -> Result<bool> {
        let Some(range) = Interval::with_size(address, size)? else {
            return Ok(false);
        };
        let mut overlapping = self.intervals.overlapping(&range);
        Ok(match (overlapping.next(), overlapping.next()) {
            (Some(only), None) => only == range,
            _ => false,
        })
    }

    /// Consolidated view of all tainted memory, ascending and merged
    pub fn export_ranges(&self) -> Vec<Interval> {
        self.intervals.to_sorted_merged()
    }

    /// Taint every supplied range, without merging
    pub fn import_ranges(&mut self, ranges: impl IntoIterator<Item = Interval>) {
        for range in ranges {
            self.intervals.add(range);
        }
    }

    /// Bitmap of the range, bit `j` set iff byte `address + j` is tainted
    pub fn to_bitmap(&self, address: u64, size: usize) -> Result<BitSet> {
        let mut bitmap = BitSet::new(size);
        if let Some(range) = Interval::with_size(address, size as u64)? {
            for part in self.intervals.intersection(&range) {
                let from = (part.start() - address) as usize;
                let to = (part.end() - address) as usize;
                for j in from..to {
                    bitmap.set(j, true);
                }
            }
        }
        Ok(bitmap)
    }

    /// Number of stored (unmerged) intervals
    pub fn stored_interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }
}
