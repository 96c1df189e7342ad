//! Taint tracking for the register file
//!
//! One bit per byte of the architecture's register-context blob. Registers are
//! addressed by name through the [`ArchitectureLayout`], so aliases that share
//! bytes also share taint.

use std::sync::Arc;

use crate::arch::{ArchitectureLayout, RegisterSlot};
use crate::bitset::BitSet;
use crate::interval::Interval;
use crate::{Result, TaintError};

/// Extra bits past the end of the context blob
const SAFETY_MARGIN: usize = 32;

/// Byte-granularity taint map over the register file
#[derive(Debug, Clone)]
pub struct RegisterTaintState {
    layout: Arc<ArchitectureLayout>,
    map: BitSet,
}

impl RegisterTaintState {
    pub fn new(layout: Arc<ArchitectureLayout>) -> Self {
        let map = BitSet::new(layout.context_size() + SAFETY_MARGIN);
        Self { layout, map }
    }

    pub fn layout(&self) -> &ArchitectureLayout {
        &self.layout
    }

    fn slot(&self, register: &str) -> Result<RegisterSlot> {
        self.layout.slot(register)
    }

    fn fill_slot(&mut self, slot: RegisterSlot, value: bool) {
        for offset in slot.offset..slot.end() {
            self.map.set(offset, value);
        }
    }

    /// Taint every byte of `register`
    pub fn mark_tainted(&mut self, register: &str) -> Result<()> {
        let slot = self.slot(register)?;
        self.fill_slot(slot, true);
        Ok(())
    }

    /// Clear every byte of `register`
    pub fn mark_untainted(&mut self, register: &str) -> Result<()> {
        let slot = self.slot(register)?;
        self.fill_slot(slot, false);
        Ok(())
    }

    /// True if any byte of `register` is tainted
    pub fn is_tainted(&self, register: &str) -> Result<bool> {
        let slot = self.slot(register)?;
        Ok((slot.offset..slot.end()).any(|offset| self.map.get(offset)))
    }

    /// True if every byte of `register` is tainted
    pub fn is_fully_tainted(&self, register: &str) -> Result<bool> {
        let slot = self.slot(register)?;
        Ok((slot.offset..slot.end()).all(|offset| self.map.get(offset)))
    }

    /// Register-to-register move: copy the taint of `src` onto `dest`
    ///
    /// `min(dest_width, src_width)` bytes are copied from the low end of each
    /// register. Bytes of a wider `dest` past that count keep their taint.
    pub fn copy_range(&mut self, dest: &str, src: &str) -> Result<()> {
        let dest = self.slot(dest)?;
        let src = self.slot(src)?;
        let count = dest.width.min(src.width);
        // snapshot first, the two ranges may overlap
        let bits: Vec<bool> = (0..count).map(|i| self.map.get(src.offset + i)).collect();
        for (i, bit) in bits.into_iter().enumerate() {
            self.map.set(dest.offset + i, bit);
        }
        Ok(())
    }

    /// Tainted bytes of `register` as absolute intervals starting at `base`
    ///
    /// Byte `i` of the register maps to address `base + i`; runs of adjacent
    /// tainted bytes come out as one interval.
    pub fn to_intervals(&self, register: &str, base: u64) -> Result<Vec<Interval>> {
        let slot = self.slot(register)?;
        let width = slot.width as u64;
        base.checked_add(width)
            .ok_or(TaintError::AddressOverflow { address: base, size: width })?;

        let mut intervals = Vec::new();
        let mut run_start: Option<u64> = None;
        for i in 0..slot.width {
            let addr = base + i as u64;
            match (self.map.get(slot.offset + i), run_start) {
                (true, None) => run_start = Some(addr),
                (false, Some(start)) => {
                    intervals.push(Interval::new(start, addr));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            intervals.push(Interval::new(start, base + width));
        }
        Ok(intervals)
    }

    /// Overwrite the taint of `register` from `bitmap`
    ///
    /// Bit `i` of the bitmap becomes the taint of byte `i` of the register.
    /// The bitmap must cover at least the register's width.
    pub fn load_from_bitmap(&mut self, register: &str, bitmap: &BitSet) -> Result<()> {
        let slot = self.slot(register)?;
        if bitmap.len() < slot.width {
            return Err(TaintError::BitmapTooShort {
                register: register.to_string(),
                needed: slot.width,
                available: bitmap.len(),
            });
        }
        for i in 0..slot.width {
            self.map.set(slot.offset + i, bitmap.get(i));
        }
        Ok(())
    }

    /// Compact bitmap of `register`, bit `i` is the taint of byte `i`
    pub fn to_bitmap(&self, register: &str) -> Result<BitSet> {
        let slot = self.slot(register)?;
        let mut bitmap = BitSet::new(slot.width);
        for i in 0..slot.width {
            bitmap.set(i, self.map.get(slot.offset + i));
        }
        Ok(bitmap)
    }

    /// Names of all registers with at least one tainted byte, sorted
    ///
    /// Aliases are reported individually, so tainting `rax` lists `rax`,
    /// `eax`, `ax`, `al` and `ah`.
    pub fn tainted_registers(&self) -> Vec<&str> {
        self.layout
            .registers()
            .filter(|(_, slot)| (slot.offset..slot.end()).any(|offset| self.map.get(offset)))
            .map(|(name, _)| name)
            .collect()
    }

    /// Total number of tainted bytes in the context blob
    pub fn tainted_byte_count(&self) -> usize {
        self.map.count_ones()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
