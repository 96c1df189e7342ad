//! Compact fixed-capacity bit array
//!
//! One bit per tracked byte. Used both as the register file taint map and as
//! the transient bitmap handed from memory taint to register taint.

use std::fmt;

/// Packed array of boolean flags addressed by bit offset
#[derive(Clone, PartialEq, Eq)]
pub struct BitSet {
    bytes: Vec<u8>,
    len: usize,
}

impl BitSet {
    /// Create a bit set with `len` bits, all cleared
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Number of bits tracked
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the bit at `offset`
    ///
    /// # Panics
    /// If `offset >= self.len()`.
    pub fn get(&self, offset: usize) -> bool {
        assert!(offset < self.len, "bit offset {} out of range {}", offset, self.len);
        self.bytes[offset >> 3] & (1 << (offset & 7)) != 0
    }

    /// Set the bit at `offset` to `value`
    ///
    /// # Panics
    /// If `offset >= self.len()`.
    pub fn set(&mut self, offset: usize, value: bool) {
        assert!(offset < self.len, "bit offset {} out of range {}", offset, self.len);
        let mask = 1 << (offset & 7);
        if value {
            self.bytes[offset >> 3] |= mask;
        } else {
            self.bytes[offset >> 3] &= !mask;
        }
    }

    /// Set every bit
    pub fn fill(&mut self) {
        self.bytes.fill(0xff);
        // keep the padding bits of the last byte clear
        let tail = self.len & 7;
        if tail != 0 {
            if let Some(last) = self.bytes.last_mut() {
                *last = (1 << tail) - 1;
            }
        }
    }

    /// Clear every bit
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Number of set bits
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn any(&self) -> bool {
        self.bytes.iter().any(|&b| b != 0)
    }

    /// Packed little-endian bit representation (bit 0 is the lowest bit of byte 0)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitSet[")?;
        for i in 0..self.len {
            write!(f, "{}", if self.get(i) { '1' } else { '0' })?;
        }
        write!(f, "]")
    }
}
