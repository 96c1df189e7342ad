//! Error types for taint tracking

use thiserror::Error;

/// Errors raised by the taint state and the propagation engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaintError {
    /// Register name not present in the architecture layout
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("invalid architecture layout: {0}")]
    InvalidLayout(String),

    /// Address range does not fit in the 64-bit address domain
    #[error("address range {address:#x}+{size:#x} overflows the address space")]
    AddressOverflow { address: u64, size: u64 },

    /// The register context did not provide a value the engine needed
    #[error("no value for register {0} in the register context")]
    MissingRegisterValue(String),

    /// Memory operand index scale other than 1, 2, 4 or 8
    #[error("invalid index scale {0}")]
    InvalidScale(u8),

    #[error("bitmap for {register} holds {available} bytes, {needed} required")]
    BitmapTooShort {
        register: String,
        needed: usize,
        available: usize,
    },
}
