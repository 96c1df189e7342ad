//! Taint Core - Byte-granularity taint propagation for machine-code traces
//!
//! This crate tracks which bytes of the CPU register file and of process
//! memory hold data derived from an externally marked source, and keeps that
//! marking up to date as data moves through executed instructions.
//!
//! # Overview
//!
//! * [`RegisterTaintState`] keeps one bit per byte of the register context,
//!   addressed by register name through an [`ArchitectureLayout`]
//! * [`MemoryTaintState`] keeps tainted memory as half-open address intervals
//! * [`PropagationEngine`] classifies each instruction into a [`Transfer`] and
//!   applies its transfer function
//! * [`TracingSession`] owns the state of one trace and is the entry point for
//!   seeding and querying taint
//!
//! # Usage
//!
//! ```
//! use std::collections::HashMap;
//! use taint_core::{ArchitectureLayout, DecodedInstruction, MemoryOperand, Operand, TracingSession};
//!
//! let mut session = TracingSession::new(ArchitectureLayout::amd64());
//! session.mark_register_tainted("rdi").unwrap();
//!
//! // mov [rax], rdi
//! let store = DecodedInstruction::new(
//!     0x400596,
//!     "mov",
//!     vec![Operand::memory(MemoryOperand::base("rax"), 8), Operand::register("rdi", 8)],
//! );
//! let context: HashMap<String, u64> = [("rax".to_string(), 0x2000)].into_iter().collect();
//! session.execute(&store, &context).unwrap();
//!
//! assert_eq!(session.export_memory_taint_ranges(), vec![(0x2000, 0x2008)]);
//! ```
//!
//! # Limitations
//!
//! * Only move-class data transfer is modelled; arithmetic and SIMD results
//!   are never tainted.
//! * Untainting memory removes only a stored interval with exactly the given
//!   bounds, see [`MemoryTaintState::mark_untainted`].
//! * A session tracks a single control-flow stream.

pub mod arch;
pub mod bitset;
pub mod engine;
pub mod error;
pub mod instruction;
pub mod interval;
pub mod memory;
pub mod registers;
pub mod session;

pub use arch::{Architecture, ArchitectureLayout, RegisterSlot};
pub use bitset::BitSet;
pub use engine::{EngineConfig, PropagationEngine, PushSlot, RegisterContext, Transfer};
pub use error::TaintError;
pub use instruction::{DecodedInstruction, MemoryOperand, Operand, OperandKind};
pub use interval::{AddressIntervalSet, Interval};
pub use memory::MemoryTaintState;
pub use registers::RegisterTaintState;
pub use session::TracingSession;

/// Result type for taint operations
pub type Result<T> = std::result::Result<T, TaintError>;
