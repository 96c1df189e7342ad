//! Decoded instructions as delivered by the instrumentation layer
//!
//! These types are consumed, not produced, by the core. They use serde so that
//! recorded traces can be stored and replayed.

use serde::{Deserialize, Serialize};

/// One executed instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstruction {
    /// Program counter of the instruction
    pub address: u64,
    /// Mnemonic as printed by the disassembler, e.g. `mov`, `pushq`
    pub mnemonic: String,
    /// Operands in disassembler order, destination first
    #[serde(default)]
    pub operands: Vec<Operand>,
}

impl DecodedInstruction {
    pub fn new(address: u64, mnemonic: impl Into<String>, operands: Vec<Operand>) -> Self {
        Self {
            address,
            mnemonic: mnemonic.into(),
            operands,
        }
    }
}

/// Instruction operand with its access size in bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub size: usize,
}

impl Operand {
    pub fn register(name: impl Into<String>, size: usize) -> Self {
        Self {
            kind: OperandKind::Register(name.into()),
            size,
        }
    }

    pub fn memory(memory: MemoryOperand, size: usize) -> Self {
        Self {
            kind: OperandKind::Memory(memory),
            size,
        }
    }

    pub fn immediate(value: i64, size: usize) -> Self {
        Self {
            kind: OperandKind::Immediate(value),
            size,
        }
    }

    /// Register name if this is a register operand
    pub fn as_register(&self) -> Option<&str> {
        match &self.kind {
            OperandKind::Register(name) => Some(name),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperandKind {
    Register(String),
    Memory(MemoryOperand),
    Immediate(i64),
}

/// `[base + index * scale + displacement]`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryOperand {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
    #[serde(default = "default_scale")]
    pub scale: u8,
    #[serde(default)]
    pub displacement: i64,
}

fn default_scale() -> u8 {
    1
}

impl MemoryOperand {
    /// `[base]`
    pub fn base(register: impl Into<String>) -> Self {
        Self {
            base: Some(register.into()),
            index: None,
            scale: 1,
            displacement: 0,
        }
    }

    pub fn with_displacement(mut self, displacement: i64) -> Self {
        self.displacement = displacement;
        self
    }

    pub fn with_index(mut self, register: impl Into<String>, scale: u8) -> Self {
        self.index = Some(register.into());
        self.scale = scale;
        self
    }
}
