//! Data structures for recorded execution traces

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use taint_core::DecodedInstruction;

use crate::Result;

/// Register values observed at one program point, keyed by register name
pub type RegisterSnapshot = BTreeMap<String, u64>;

/// Complete execution trace of a program run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    /// Instruction traces in execution order
    pub instructions: Vec<InstructionTrace>,
}

/// Trace of a single instruction execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTrace {
    /// Decoded form of the executed instruction
    pub instruction: DecodedInstruction,
    /// Register state before the instruction executes
    #[serde(default)]
    pub registers: RegisterSnapshot,
}

impl InstructionTrace {
    pub fn new(instruction: DecodedInstruction, registers: RegisterSnapshot) -> Self {
        Self {
            instruction,
            registers,
        }
    }

    /// Program counter (instruction address)
    pub fn pc(&self) -> u64 {
        self.instruction.address
    }
}

impl ExecutionTrace {
    /// Create new empty execution trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of instructions executed
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn push(&mut self, instruction: DecodedInstruction, registers: RegisterSnapshot) {
        self.instructions.push(InstructionTrace::new(instruction, registers));
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse execution trace")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read trace file {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize execution trace")
    }
}
