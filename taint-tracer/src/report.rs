//! Summary of the taint state at the end of a replay

use anyhow::Context;
use serde::Serialize;
use std::fmt;
use taint_core::{Interval, TracingSession};

use crate::Result;

/// Final taint state of a replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaintReport {
    /// Registers with at least one tainted byte, sorted by name
    pub tainted_registers: Vec<RegisterTaint>,
    /// Tainted memory, merged and ascending
    pub tainted_memory: Vec<Interval>,
    /// Instructions fed to the engine while tracing was active
    pub instructions_replayed: usize,
    /// Instructions among those with a modelled taint effect
    pub instructions_propagated: usize,
    /// Address of the stop trigger, if it was reached
    pub stopped_at: Option<u64>,
}

/// Taint of one register
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterTaint {
    pub name: String,
    /// Hex-encoded per-byte bitmap, bit `i` is byte `i` of the register
    pub bitmap: String,
}

impl TaintReport {
    /// Capture the current state of `session`
    pub fn from_session(session: &TracingSession) -> Self {
        let registers = session.registers();
        let tainted_registers = registers
            .tainted_registers()
            .into_iter()
            .filter_map(|name| {
                let bitmap = registers.to_bitmap(name).ok()?;
                Some(RegisterTaint {
                    name: name.to_string(),
                    bitmap: hex::encode(bitmap.as_bytes()),
                })
            })
            .collect();

        Self {
            tainted_registers,
            tainted_memory: session.memory().export_ranges(),
            instructions_replayed: 0,
            instructions_propagated: 0,
            stopped_at: None,
        }
    }

    pub fn is_register_tainted(&self, name: &str) -> bool {
        self.tainted_registers.iter().any(|reg| reg.name == name)
    }

    /// Total number of tainted memory bytes
    pub fn tainted_memory_bytes(&self) -> u64 {
        self.tainted_memory.iter().map(Interval::size).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize taint report")
    }
}

impl fmt::Display for TaintReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.tainted_registers.iter().map(|reg| reg.name.as_str()).collect();
        writeln!(f, " tainted registers: {:?}", names)?;
        let ranges: Vec<String> = self
            .tainted_memory
            .iter()
            .map(|range| format!("[{:#x}, {:#x})", range.start(), range.end()))
            .collect();
        write!(f, " tainted memory   : [{}]", ranges.join(", "))
    }
}
