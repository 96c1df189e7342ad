//! Replay configuration: architecture, start/stop triggers and taint seeds

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use taint_core::{Architecture, EngineConfig, TracingSession};

use crate::trace::RegisterSnapshot;
use crate::Result;

/// Configuration for replaying a trace through a tracing session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Register layout of the traced program
    pub architecture: Architecture,
    /// Tracing starts at the first instruction with this address;
    /// from the first instruction when unset
    pub start_address: Option<u64>,
    /// Tracing stops before the first instruction with this address
    pub stop_address: Option<u64>,
    /// Taint sources
    pub seeds: Vec<TaintSeed>,
    pub engine: EngineConfig,
}

impl ReplayConfig {
    /// Create a new replay configuration
    pub fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            ..Default::default()
        }
    }

    pub fn with_start_address(mut self, address: u64) -> Self {
        self.start_address = Some(address);
        self
    }

    pub fn with_stop_address(mut self, address: u64) -> Self {
        self.stop_address = Some(address);
        self
    }

    pub fn with_seed(mut self, seed: TaintSeed) -> Self {
        self.seeds.push(seed);
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse replay configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&json)
    }
}

/// A taint source, applied once
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintSeed {
    /// Apply right before the instruction at this address executes;
    /// when tracing starts if unset
    #[serde(default)]
    pub at: Option<u64>,
    pub target: SeedTarget,
}

/// What a seed marks as tainted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeedTarget {
    /// Every byte of a register
    Register { name: String },
    /// A fixed memory range
    Memory { address: u64, size: u64 },
    /// `size` bytes at the address currently held by `register`,
    /// e.g. the buffer passed in `rdi` on function entry
    PointedMemory { register: String, size: u64 },
}

impl TaintSeed {
    pub fn new(target: SeedTarget) -> Self {
        Self { at: None, target }
    }

    pub fn at(address: u64, target: SeedTarget) -> Self {
        Self {
            at: Some(address),
            target,
        }
    }

    /// Mark the seed's target in `session`
    ///
    /// `registers` supplies the register values at the seeding point.
    pub fn apply(&self, session: &mut TracingSession, registers: &RegisterSnapshot) -> Result<()> {
        match &self.target {
            SeedTarget::Register { name } => {
                tracing::debug!("Seeding register {}", name);
                session.mark_register_tainted(name)?;
            }
            SeedTarget::Memory { address, size } => {
                tracing::debug!("Seeding memory {:#x}+{:#x}", address, size);
                session.mark_memory_tainted(*address, *size)?;
            }
            SeedTarget::PointedMemory { register, size } => {
                let address = *registers
                    .get(register)
                    .ok_or_else(|| anyhow!("No value for seed register {}", register))?;
                tracing::debug!("Seeding memory {:#x}+{:#x} via {}", address, size, register);
                session.mark_memory_tainted(address, *size)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taint_core::{ArchitectureLayout, PushSlot};

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "architecture": "amd64",
            "start_address": 4195843,
            "stop_address": 4195859,
            "seeds": [
                {"at": 4195734, "target": {"kind": "pointed_memory", "register": "rdi", "size": 40}},
                {"target": {"kind": "register", "name": "rsi"}}
            ],
            "engine": {"push_slot": "below_stack_pointer"}
        }"#;

        let config = ReplayConfig::from_json_str(json).unwrap();
        assert_eq!(config.start_address, Some(0x400603));
        assert_eq!(config.stop_address, Some(0x400613));
        assert_eq!(
            config.seeds[0],
            TaintSeed::at(
                0x400596,
                SeedTarget::PointedMemory { register: "rdi".to_string(), size: 40 }
            )
        );
        assert_eq!(config.seeds[1].at, None);
        assert_eq!(config.engine.push_slot, PushSlot::BelowStackPointer);
    }

    #[test]
    fn test_config_defaults() {
        let config = ReplayConfig::from_json_str("{}").unwrap();
        assert_eq!(config, ReplayConfig::default());
        assert_eq!(config.architecture, Architecture::Amd64);
        assert!(config.seeds.is_empty());
    }

    #[test]
    fn test_unknown_architecture_rejected() {
        assert!(ReplayConfig::from_json_str(r#"{"architecture": "mips"}"#).is_err());
    }

    #[test]
    fn test_apply_seeds() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        let registers: RegisterSnapshot = [("rdi".to_string(), 0x601040)].into_iter().collect();

        TaintSeed::new(SeedTarget::PointedMemory { register: "rdi".to_string(), size: 40 })
            .apply(&mut session, &registers)
            .unwrap();
        TaintSeed::new(SeedTarget::Register { name: "rdx".to_string() })
            .apply(&mut session, &registers)
            .unwrap();

        assert_eq!(session.export_memory_taint_ranges(), vec![(0x601040, 0x601068)]);
        assert!(session.is_register_tainted("edx").unwrap());
    }

    #[test]
    fn test_seed_errors() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        let registers = RegisterSnapshot::new();

        let missing = TaintSeed::new(SeedTarget::PointedMemory { register: "rdi".to_string(), size: 8 });
        assert!(missing.apply(&mut session, &registers).is_err());

        let unknown = TaintSeed::new(SeedTarget::Register { name: "xyz".to_string() });
        let err = unknown.apply(&mut session, &registers).unwrap_err();
        assert!(err.to_string().contains("unknown register"));
    }
}
