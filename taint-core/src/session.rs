//! A tracing session: the taint state of one traced execution

use std::sync::Arc;

use crate::arch::ArchitectureLayout;
use crate::engine::{EngineConfig, PropagationEngine, RegisterContext, Transfer};
use crate::instruction::DecodedInstruction;
use crate::memory::MemoryTaintState;
use crate::registers::RegisterTaintState;
use crate::Result;

/// Register and memory taint for a single traced control-flow stream
///
/// Created when tracing starts and dropped when it ends. Hosts seed taint and
/// read results through the methods here; the instrumentation layer feeds
/// every executed instruction to [`execute`](Self::execute).
#[derive(Debug, Clone)]
pub struct TracingSession {
    layout: Arc<ArchitectureLayout>,
    engine: PropagationEngine,
    registers: RegisterTaintState,
    memory: MemoryTaintState,
}

impl TracingSession {
    pub fn new(layout: ArchitectureLayout) -> Self {
        Self::with_config(Arc::new(layout), EngineConfig::default())
    }

    pub fn with_config(layout: Arc<ArchitectureLayout>, config: EngineConfig) -> Self {
        tracing::debug!(
            "Creating tracing session for {} ({} byte register context)",
            layout.name(),
            layout.context_size()
        );
        Self {
            registers: RegisterTaintState::new(layout.clone()),
            memory: MemoryTaintState::new(),
            engine: PropagationEngine::new(config),
            layout,
        }
    }

    pub fn layout(&self) -> &ArchitectureLayout {
        &self.layout
    }

    pub fn engine(&self) -> &PropagationEngine {
        &self.engine
    }

    pub fn registers(&self) -> &RegisterTaintState {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut RegisterTaintState {
        &mut self.registers
    }

    pub fn memory(&self) -> &MemoryTaintState {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryTaintState {
        &mut self.memory
    }

    /// Propagate taint through one executed instruction
    pub fn execute<C: RegisterContext + ?Sized>(
        &mut self,
        instruction: &DecodedInstruction,
        context: &C,
    ) -> Result<Transfer> {
        self.engine
            .execute(instruction, context, &mut self.registers, &mut self.memory)
    }

    pub fn mark_register_tainted(&mut self, register: &str) -> Result<()> {
        self.registers.mark_tainted(register)
    }

    pub fn mark_register_untainted(&mut self, register: &str) -> Result<()> {
        self.registers.mark_untainted(register)
    }

    pub fn mark_memory_tainted(&mut self, address: u64, size: u64) -> Result<()> {
        self.memory.mark_tainted(address, size)
    }

    /// Exact-match untaint, see [`MemoryTaintState::mark_untainted`]
    pub fn mark_memory_untainted(&mut self, address: u64, size: u64) -> Result<()> {
        self.memory.mark_untainted(address, size)
    }

    pub fn is_register_tainted(&self, register: &str) -> Result<bool> {
        self.registers.is_tainted(register)
    }

    pub fn is_memory_tainted(&self, address: u64, size: u64) -> Result<bool> {
        self.memory.is_tainted(address, size)
    }

    /// Tainted memory as merged `(start, end)` pairs in ascending order
    pub fn export_memory_taint_ranges(&self) -> Vec<(u64, u64)> {
        self.memory
            .export_ranges()
            .into_iter()
            .map(Into::into)
            .collect()
    }

    /// Tainted bytes of `register` as absolute `(start, end)` address pairs,
    /// with the register's first byte placed at `base`
    pub fn export_register_taint_ranges(&self, register: &str, base: u64) -> Result<Vec<(u64, u64)>> {
        Ok(self
            .registers
            .to_intervals(register, base)?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    /// Drop all taint, keeping layout and configuration
    pub fn reset(&mut self) {
        self.registers.clear();
        self.memory.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{MemoryOperand, Operand};
    use std::collections::HashMap;

    fn context(values: &[(&str, u64)]) -> HashMap<String, u64> {
        values.iter().map(|(name, value)| (name.to_string(), *value)).collect()
    }

    #[test]
    fn test_seed_and_query() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        session.mark_register_tainted("rsi").unwrap();
        session.mark_memory_tainted(0x601000, 40).unwrap();

        assert!(session.is_register_tainted("esi").unwrap());
        assert!(!session.is_register_tainted("rdi").unwrap());
        assert!(session.is_memory_tainted(0x601020, 8).unwrap());
        assert_eq!(session.export_memory_taint_ranges(), vec![(0x601000, 0x601028)]);
        assert_eq!(
            session.export_register_taint_ranges("rsi", 0x10).unwrap(),
            vec![(0x10, 0x18)]
        );

        session.mark_memory_untainted(0x601000, 40).unwrap();
        session.mark_register_untainted("rsi").unwrap();
        assert!(session.export_memory_taint_ranges().is_empty());
        assert!(session.registers().tainted_registers().is_empty());
    }

    #[test]
    fn test_register_ranges_are_absolute() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        session.mark_register_tainted("sil").unwrap();
        session.mark_register_tainted("r9").unwrap();
        session.mark_register_untainted("r9w").unwrap();

        assert_eq!(
            session.export_register_taint_ranges("rsi", 0x601000).unwrap(),
            vec![(0x601000, 0x601001)]
        );
        assert_eq!(
            session.export_register_taint_ranges("r9", 0x601000).unwrap(),
            vec![(0x601002, 0x601008)]
        );
    }

    #[test]
    fn test_end_to_end_store_and_load() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        session.mark_register_tainted("rdi").unwrap();
        let ctx = context(&[("rax", 0x2000)]);

        let store = DecodedInstruction::new(
            0x400600,
            "mov",
            vec![Operand::memory(MemoryOperand::base("rax"), 8), Operand::register("rdi", 8)],
        );
        session.execute(&store, &ctx).unwrap();
        assert!(session.export_memory_taint_ranges().contains(&(0x2000, 0x2008)));

        let load = DecodedInstruction::new(
            0x400603,
            "mov",
            vec![Operand::register("rbx", 8), Operand::memory(MemoryOperand::base("rax"), 8)],
        );
        session.execute(&load, &ctx).unwrap();
        assert!(session.is_register_tainted("rbx").unwrap());
    }

    #[test]
    fn test_stack_round_trip_restores_taint() {
        for tainted in [true, false] {
            let mut session = TracingSession::new(ArchitectureLayout::amd64());
            if tainted {
                session.mark_register_tainted("r12").unwrap();
            }
            let ctx = context(&[("rsp", 0x7fff_e000)]);

            let push = DecodedInstruction::new(0, "push", vec![Operand::register("r12", 8)]);
            let pop = DecodedInstruction::new(1, "pop", vec![Operand::register("r12", 8)]);
            session.execute(&push, &ctx).unwrap();
            session.mark_register_untainted("r12").unwrap();
            session.execute(&pop, &ctx).unwrap();

            assert_eq!(session.is_register_tainted("r12").unwrap(), tainted);
        }
    }

    #[test]
    fn test_zeroing_idiom() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        session.mark_register_tainted("rax").unwrap();
        let xor = DecodedInstruction::new(
            0,
            "xor",
            vec![Operand::register("rax", 8), Operand::register("rax", 8)],
        );
        assert_eq!(
            session.execute(&xor, &context(&[])).unwrap(),
            Transfer::ZeroRegister { dest: "rax".to_string() }
        );
        assert!(!session.is_register_tainted("rax").unwrap());
    }

    #[test]
    fn test_reset() {
        let mut session = TracingSession::new(ArchitectureLayout::amd64());
        session.mark_register_tainted("rax").unwrap();
        session.mark_memory_tainted(0x1000, 1).unwrap();
        session.reset();
        assert!(!session.is_register_tainted("rax").unwrap());
        assert!(session.memory().is_empty());
        assert_eq!(session.layout().name(), "amd64");
    }
}
