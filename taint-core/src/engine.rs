//! Per-instruction taint propagation
//!
//! Each instruction is classified once into a [`Transfer`], a closed set of
//! instruction shapes, and the matching transfer function is applied to the
//! register and memory taint states.
//!
//! Only data movement is modelled. Arithmetic, logic, SIMD and string
//! instructions classify as [`Transfer::Untracked`] and leave taint unchanged,
//! which under-approximates the real information flow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use crate::instruction::{DecodedInstruction, MemoryOperand, OperandKind};
use crate::memory::MemoryTaintState;
use crate::registers::RegisterTaintState;
use crate::{Result, TaintError};

/// Live register values at the current program point
pub trait RegisterContext {
    /// Current value of `register`, `None` if the context does not expose it
    fn read(&self, register: &str) -> Option<u64>;
}

impl<S: BuildHasher> RegisterContext for HashMap<String, u64, S> {
    fn read(&self, register: &str) -> Option<u64> {
        self.get(register).copied()
    }
}

impl RegisterContext for BTreeMap<String, u64> {
    fn read(&self, register: &str) -> Option<u64> {
        self.get(register).copied()
    }
}

impl<C: RegisterContext + ?Sized> RegisterContext for &C {
    fn read(&self, register: &str) -> Option<u64> {
        (**self).read(register)
    }
}

/// Where a `push` writes relative to the stack pointer it observes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushSlot {
    /// `[sp, sp + width)`: the context already reflects the decrement
    #[default]
    AtStackPointer,
    /// `[sp - width, sp)`: the context is a pre-execution snapshot
    BelowStackPointer,
}

/// Engine behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub push_slot: PushSlot,
    /// Clear the whole destination range of a register store before adding
    /// the register's taint. When off, stores only ever add taint and bytes
    /// the register left clean keep whatever taint they had.
    pub overwrite_on_store: bool,
}

/// Instruction shape that determines the taint transfer function
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    /// `reg <- [mem]`, register taint overwritten from memory
    LoadRegister { dest: String, src: MemoryOperand },
    /// `[mem] <- reg`, register taint added to memory
    StoreRegister { dest: MemoryOperand, src: String },
    /// `reg <- reg`
    CopyRegister { dest: String, src: String },
    /// `xor reg, reg`
    ZeroRegister { dest: String },
    /// `mov reg, imm`
    ClearRegister { dest: String },
    /// `mov [mem], imm`
    ClearMemory { dest: MemoryOperand, size: usize },
    Push { src: String },
    Pop { dest: String },
    Return,
    /// No modelled taint effect
    Untracked,
}

impl Transfer {
    /// Classify an instruction by operand shape and mnemonic
    pub fn classify(instruction: &DecodedInstruction) -> Self {
        let mnemonic = instruction.mnemonic.to_ascii_lowercase();
        let has_prefix = |prefix: &str| mnemonic.starts_with(prefix);

        match instruction.operands.as_slice() {
            [dest, src] => {
                if has_prefix("cmp") || has_prefix("test") {
                    return Transfer::Untracked;
                }
                match (&dest.kind, &src.kind) {
                    (OperandKind::Register(dest), OperandKind::Memory(src)) => Transfer::LoadRegister {
                        dest: dest.clone(),
                        src: src.clone(),
                    },
                    (OperandKind::Memory(dest), OperandKind::Register(src)) => Transfer::StoreRegister {
                        dest: dest.clone(),
                        src: src.clone(),
                    },
                    (OperandKind::Register(dest), OperandKind::Immediate(_)) if has_prefix("mov") => {
                        Transfer::ClearRegister { dest: dest.clone() }
                    }
                    (OperandKind::Memory(dest), OperandKind::Immediate(_)) if has_prefix("mov") => {
                        Transfer::ClearMemory {
                            dest: dest.clone(),
                            size: src.size,
                        }
                    }
                    (OperandKind::Register(dest), OperandKind::Register(src)) => {
                        if has_prefix("xor") && dest == src {
                            Transfer::ZeroRegister { dest: dest.clone() }
                        } else {
                            Transfer::CopyRegister {
                                dest: dest.clone(),
                                src: src.clone(),
                            }
                        }
                    }
                    _ => Transfer::Untracked,
                }
            }
            operands if has_prefix("push") => match operands {
                [operand] => operand
                    .as_register()
                    .map_or(Transfer::Untracked, |src| Transfer::Push { src: src.to_string() }),
                _ => Transfer::Untracked,
            },
            operands if has_prefix("pop") => match operands {
                [operand] => operand
                    .as_register()
                    .map_or(Transfer::Untracked, |dest| Transfer::Pop { dest: dest.to_string() }),
                _ => Transfer::Untracked,
            },
            _ if has_prefix("ret") => Transfer::Return,
            _ => Transfer::Untracked,
        }
    }

    pub fn is_tracked(&self) -> bool {
        !matches!(self, Transfer::Untracked)
    }
}

/// Applies transfer functions to a pair of taint states
///
/// Holds no taint state of its own. Every transfer reads all of its inputs
/// before mutating anything, so an error leaves both states untouched.
#[derive(Debug, Clone, Default)]
pub struct PropagationEngine {
    config: EngineConfig,
}

impl PropagationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Classify `instruction` and apply its transfer function
    ///
    /// Returns the transfer that was applied.
    pub fn execute<C: RegisterContext + ?Sized>(
        &self,
        instruction: &DecodedInstruction,
        context: &C,
        registers: &mut RegisterTaintState,
        memory: &mut MemoryTaintState,
    ) -> Result<Transfer> {
        let transfer = Transfer::classify(instruction);
        self.apply(&transfer, context, registers, memory)?;
        Ok(transfer)
    }

    /// Apply an already classified transfer
    pub fn apply<C: RegisterContext + ?Sized>(
        &self,
        transfer: &Transfer,
        context: &C,
        registers: &mut RegisterTaintState,
        memory: &mut MemoryTaintState,
    ) -> Result<()> {
        match transfer {
            Transfer::LoadRegister { dest, src } => {
                let Some(address) = effective_address(src, context)? else {
                    return Ok(());
                };
                let width = registers.layout().slot(dest)?.width;
                let bitmap = memory.to_bitmap(address, width)?;
                registers.load_from_bitmap(dest, &bitmap)?;
            }
            Transfer::StoreRegister { dest, src } => {
                let Some(address) = effective_address(dest, context)? else {
                    return Ok(());
                };
                self.store(registers, memory, src, address)?;
            }
            Transfer::CopyRegister { dest, src } => registers.copy_range(dest, src)?,
            Transfer::ZeroRegister { dest } | Transfer::ClearRegister { dest } => {
                registers.mark_untainted(dest)?
            }
            Transfer::ClearMemory { dest, size } => {
                let Some(address) = effective_address(dest, context)? else {
                    return Ok(());
                };
                memory.mark_untainted(address, *size as u64)?;
            }
            Transfer::Push { src } => {
                let sp = read_register(context, registers.layout().stack_pointer())?;
                let slot = match self.config.push_slot {
                    PushSlot::AtStackPointer => sp,
                    PushSlot::BelowStackPointer => {
                        sp.wrapping_sub(registers.layout().slot(src)?.width as u64)
                    }
                };
                self.store(registers, memory, src, slot)?;
            }
            Transfer::Pop { dest } => {
                let sp = read_register(context, registers.layout().stack_pointer())?;
                let width = registers.layout().slot(dest)?.width;
                let bitmap = memory.to_bitmap(sp, width)?;
                registers.load_from_bitmap(dest, &bitmap)?;
            }
            Transfer::Return => {
                let layout = registers.layout();
                let sp = read_register(context, layout.stack_pointer())?;
                let bitmap = memory.to_bitmap(sp, layout.pointer_width())?;
                let pc = layout.program_counter().to_string();
                registers.load_from_bitmap(&pc, &bitmap)?;
            }
            Transfer::Untracked => return Ok(()),
        }
        tracing::trace!(?transfer, "applied transfer");
        Ok(())
    }

    /// Move the taint of register `src` into memory at `address`
    fn store(
        &self,
        registers: &RegisterTaintState,
        memory: &mut MemoryTaintState,
        src: &str,
        address: u64,
    ) -> Result<()> {
        let ranges = registers.to_intervals(src, address)?;
        if self.config.overwrite_on_store {
            let width = registers.layout().slot(src)?.width as u64;
            memory.clear_range(address, width)?;
        }
        memory.import_ranges(ranges);
        Ok(())
    }
}

fn read_register<C: RegisterContext + ?Sized>(context: &C, register: &str) -> Result<u64> {
    context
        .read(register)
        .ok_or_else(|| TaintError::MissingRegisterValue(register.to_string()))
}

/// `base + displacement + index * scale`, with machine wrap-around
///
/// Operands without a base register (absolute or segment-relative forms)
/// yield `None` and are not tracked. An indexed operand must use a scale of
/// 1, 2, 4 or 8.
pub fn effective_address<C: RegisterContext + ?Sized>(
    operand: &MemoryOperand,
    context: &C,
) -> Result<Option<u64>> {
    let Some(base) = &operand.base else {
        return Ok(None);
    };
    let mut address = read_register(context, base)?.wrapping_add(operand.displacement as u64);
    if let Some(index) = &operand.index {
        if !matches!(operand.scale, 1 | 2 | 4 | 8) {
            return Err(TaintError::InvalidScale(operand.scale));
        }
        let offset = read_register(context, index)?.wrapping_mul(u64::from(operand.scale));
        address = address.wrapping_add(offset);
    }
    Ok(Some(address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchitectureLayout;
    use crate::instruction::Operand;
    use crate::interval::Interval;
    use std::sync::Arc;

    struct Fixture {
        engine: PropagationEngine,
        regs: RegisterTaintState,
        memory: MemoryTaintState,
        context: HashMap<String, u64>,
    }

    impl Fixture {
        fn new(config: EngineConfig) -> Self {
            Self {
                engine: PropagationEngine::new(config),
                regs: RegisterTaintState::new(Arc::new(ArchitectureLayout::amd64())),
                memory: MemoryTaintState::new(),
                context: HashMap::new(),
            }
        }

        fn set(&mut self, register: &str, value: u64) {
            self.context.insert(register.to_string(), value);
        }

        fn run(&mut self, mnemonic: &str, operands: Vec<Operand>) -> Transfer {
            let instr = DecodedInstruction::new(0x401000, mnemonic, operands);
            self.engine
                .execute(&instr, &self.context, &mut self.regs, &mut self.memory)
                .unwrap()
        }
    }

    fn reg(name: &str) -> Operand {
        let width = ArchitectureLayout::amd64().slot(name).unwrap().width;
        Operand::register(name, width)
    }

    fn mem(base: &str, size: usize) -> Operand {
        Operand::memory(MemoryOperand::base(base), size)
    }

    #[test]
    fn test_classify_shapes() {
        let classify = |mnemonic: &str, operands: Vec<Operand>| {
            Transfer::classify(&DecodedInstruction::new(0, mnemonic, operands))
        };

        assert!(matches!(classify("mov", vec![reg("rax"), mem("rbx", 8)]), Transfer::LoadRegister { .. }));
        assert!(matches!(classify("mov", vec![mem("rbx", 8), reg("rax")]), Transfer::StoreRegister { .. }));
        assert!(matches!(classify("mov", vec![reg("rax"), reg("rbx")]), Transfer::CopyRegister { .. }));
        assert!(matches!(classify("xor", vec![reg("eax"), reg("eax")]), Transfer::ZeroRegister { .. }));
        assert!(matches!(classify("xor", vec![reg("eax"), reg("ebx")]), Transfer::CopyRegister { .. }));
        assert!(matches!(classify("movabs", vec![reg("rax"), Operand::immediate(1, 8)]), Transfer::ClearRegister { .. }));
        assert_eq!(
            classify("mov", vec![mem("rbx", 4), Operand::immediate(0, 4)]),
            Transfer::ClearMemory { dest: MemoryOperand::base("rbx"), size: 4 }
        );
        assert_eq!(classify("PUSH", vec![reg("rbp")]), Transfer::Push { src: "rbp".to_string() });
        assert_eq!(classify("pop", vec![reg("rbp")]), Transfer::Pop { dest: "rbp".to_string() });
        assert_eq!(classify("ret", vec![]), Transfer::Return);
        assert_eq!(classify("ret", vec![Operand::immediate(16, 2)]), Transfer::Return);
    }

    #[test]
    fn test_classify_untracked() {
        let classify = |mnemonic: &str, operands: Vec<Operand>| {
            Transfer::classify(&DecodedInstruction::new(0, mnemonic, operands))
        };

        assert_eq!(classify("cmp", vec![reg("rax"), mem("rbx", 8)]), Transfer::Untracked);
        assert_eq!(classify("test", vec![reg("rax"), reg("rax")]), Transfer::Untracked);
        assert_eq!(classify("add", vec![reg("rax"), Operand::immediate(1, 4)]), Transfer::Untracked);
        assert_eq!(classify("push", vec![Operand::immediate(1, 4)]), Transfer::Untracked);
        assert_eq!(classify("pushfq", vec![]), Transfer::Untracked);
        assert_eq!(classify("nop", vec![]), Transfer::Untracked);
        assert_eq!(classify("imul", vec![reg("rax"), reg("rbx"), Operand::immediate(3, 4)]), Transfer::Untracked);
        assert!(!Transfer::Untracked.is_tracked());
    }

    #[test]
    fn test_effective_address() {
        let mut context = HashMap::new();
        context.insert("rbp".to_string(), 0x7fff_0000u64);
        context.insert("rcx".to_string(), 3u64);

        let operand = MemoryOperand::base("rbp").with_displacement(-0x10).with_index("rcx", 8);
        assert_eq!(effective_address(&operand, &context).unwrap(), Some(0x7fff_0000 - 0x10 + 24));

        let absolute = MemoryOperand { displacement: 0x601040, ..Default::default() };
        assert_eq!(effective_address(&absolute, &context).unwrap(), None);

        let odd_scale = MemoryOperand::base("rbp").with_index("rcx", 3);
        assert_eq!(effective_address(&odd_scale, &context), Err(TaintError::InvalidScale(3)));
        let zero_scale = MemoryOperand::base("rbp").with_index("rcx", 0);
        assert_eq!(effective_address(&zero_scale, &context), Err(TaintError::InvalidScale(0)));
        let unindexed = MemoryOperand { scale: 0, ..MemoryOperand::base("rbp") };
        assert_eq!(effective_address(&unindexed, &context).unwrap(), Some(0x7fff_0000));

        let missing = MemoryOperand::base("rsi");
        assert_eq!(
            effective_address(&missing, &context),
            Err(TaintError::MissingRegisterValue("rsi".to_string()))
        );
    }

    #[test]
    fn test_store_then_load() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.set("rax", 0x2000);
        fx.regs.mark_tainted("rdi").unwrap();

        fx.run("mov", vec![mem("rax", 8), reg("rdi")]);
        assert_eq!(fx.memory.export_ranges(), vec![Interval::new(0x2000, 0x2008)]);

        fx.run("mov", vec![reg("rbx"), mem("rax", 8)]);
        assert!(fx.regs.is_fully_tainted("rbx").unwrap());
    }

    #[test]
    fn test_load_overwrites_register() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.set("rsi", 0x5000);
        fx.regs.mark_tainted("rax").unwrap();
        fx.memory.mark_tainted(0x5000, 2).unwrap();

        fx.run("mov", vec![reg("rax"), mem("rsi", 8)]);
        assert!(fx.regs.is_tainted("ax").unwrap());
        assert!(!fx.regs.is_fully_tainted("rax").unwrap(), "clean memory bytes clear the register");
        assert_eq!(fx.regs.to_bitmap("rax").unwrap().as_bytes(), &[0b0000_0011]);
    }

    #[test]
    fn test_store_is_union_by_default() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.set("rax", 0x2000);
        fx.memory.mark_tainted(0x2000, 8).unwrap();

        // rdi is clean, the stale memory taint survives
        fx.run("mov", vec![mem("rax", 8), reg("rdi")]);
        assert!(fx.memory.is_tainted(0x2000, 8).unwrap());
    }

    #[test]
    fn test_store_overwrites_when_configured() {
        let mut fx = Fixture::new(EngineConfig {
            overwrite_on_store: true,
            ..Default::default()
        });
        fx.set("rax", 0x2000);
        fx.memory.mark_tainted(0x1ffc, 16).unwrap();
        fx.regs.mark_tainted("dil").unwrap();

        fx.run("mov", vec![mem("rax", 8), reg("rdi")]);
        assert_eq!(
            fx.memory.export_ranges(),
            vec![Interval::new(0x1ffc, 0x2001), Interval::new(0x2008, 0x200c)]
        );
    }

    #[test]
    fn test_register_copy_and_zeroing() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.regs.mark_tainted("rcx").unwrap();

        fx.run("mov", vec![reg("rdx"), reg("rcx")]);
        assert_eq!(fx.regs.is_tainted("rdx").unwrap(), fx.regs.is_tainted("rcx").unwrap());

        fx.run("xor", vec![reg("rdx"), reg("rdx")]);
        assert!(!fx.regs.is_tainted("rdx").unwrap());
        assert!(fx.regs.is_tainted("rcx").unwrap());
    }

    #[test]
    fn test_immediates_clear_taint() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.set("rbp", 0x7000);
        fx.regs.mark_tainted("rax").unwrap();
        fx.memory.mark_tainted(0x7000, 4).unwrap();

        fx.run("mov", vec![reg("rax"), Operand::immediate(0, 8)]);
        assert!(!fx.regs.is_tainted("rax").unwrap());

        fx.run("mov", vec![mem("rbp", 4), Operand::immediate(7, 4)]);
        assert!(!fx.memory.is_tainted(0x7000, 4).unwrap());
    }

    #[test]
    fn test_push_pop_round_trip() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.set("rsp", 0x7ff0);
        fx.regs.mark_tainted("rbx").unwrap();

        fx.run("push", vec![reg("rbx")]);
        assert!(fx.memory.is_tainted(0x7ff0, 8).unwrap());

        fx.regs.mark_untainted("rbx").unwrap();
        fx.run("pop", vec![reg("rbx")]);
        assert!(fx.regs.is_fully_tainted("rbx").unwrap());
    }

    #[test]
    fn test_push_below_stack_pointer() {
        let mut fx = Fixture::new(EngineConfig {
            push_slot: PushSlot::BelowStackPointer,
            ..Default::default()
        });
        fx.set("rsp", 0x8000);
        fx.regs.mark_tainted("rbx").unwrap();

        fx.run("push", vec![reg("rbx")]);
        assert_eq!(fx.memory.export_ranges(), vec![Interval::new(0x7ff8, 0x8000)]);

        fx.regs.mark_untainted("rbx").unwrap();
        fx.set("rsp", 0x7ff8);
        fx.run("pop", vec![reg("rbx")]);
        assert!(fx.regs.is_tainted("rbx").unwrap());
    }

    #[test]
    fn test_return_taints_program_counter() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.set("rsp", 0x7fe8);
        fx.memory.mark_tainted(0x7fe8, 8).unwrap();

        assert_eq!(fx.run("ret", vec![]), Transfer::Return);
        assert!(fx.regs.is_fully_tainted("pc").unwrap());
        assert!(fx.regs.is_tainted("rip").unwrap());
    }

    #[test]
    fn test_errors_leave_state_untouched() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.regs.mark_tainted("rdi").unwrap();
        let instr = DecodedInstruction::new(0, "mov", vec![mem("rax", 8), reg("rdi")]);

        let result = fx.engine.execute(&instr, &fx.context, &mut fx.regs, &mut fx.memory);
        assert_eq!(result, Err(TaintError::MissingRegisterValue("rax".to_string())));
        assert!(fx.memory.is_empty());

        let unknown = DecodedInstruction::new(0, "mov", vec![Operand::register("foo", 8), reg("rdi")]);
        assert!(matches!(
            fx.engine.execute(&unknown, &fx.context, &mut fx.regs, &mut fx.memory),
            Err(TaintError::UnknownRegister(_))
        ));
    }

    #[test]
    fn test_untracked_is_noop() {
        let mut fx = Fixture::new(EngineConfig::default());
        fx.regs.mark_tainted("rax").unwrap();
        let transfer = fx.run("add", vec![reg("rbx"), reg("rax")]);
        // two register operands classify as a copy regardless of mnemonic
        assert!(matches!(transfer, Transfer::CopyRegister { .. }));

        let transfer = fx.run("shl", vec![reg("rax"), Operand::immediate(3, 1)]);
        assert_eq!(transfer, Transfer::Untracked);
        assert!(fx.regs.is_fully_tainted("rax").unwrap());
    }

    #[test]
    fn test_engine_config_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"push_slot": "below_stack_pointer"}"#).unwrap();
        assert_eq!(config.push_slot, PushSlot::BelowStackPointer);
        assert!(!config.overwrite_on_store);
    }
}
