//! Register file layouts
//!
//! A layout maps every register name to a byte range inside an opaque
//! register-context blob. Sub-register aliases (`rax`, `eax`, `ax`, `al`)
//! share offsets, so taint written through one name is visible through the
//! others.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Result, TaintError};

/// Byte range of one register inside the context blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterSlot {
    pub offset: usize,
    pub width: usize,
}

impl RegisterSlot {
    pub fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    /// One past the last byte of the register
    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// Static description of an architecture's register context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureLayout {
    name: String,
    context_size: usize,
    pointer_width: usize,
    stack_pointer: String,
    program_counter: String,
    registers: BTreeMap<String, RegisterSlot>,
}

impl ArchitectureLayout {
    /// Build and validate a layout
    ///
    /// Every slot must be non-empty and lie inside `context_size`, and the
    /// stack pointer and program counter must be named registers of
    /// `pointer_width` bytes.
    pub fn new<I, S>(
        name: impl Into<String>,
        context_size: usize,
        pointer_width: usize,
        stack_pointer: impl Into<String>,
        program_counter: impl Into<String>,
        registers: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (S, RegisterSlot)>,
        S: Into<String>,
    {
        let layout = Self {
            name: name.into(),
            context_size,
            pointer_width,
            stack_pointer: stack_pointer.into(),
            program_counter: program_counter.into(),
            registers: registers
                .into_iter()
                .map(|(name, slot)| (name.into(), slot))
                .collect(),
        };
        layout.validate()?;
        Ok(layout)
    }

    /// The x86-64 guest state layout (920 bytes)
    pub fn amd64() -> Self {
        Self {
            name: "amd64".to_string(),
            context_size: AMD64_CONTEXT_SIZE,
            pointer_width: 8,
            stack_pointer: "rsp".to_string(),
            program_counter: "pc".to_string(),
            registers: AMD64_REGISTERS
                .iter()
                .map(|&(name, offset, width)| (name.to_string(), RegisterSlot::new(offset, width)))
                .collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pointer_width == 0 || self.pointer_width > 8 {
            return Err(TaintError::InvalidLayout(format!(
                "pointer width {} is not in 1..=8",
                self.pointer_width
            )));
        }
        for (name, slot) in &self.registers {
            if slot.width == 0 || slot.end() > self.context_size {
                return Err(TaintError::InvalidLayout(format!(
                    "register {} at {}+{} does not fit a {}-byte context",
                    name, slot.offset, slot.width, self.context_size
                )));
            }
        }
        for special in [&self.stack_pointer, &self.program_counter] {
            let slot = self.slot(special)?;
            if slot.width != self.pointer_width {
                return Err(TaintError::InvalidLayout(format!(
                    "{} is {} bytes wide, pointers are {}",
                    special, slot.width, self.pointer_width
                )));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the register-context blob in bytes
    pub fn context_size(&self) -> usize {
        self.context_size
    }

    pub fn pointer_width(&self) -> usize {
        self.pointer_width
    }

    pub fn stack_pointer(&self) -> &str {
        &self.stack_pointer
    }

    pub fn program_counter(&self) -> &str {
        &self.program_counter
    }

    /// Look up a register, failing on unknown names
    pub fn slot(&self, register: &str) -> Result<RegisterSlot> {
        self.registers
            .get(register)
            .copied()
            .ok_or_else(|| TaintError::UnknownRegister(register.to_string()))
    }

    /// All register names with their slots, sorted by name
    pub fn registers(&self) -> impl Iterator<Item = (&str, RegisterSlot)> {
        self.registers.iter().map(|(name, slot)| (name.as_str(), *slot))
    }
}

/// Built-in architectures selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    Amd64,
}

impl Architecture {
    pub fn layout(&self) -> ArchitectureLayout {
        match self {
            Architecture::Amd64 => ArchitectureLayout::amd64(),
        }
    }
}

const AMD64_CONTEXT_SIZE: usize = 920;

/// (name, offset, width) of every amd64 guest-state register
#[rustfmt::skip]
const AMD64_REGISTERS: &[(&str, usize, usize)] = &[
    // general purpose
    ("rax", 16, 8), ("eax", 16, 4), ("ax", 16, 2), ("al", 16, 1), ("ah", 17, 1),
    ("rcx", 24, 8), ("ecx", 24, 4), ("cx", 24, 2), ("cl", 24, 1), ("ch", 25, 1),
    ("rdx", 32, 8), ("edx", 32, 4), ("dx", 32, 2), ("dl", 32, 1), ("dh", 33, 1),
    ("rbx", 40, 8), ("ebx", 40, 4), ("bx", 40, 2), ("bl", 40, 1), ("bh", 41, 1),
    ("rsp", 48, 8), ("esp", 48, 4), ("sp", 48, 2), ("spl", 48, 1),
    ("rbp", 56, 8), ("ebp", 56, 4), ("bp", 56, 2), ("bpl", 56, 1),
    ("rsi", 64, 8), ("esi", 64, 4), ("si", 64, 2), ("sil", 64, 1), ("sih", 65, 1),
    ("rdi", 72, 8), ("edi", 72, 4), ("di", 72, 2), ("dil", 72, 1), ("dih", 73, 1),
    ("r8", 80, 8), ("r8d", 80, 4), ("r8w", 80, 2), ("r8b", 80, 1),
    ("r9", 88, 8), ("r9d", 88, 4), ("r9w", 88, 2), ("r9b", 88, 1),
    ("r10", 96, 8), ("r10d", 96, 4), ("r10w", 96, 2), ("r10b", 96, 1),
    ("r11", 104, 8), ("r11d", 104, 4), ("r11w", 104, 2), ("r11b", 104, 1),
    ("r12", 112, 8), ("r12d", 112, 4), ("r12w", 112, 2), ("r12b", 112, 1),
    ("r13", 120, 8), ("r13d", 120, 4), ("r13w", 120, 2), ("r13b", 120, 1),
    ("r14", 128, 8), ("r14d", 128, 4), ("r14w", 128, 2), ("r14b", 128, 1),
    ("r15", 136, 8), ("r15d", 136, 4), ("r15w", 136, 2), ("r15b", 136, 1),
    // condition-code thunk
    ("cc_op", 144, 8), ("cc_dep1", 152, 8), ("cc_dep2", 160, 8), ("cc_ndep", 168, 8),
    ("d", 176, 8), ("dflag", 176, 8),
    // instruction pointer
    ("rip", 184, 8), ("pc", 184, 8), ("ip", 184, 8),
    ("ac", 192, 8), ("acflag", 192, 8),
    ("id", 200, 8), ("idflag", 200, 8),
    ("fs", 208, 8), ("fs_const", 208, 8),
    ("sseround", 216, 8),
    // vector registers, xmm aliases the low half of ymm
    ("ymm0", 224, 32), ("xmm0", 224, 16),
    ("ymm1", 256, 32), ("xmm1", 256, 16),
    ("ymm2", 288, 32), ("xmm2", 288, 16),
    ("ymm3", 320, 32), ("xmm3", 320, 16),
    ("ymm4", 352, 32), ("xmm4", 352, 16),
    ("ymm5", 384, 32), ("xmm5", 384, 16),
    ("ymm6", 416, 32), ("xmm6", 416, 16),
    ("ymm7", 448, 32), ("xmm7", 448, 16),
    ("ymm8", 480, 32), ("xmm8", 480, 16),
    ("ymm9", 512, 32), ("xmm9", 512, 16),
    ("ymm10", 544, 32), ("xmm10", 544, 16),
    ("ymm11", 576, 32), ("xmm11", 576, 16),
    ("ymm12", 608, 32), ("xmm12", 608, 16),
    ("ymm13", 640, 32), ("xmm13", 640, 16),
    ("ymm14", 672, 32), ("xmm14", 672, 16),
    ("ymm15", 704, 32), ("xmm15", 704, 16),
    ("ymm16", 736, 32), ("xmm16", 736, 16),
    // x87
    ("ftop", 768, 4),
    ("fpreg", 776, 64), ("fpu_regs", 776, 64),
    ("mm0", 776, 8), ("mm1", 784, 8), ("mm2", 792, 8), ("mm3", 800, 8),
    ("mm4", 808, 8), ("mm5", 816, 8), ("mm6", 824, 8), ("mm7", 832, 8),
    ("fptag", 840, 8), ("fpu_tags", 840, 8),
    ("fpround", 848, 8), ("fc3210", 856, 8),
    // bookkeeping
    ("emnote", 864, 4), ("cmstart", 872, 8), ("cmlen", 880, 8), ("nraddr", 888, 8),
    ("gs", 904, 8), ("gs_const", 904, 8), ("ip_at_syscall", 912, 8),
];
