//! Replay of a recorded trace through a tracing session
//!
//! Plays the part of the instrumentation layer: it decides when tracing is
//! active, applies taint seeds and feeds each instruction with its register
//! snapshot to [`TracingSession::execute`].

use anyhow::Context;
use std::sync::Arc;
use taint_core::{ArchitectureLayout, RegisterContext, RegisterSlot, TracingSession};

use crate::config::ReplayConfig;
use crate::report::TaintReport;
use crate::trace::{ExecutionTrace, InstructionTrace};
use crate::Result;

/// Counters collected while replaying
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub instructions_replayed: usize,
    pub instructions_propagated: usize,
    pub stopped_at: Option<u64>,
}

/// Replay `trace` and return the final session
///
/// Tracing becomes active at the first instruction whose address equals
/// `config.start_address` (or at the first instruction when unset) and ends
/// right before the first instruction at `config.stop_address`. Seeds with
/// no trigger address are applied when tracing becomes active. A seed with a
/// trigger is applied once, when its address is first reached, whether or not
/// tracing is active yet.
pub fn replay_session(
    trace: &ExecutionTrace,
    config: &ReplayConfig,
) -> Result<(TracingSession, ReplayStats)> {
    tracing::info!(
        "Starting taint replay, {} instructions, {} seeds",
        trace.instruction_count(),
        config.seeds.len()
    );

    let layout = Arc::new(config.architecture.layout());
    let mut session = TracingSession::with_config(layout.clone(), config.engine);
    let mut stats = ReplayStats::default();
    let mut seeded = vec![false; config.seeds.len()];
    let mut active = false;

    for step in &trace.instructions {
        let pc = step.pc();

        if !active && !config.start_address.is_some_and(|start| start != pc) {
            tracing::debug!("Tracing started at {:#x}", pc);
            active = true;
        }

        if active && config.stop_address == Some(pc) {
            tracing::debug!("Tracing stopped at {:#x}", pc);
            stats.stopped_at = Some(pc);
            break;
        }

        for (seed, done) in config.seeds.iter().zip(seeded.iter_mut()) {
            let due = match seed.at {
                Some(at) => at == pc,
                None => active,
            };
            if *done || !due {
                continue;
            }
            seed.apply(&mut session, &step.registers)
                .with_context(|| format!("Failed to apply taint seed at {:#x}", pc))?;
            *done = true;
        }

        if !active {
            continue;
        }

        let context = StepContext::new(&layout, step);
        let transfer = session
            .execute(&step.instruction, &context)
            .with_context(|| {
                format!(
                    "Failed to propagate taint through {} at {:#x}",
                    step.instruction.mnemonic, pc
                )
            })?;

        stats.instructions_replayed += 1;
        if transfer.is_tracked() {
            stats.instructions_propagated += 1;
        } else {
            tracing::trace!("Untracked instruction {} at {:#x}", step.instruction.mnemonic, pc);
        }
    }

    if !active {
        tracing::warn!("Start address never reached, no instruction was replayed");
    }
    for (seed, _) in config.seeds.iter().zip(&seeded).filter(|(_, done)| !**done) {
        tracing::warn!("Taint seed {:?} was never applied", seed);
    }

    tracing::info!(
        "Replay complete: {} instructions replayed, {} propagated taint",
        stats.instructions_replayed,
        stats.instructions_propagated
    );

    Ok((session, stats))
}

/// Register values of one trace step
///
/// Falls back to the instruction's own address for the program counter and
/// its aliases (`rip`, `ip`) when the snapshot does not record them.
struct StepContext<'a> {
    step: &'a InstructionTrace,
    layout: &'a ArchitectureLayout,
    program_counter: Option<RegisterSlot>,
}

impl<'a> StepContext<'a> {
    fn new(layout: &'a ArchitectureLayout, step: &'a InstructionTrace) -> Self {
        Self {
            step,
            layout,
            program_counter: layout.slot(layout.program_counter()).ok(),
        }
    }
}

impl RegisterContext for StepContext<'_> {
    fn read(&self, register: &str) -> Option<u64> {
        if let Some(value) = self.step.registers.get(register) {
            return Some(*value);
        }
        let slot = self.layout.slot(register).ok()?;
        (Some(slot) == self.program_counter).then(|| self.step.pc())
    }
}

/// Replay `trace` and summarise the resulting taint
pub fn replay_trace(trace: &ExecutionTrace, config: &ReplayConfig) -> Result<TaintReport> {
    let (session, stats) = replay_session(trace, config)?;
    let mut report = TaintReport::from_session(&session);
    report.instructions_replayed = stats.instructions_replayed;
    report.instructions_propagated = stats.instructions_propagated;
    report.stopped_at = stats.stopped_at;
    Ok(report)
}
