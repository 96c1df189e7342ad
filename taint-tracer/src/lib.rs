//! Taint Tracer - Offline taint replay over recorded execution traces
//!
//! This crate drives a [`taint_core::TracingSession`] from a recorded trace
//! of decoded instructions and register snapshots, standing in for the live
//! instrumentation layer.
//!
//! # Overview
//!
//! * [`ExecutionTrace`] holds the recorded instructions, loaded from JSON
//! * [`ReplayConfig`] selects the architecture, the start/stop trigger
//!   addresses and the taint seeds
//! * [`replay_trace`] runs the trace and returns a [`TaintReport`]
//!
//! # Usage
//!
//! ```no_run
//! use taint_tracer::{replay_trace, ExecutionTrace, ReplayConfig};
//!
//! let trace = ExecutionTrace::from_json_file("trace.json").unwrap();
//! let config = ReplayConfig::from_json_file("replay.json").unwrap();
//!
//! let report = replay_trace(&trace, &config).unwrap();
//! println!("Replayed {} instructions", report.instructions_replayed);
//! println!("{}", report);
//! ```
//!
//! # Limitations
//!
//! * Register snapshots must hold every register used as a memory base or
//!   index, and the stack pointer for `push`, `pop` and `ret`; a missing value
//!   aborts the replay. Only the program counter (`rip`, `ip`) may be omitted;
//!   it defaults to the instruction's own address.
//! * Each trigger address is matched against instruction addresses only, so
//!   recursion or loops re-entering the start address do not restart tracing.

pub mod config;
pub mod replay;
pub mod report;
pub mod trace;

pub use config::{ReplayConfig, SeedTarget, TaintSeed};
pub use replay::{replay_session, replay_trace, ReplayStats};
pub use report::{RegisterTaint, TaintReport};
pub use trace::{ExecutionTrace, InstructionTrace, RegisterSnapshot};

/// Result type for taint tracer operations
pub type Result<T> = anyhow::Result<T>;
