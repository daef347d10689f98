//! Workout compiler and tick-driven execution engine.
//!
//! Statements from the `wod` crate are compiled by the [`JitCompiler`] into a
//! [`BlockTree`], which a [`RuntimeStack`] then drives one tick at a time.
//! Behaviors attached to each block communicate only through
//! [`SharedMemory`] and report outward through the [`Outbox`].

pub mod behavior;
pub mod block;
pub mod compiler;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod memory;
pub mod stack;
pub mod time;

pub use block::{BlockId, BlockKind, BlockState, BlockTree, RuntimeBlock};
pub use compiler::{JitCompiler, StrategyKind, StrategyRegistry};
pub use config::CompilerConfig;
pub use driver::{DriveConfig, SimulationReport, simulate};
pub use error::{CompileError, CompileErrorKind, RuntimeError};
pub use events::{Cue, CueEvent, Outbox, RuntimeEvent, RuntimeWarning};
pub use memory::{MemoryKey, MemoryKind, SharedMemory};
pub use stack::{RuntimeStack, TickResult};
pub use time::Timestamp;
