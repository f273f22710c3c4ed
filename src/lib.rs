//! ttasched - Resource-Constrained Instruction Scheduling.
//!
//! ttasched is the scheduling core of a retargetable backend for
//! transport-triggered processor architectures: machines built from
//! configurable function units, register files and a bus/socket interconnect,
//! where the program is expressed as explicit data transports ("moves"). The
//! scheduler decides, for every move, the exact execution cycle and the exact
//! interconnect resources it uses, respecting connectivity, operation
//! latencies, guarded execution and immediate-encoding limits.
//!
//! # Primary Usage
//!
//! ```ignore
//! use ttasched::machine::{Machine, ControlUnit};
//! use ttasched::program::Procedure;
//! use ttasched::scheduler::{ScratchPool, SequentialScheduler};
//!
//! // Describe the target, then schedule a procedure against it.
//! let machine: Machine = build_target();
//! let scheduler = SequentialScheduler::new(&machine, ScratchPool::empty());
//! scheduler.handle_procedure(&mut procedure)?;
//! ```
//!
//! # Architecture
//!
//! - [`machine`] - Target machine description (units, files, buses, sockets)
//! - [`program`] - Moves, instructions, basic blocks, procedures
//! - [`scheduler`] - The scheduling machinery and the sequential engine

pub mod machine;
pub mod program;
pub mod scheduler;

// Re-export common types from organized modules
pub use machine::{ControlUnit, Machine, SocketEndpoint};
pub use program::{
    BasicBlock, GuardSource, Instruction, Move, MoveAnnotation, MoveGuard, MoveKind, Procedure,
    Terminal,
};
pub use scheduler::{
    MoveNodeArena, MoveNodeGroup, MoveNodeId, MoveNodeSelector, ProgramOperation,
    RegisterCopyAdder, ScheduleError, ScheduleResult, ScratchPool, SequentialMoveNodeSelector,
    SequentialScheduler, SimpleResourceManager,
};
