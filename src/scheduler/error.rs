// This module defines error types for the scheduler using the thiserror crate
// for idiomatic Rust error handling. ScheduleError covers the failure
// scenarios of a block scheduling attempt: resource conflicts on commit
// (invariant violations caught by the defensive re-check), moves for which no
// feasible cycle exists, constants that need a long-immediate path the target
// does not provide, operand/result terminals with no interconnect route at
// all (an invalid target machine), and internal state violations such as
// scheduling an already-scheduled move. Each variant carries the offending
// move's description or a reason string. ScheduleResult<T> is the convenience
// alias used throughout the scheduler. Exploratory queries (earliest-cycle
// searches) are not errors and return Option instead.

//! Error types for the scheduler.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for a block scheduling attempt.
///
/// Every variant is fatal for the enclosing basic block; none is retried.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// An assign's preconditions no longer held at commit time. This is a
    /// programming-invariant violation, not a schedulable condition.
    #[error("resource conflict: {reason}")]
    ResourceConflict { reason: String },

    /// No feasible cycle exists for the move within the search horizon.
    #[error("assignment of move '{move_desc}' failed: no feasible cycle")]
    AssignmentFailed { move_desc: String },

    /// The move needs a long-immediate path the target does not provide.
    #[error(
        "assignment of move '{move_desc}' failed: most likely the target is \
         missing a long immediate unit or instruction template"
    )]
    MissingLongImmediateUnit { move_desc: String },

    /// No interconnect route exists between an operation's terminal pair,
    /// even through a temporary register. The target machine is invalid for
    /// this program.
    #[error("no connectivity from '{from}' to '{destination}' on the target machine")]
    NoConnectivity { from: String, destination: String },

    /// An internal logic bug: a move in the wrong state for the requested
    /// transition.
    #[error("invalid scheduler state: {reason}")]
    InvalidState { reason: String },
}

/// Result type alias for scheduling operations.
pub type ScheduleResult<T> = Result<T, ScheduleError>;
