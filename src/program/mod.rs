//! Program representation.
//!
//! The data the scheduler operates on: terminals and moves (with guards and
//! annotations), instructions, basic blocks and procedures. Everything here
//! is target-relative (terminals name machine resources by index) but
//! carries no scheduling state; that lives in the scheduler's node arena.

pub mod code;
pub mod moves;
pub mod terminal;

pub use code::{BasicBlock, Instruction, Procedure};
pub use moves::{GuardSource, Move, MoveAnnotation, MoveGuard, MoveKind};
pub use terminal::Terminal;
