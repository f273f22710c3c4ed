//! Instructions, basic blocks and procedures.
//!
//! An instruction is the set of moves issued in one cycle (sequential input
//! code carries one move per instruction; a scheduled stream may carry
//! several, or none for an idle cycle). A basic block is an ordered
//! instruction sequence scheduled as one unit. A procedure is the enclosing
//! instruction stream plus the set of instruction indices that are referenced
//! as control-flow targets.

use hashbrown::HashSet;

use crate::program::moves::Move;

/// The moves issued in one cycle.
#[derive(Debug, Clone, Default)]
pub struct Instruction {
    moves: Vec<Move>,
}

impl Instruction {
    pub fn new() -> Self {
        Self { moves: Vec::new() }
    }

    /// Convenience constructor for sequential one-move instructions.
    pub fn from_move(mv: Move) -> Self {
        Self { moves: vec![mv] }
    }

    pub fn add_move(&mut self, mv: Move) {
        self.moves.push(mv);
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn move_count(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Whether any move of this instruction transfers control.
    pub fn has_control_flow_move(&self) -> bool {
        self.moves.iter().any(Move::is_control_flow)
    }
}

/// An ordered instruction sequence scheduled as one unit.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    instructions: Vec<Instruction>,
}

impl BasicBlock {
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
        }
    }

    pub fn add_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn instruction_at(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Drop all instructions; used before writing a schedule back.
    pub fn clear(&mut self) {
        self.instructions.clear();
    }
}

/// A procedure: its instruction stream and the indices of instructions that
/// control flow elsewhere refers to (jump targets, entry points).
#[derive(Debug, Clone)]
pub struct Procedure {
    name: String,
    instructions: Vec<Instruction>,
    references: HashSet<usize>,
}

impl Procedure {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instructions: Vec::new(),
            references: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_instruction(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    pub fn instruction_at(&self, index: usize) -> &Instruction {
        &self.instructions[index]
    }

    /// Mark the instruction at `index` as a control-flow target.
    pub fn add_reference(&mut self, index: usize) {
        self.references.insert(index);
    }

    pub fn has_reference(&self, index: usize) -> bool {
        self.references.contains(&index)
    }

    pub fn references(&self) -> &HashSet<usize> {
        &self.references
    }

    /// Replace the whole instruction stream and reference set, as done when
    /// scheduled basic blocks are copied back.
    pub fn replace_instructions(
        &mut self,
        instructions: Vec<Instruction>,
        references: HashSet<usize>,
    ) {
        self.instructions = instructions;
        self.references = references;
    }
}
