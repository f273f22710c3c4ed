// This module groups moves into operation executions. A ProgramOperation
// identifies one dynamic execution of a function-unit operation and holds the
// ids of its operand-write and result-read nodes in program order, plus the
// operation's latency from the unit's table. A MoveNodeGroup is the fixed,
// ordered unit the scheduler commits atomically: all members scheduled or the
// group does not count as scheduled. prepare_block builds the arena, the
// operations and the group sequence for one basic block by associating
// opcode-bound port accesses: operand writes collect into the pending
// execution for their (unit, opcode) pair, result reads attach to it, and the
// group is emitted once the operation's full move set has been seen.

//! Operation executions and atomic move groups.

use hashbrown::HashMap;

use crate::machine::{FuIndex, Machine};
use crate::program::BasicBlock;
use crate::scheduler::error::{ScheduleError, ScheduleResult};
use crate::scheduler::move_node::{MoveNode, MoveNodeArena, MoveNodeId};

/// Stable index of an operation execution within one block run.
pub type OperationId = usize;

/// One dynamic execution of a function-unit operation.
#[derive(Debug, Clone)]
pub struct ProgramOperation {
    fu: FuIndex,
    opcode: String,
    latency: u32,
    operand_count: usize,
    result_count: usize,
    inputs: Vec<MoveNodeId>,
    outputs: Vec<MoveNodeId>,
}

impl ProgramOperation {
    fn new(fu: FuIndex, opcode: &str, operand_count: usize, result_count: usize, latency: u32) -> Self {
        Self {
            fu,
            opcode: opcode.to_string(),
            latency,
            operand_count,
            result_count,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn fu(&self) -> FuIndex {
        self.fu
    }

    pub fn opcode(&self) -> &str {
        &self.opcode
    }

    pub fn latency(&self) -> u32 {
        self.latency
    }

    /// Number of operand writes this execution requires.
    pub fn input_move_count(&self) -> usize {
        self.operand_count
    }

    pub fn inputs(&self) -> &[MoveNodeId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[MoveNodeId] {
        &self.outputs
    }

    /// How many operand writes are committed right now.
    pub fn scheduled_input_count(&self, arena: &MoveNodeArena) -> usize {
        self.inputs
            .iter()
            .filter(|&&id| arena.node(id).is_scheduled())
            .count()
    }

    /// The operand write landing on the unit's triggering port.
    pub fn trigger(&self, arena: &MoveNodeArena, machine: &Machine) -> Option<MoveNodeId> {
        self.inputs
            .iter()
            .copied()
            .find(|&id| arena.node(id).transport().destination().is_triggering(machine))
    }

    /// First cycle a result may be read: trigger cycle plus the operation's
    /// latency. `None` until the trigger is committed.
    pub fn earliest_result_read_cycle(
        &self,
        arena: &MoveNodeArena,
        machine: &Machine,
    ) -> Option<u32> {
        let trigger = self.trigger(arena, machine)?;
        let cycle = arena.node(trigger).cycle()?;
        Some(cycle + self.latency)
    }

    fn is_complete(&self) -> bool {
        self.inputs.len() == self.operand_count && self.outputs.len() == self.result_count
    }
}

/// The fixed, ordered set of nodes scheduled as one atomic unit.
#[derive(Debug, Clone)]
pub struct MoveNodeGroup {
    nodes: Vec<MoveNodeId>,
}

impl MoveNodeGroup {
    pub fn new(nodes: Vec<MoveNodeId>) -> Self {
        Self { nodes }
    }

    /// The empty group; the selector's end-of-work signal.
    pub fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, index: usize) -> MoveNodeId {
        self.nodes[index]
    }

    pub fn nodes(&self) -> &[MoveNodeId] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True iff every member node is scheduled.
    pub fn is_scheduled(&self, arena: &MoveNodeArena) -> bool {
        self.nodes.iter().all(|&id| arena.node(id).is_scheduled())
    }

    /// Human-readable member listing for error messages.
    pub fn describe(&self, arena: &MoveNodeArena) -> String {
        let parts: Vec<String> = self
            .nodes
            .iter()
            .map(|&id| arena.node(id).to_string())
            .collect();
        parts.join("; ")
    }
}

/// Builds the node arena, operation executions and the group sequence for one
/// basic block.
///
/// Groups come out in the order their final member appears in the block, so
/// a selector yielding them in sequence preserves the program's data order.
pub fn prepare_block(
    bb: &BasicBlock,
    machine: &Machine,
) -> ScheduleResult<(MoveNodeArena, Vec<ProgramOperation>, Vec<MoveNodeGroup>)> {
    let mut arena = MoveNodeArena::new();
    let mut operations: Vec<ProgramOperation> = Vec::new();
    let mut pending: HashMap<(FuIndex, String), OperationId> = HashMap::new();
    let mut emitted: Vec<(usize, MoveNodeGroup)> = Vec::new();

    let mut position = 0usize;
    for instruction in bb.instructions() {
        for mv in instruction.moves() {
            let operand_key = match mv.destination() {
                t if t.is_fu_port() => t.opcode().map(|op| (fu_of(t), op.to_string())),
                _ => None,
            };
            let result_key = match mv.source() {
                t if t.is_fu_port() => t.opcode().map(|op| (fu_of(t), op.to_string())),
                _ => None,
            };
            if operand_key.is_some() && result_key.is_some() {
                return Err(ScheduleError::InvalidState {
                    reason: format!(
                        "move '{}' is both an operand write and a result read; \
                         chained operation moves are not sequential code",
                        mv
                    ),
                });
            }

            let id = arena.add(MoveNode::new(mv.clone()));

            if let Some((fu, opcode)) = operand_key {
                let op_id = pending_operation(
                    &mut pending,
                    &mut operations,
                    machine,
                    fu,
                    &opcode,
                )?;
                operations[op_id].inputs.push(id);
                if operations[op_id].inputs.len() > operations[op_id].operand_count {
                    return Err(ScheduleError::InvalidState {
                        reason: format!(
                            "too many operand writes for operation '{}' on fu{}",
                            opcode, fu
                        ),
                    });
                }
                arena.node_mut(id).attach_to_destination_operation(op_id);
                finish_if_complete(&mut pending, &operations, op_id, position, &mut emitted);
            } else if let Some((fu, opcode)) = result_key {
                let op_id = *pending.get(&(fu, opcode.clone())).ok_or_else(|| {
                    ScheduleError::InvalidState {
                        reason: format!(
                            "result read of '{}' on fu{} before its operand writes",
                            opcode, fu
                        ),
                    }
                })?;
                operations[op_id].outputs.push(id);
                if operations[op_id].outputs.len() > operations[op_id].result_count {
                    return Err(ScheduleError::InvalidState {
                        reason: format!(
                            "too many result reads for operation '{}' on fu{}",
                            opcode, fu
                        ),
                    });
                }
                arena.node_mut(id).attach_to_source_operation(op_id);
                finish_if_complete(&mut pending, &operations, op_id, position, &mut emitted);
            } else {
                emitted.push((position, MoveNodeGroup::new(vec![id])));
            }
            position += 1;
        }
    }

    if let Some((&(fu, ref opcode), _)) = pending.iter().next() {
        return Err(ScheduleError::InvalidState {
            reason: format!(
                "operation '{}' on fu{} is missing operand or result moves",
                opcode, fu
            ),
        });
    }

    emitted.sort_by_key(|(pos, _)| *pos);
    let groups = emitted.into_iter().map(|(_, group)| group).collect();
    Ok((arena, operations, groups))
}

fn fu_of(terminal: &crate::program::Terminal) -> FuIndex {
    match terminal {
        crate::program::Terminal::FuPort { fu, .. } => *fu,
        _ => unreachable!("checked is_fu_port before"),
    }
}

fn pending_operation(
    pending: &mut HashMap<(FuIndex, String), OperationId>,
    operations: &mut Vec<ProgramOperation>,
    machine: &Machine,
    fu: FuIndex,
    opcode: &str,
) -> ScheduleResult<OperationId> {
    if let Some(&op_id) = pending.get(&(fu, opcode.to_string())) {
        return Ok(op_id);
    }
    let entry = machine.function_unit(fu).operation(opcode).ok_or_else(|| {
        ScheduleError::InvalidState {
            reason: format!(
                "fu{} ('{}') does not implement operation '{}'",
                fu,
                machine.function_unit(fu).name(),
                opcode
            ),
        }
    })?;
    let op_id = operations.len();
    operations.push(ProgramOperation::new(
        fu,
        opcode,
        entry.operand_count(),
        entry.result_count(),
        entry.latency(),
    ));
    pending.insert((fu, opcode.to_string()), op_id);
    Ok(op_id)
}

fn finish_if_complete(
    pending: &mut HashMap<(FuIndex, String), OperationId>,
    operations: &[ProgramOperation],
    op_id: OperationId,
    position: usize,
    emitted: &mut Vec<(usize, MoveNodeGroup)>,
) {
    let op = &operations[op_id];
    if op.is_complete() {
        let mut members = op.inputs.clone();
        members.extend_from_slice(&op.outputs);
        emitted.push((position, MoveNodeGroup::new(members)));
        pending.remove(&(op.fu, op.opcode.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Bus, ControlUnit, FuOperation, FunctionUnit, RegisterFile};
    use crate::program::{Instruction, Move, Terminal};

    fn alu_machine() -> Machine {
        let mut machine = Machine::new("m", ControlUnit::new(0));
        machine.add_register_file(RegisterFile::new("int", 8, 0));
        let mut alu = FunctionUnit::new("alu");
        alu.add_port("in1", false);
        alu.add_port("in2t", true);
        alu.add_port("out1", false);
        alu.add_operation(FuOperation::new("add", 2, 1, 1));
        machine.add_function_unit(alu);
        machine.add_bus(Bus::new("b0", 32, true));
        machine
    }

    fn add_block() -> BasicBlock {
        let mut bb = BasicBlock::new();
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 0),
            Terminal::fu_operation_port(0, 0, "add"),
        )));
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 1),
            Terminal::fu_operation_port(0, 1, "add"),
        )));
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::fu_operation_port(0, 2, "add"),
            Terminal::register(0, 2),
        )));
        bb
    }

    #[test]
    fn test_operation_association() {
        let machine = alu_machine();
        let (arena, operations, groups) = prepare_block(&add_block(), &machine).unwrap();

        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].input_move_count(), 2);
        assert_eq!(operations[0].outputs().len(), 1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].node_count(), 3);

        // Inputs first in program order, then outputs.
        assert!(arena.node(groups[0].node(0)).is_destination_operation());
        assert!(arena.node(groups[0].node(1)).is_destination_operation());
        assert!(arena.node(groups[0].node(2)).is_source_operation());
    }

    #[test]
    fn test_trigger_identification() {
        let machine = alu_machine();
        let (arena, operations, _) = prepare_block(&add_block(), &machine).unwrap();

        let trigger = operations[0].trigger(&arena, &machine).unwrap();
        // The second operand write lands on port 1, the triggering port.
        assert_eq!(trigger, 1);
    }

    #[test]
    fn test_standalone_moves_form_singleton_groups() {
        let machine = alu_machine();
        let mut bb = BasicBlock::new();
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 0),
            Terminal::register(0, 1),
        )));
        let (arena, operations, groups) = prepare_block(&bb, &machine).unwrap();

        assert!(operations.is_empty());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].node_count(), 1);
        assert!(!arena.node(groups[0].node(0)).is_operation_move());
    }

    #[test]
    fn test_group_order_follows_completion() {
        let machine = alu_machine();
        let mut bb = BasicBlock::new();
        // Standalone move, then a full operation, then another standalone.
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 3),
            Terminal::register(0, 4),
        )));
        for ins in add_block().instructions() {
            bb.add_instruction(ins.clone());
        }
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 2),
            Terminal::register(0, 5),
        )));

        let (_, _, groups) = prepare_block(&bb, &machine).unwrap();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].node_count(), 1);
        assert_eq!(groups[1].node_count(), 3);
        assert_eq!(groups[2].node_count(), 1);
    }

    #[test]
    fn test_incomplete_operation_is_rejected() {
        let machine = alu_machine();
        let mut bb = BasicBlock::new();
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 0),
            Terminal::fu_operation_port(0, 0, "add"),
        )));
        let err = prepare_block(&bb, &machine).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidState { .. }));
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        let machine = alu_machine();
        let mut bb = BasicBlock::new();
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(0, 0),
            Terminal::fu_operation_port(0, 1, "div"),
        )));
        let err = prepare_block(&bb, &machine).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidState { .. }));
    }

    #[test]
    fn test_group_is_scheduled_requires_all_members() {
        let machine = alu_machine();
        let (mut arena, _, groups) = prepare_block(&add_block(), &machine).unwrap();
        let group = &groups[0];

        assert!(!group.is_scheduled(&arena));
        arena.node_mut(group.node(0)).set_scheduled(0);
        arena.node_mut(group.node(1)).set_scheduled(1);
        assert!(!group.is_scheduled(&arena));
        arena.node_mut(group.node(2)).set_scheduled(3);
        assert!(group.is_scheduled(&arena));
    }
}
