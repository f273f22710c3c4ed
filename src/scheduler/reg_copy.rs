// This module repairs missing connectivity. When an operation's operand or
// result terminal has no direct bus path to its counterpart, the register
// copy adder routes the transport through a reserved scratch register:
// planning picks, per affected move, the first scratch register reachable
// from the source and able to reach the destination; materialization splices
// the extra leg in as a new move node and repoints the original move at the
// scratch register. Exactly one extra move per missing connection, input-side
// copies strictly before the original, output-side copies strictly after. A
// machine where no scratch register bridges the gap is invalid for the
// program and surfaces as NoConnectivity. Planning is pure so the same
// operation on the same machine always yields the same fixups.

//! Temporary register copies for unconnected terminal pairs.

use hashbrown::HashMap;
use log::debug;

use crate::machine::{Machine, RfIndex, SocketEndpoint};
use crate::program::{Move, Terminal};
use crate::scheduler::error::{ScheduleError, ScheduleResult};
use crate::scheduler::move_node::{MoveNode, MoveNodeArena, MoveNodeId};
use crate::scheduler::operation::ProgramOperation;

/// Registers reserved for connectivity fixups, supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ScratchPool {
    registers: Vec<(RfIndex, u16)>,
}

impl ScratchPool {
    pub fn new(registers: Vec<(RfIndex, u16)>) -> Self {
        Self { registers }
    }

    /// A pool with nothing in it; fine for fully connected machines.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn registers(&self) -> &[(RfIndex, u16)] {
        &self.registers
    }
}

/// Which side of the original move a planned copy lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySide {
    /// Copy executed strictly before the original operand write.
    Input,
    /// Copy executed strictly after the original result read.
    Output,
}

/// One planned fixup: route `node`'s transport through `scratch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyPlan {
    pub node: MoveNodeId,
    pub side: CopySide,
    pub scratch: (RfIndex, u16),
}

/// The helper nodes materialized for one original node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyPair {
    pub input_copy: Option<MoveNodeId>,
    pub output_copy: Option<MoveNodeId>,
}

/// All fixups materialized for one operation execution.
#[derive(Debug, Clone, Default)]
pub struct AddedRegisterCopies {
    copies: HashMap<MoveNodeId, CopyPair>,
    count: usize,
}

impl AddedRegisterCopies {
    /// Total number of helper moves added.
    pub fn count(&self) -> usize {
        self.count
    }

    /// The helper pair for an original node, if it needed one.
    pub fn pair_for(&self, node: MoveNodeId) -> Option<&CopyPair> {
        self.copies.get(&node)
    }
}

/// Computes and materializes the minimal register copies an operation needs.
pub struct RegisterCopyAdder<'a> {
    machine: &'a Machine,
    scratch: &'a ScratchPool,
}

impl<'a> RegisterCopyAdder<'a> {
    pub fn new(machine: &'a Machine, scratch: &'a ScratchPool) -> Self {
        Self { machine, scratch }
    }

    /// Pure planning: which moves of the operation need a scratch leg and
    /// through which register. Deterministic for an unmodified machine.
    pub fn plan_copies(
        &self,
        operation: &ProgramOperation,
        arena: &MoveNodeArena,
    ) -> ScheduleResult<Vec<CopyPlan>> {
        let mut plans = Vec::new();
        for &id in operation.inputs() {
            self.plan_for_node(id, CopySide::Input, arena, &mut plans)?;
        }
        for &id in operation.outputs() {
            self.plan_for_node(id, CopySide::Output, arena, &mut plans)?;
        }
        Ok(plans)
    }

    /// Plan and splice in the copies: each fixup adds one new node and
    /// repoints the original move at its scratch register.
    pub fn add_minimum_register_copies(
        &self,
        operation: &ProgramOperation,
        arena: &mut MoveNodeArena,
    ) -> ScheduleResult<AddedRegisterCopies> {
        let plans = self.plan_copies(operation, arena)?;
        let mut added = AddedRegisterCopies::default();

        for plan in plans {
            let scratch = Terminal::register(plan.scratch.0, plan.scratch.1);
            let original = arena.node(plan.node).transport().clone();
            let copy_id = match plan.side {
                CopySide::Input => {
                    let mut leg = Move::new(original.source().clone(), scratch.clone());
                    if let Some(guard) = original.guard() {
                        leg = leg.with_guard(*guard);
                    }
                    let copy_id = arena.add(MoveNode::new(leg));
                    arena.node_mut(plan.node).transport_mut().set_source(scratch);
                    added.copies.entry(plan.node).or_default().input_copy = Some(copy_id);
                    copy_id
                }
                CopySide::Output => {
                    let mut leg = Move::new(scratch.clone(), original.destination().clone());
                    if let Some(guard) = original.guard() {
                        leg = leg.with_guard(*guard);
                    }
                    let copy_id = arena.add(MoveNode::new(leg));
                    arena
                        .node_mut(plan.node)
                        .transport_mut()
                        .set_destination(scratch);
                    added.copies.entry(plan.node).or_default().output_copy = Some(copy_id);
                    copy_id
                }
            };
            added.count += 1;
            debug!(
                "added register copy '{}' for '{}'",
                arena.node(copy_id),
                arena.node(plan.node).transport()
            );
        }
        Ok(added)
    }

    fn plan_for_node(
        &self,
        id: MoveNodeId,
        side: CopySide,
        arena: &MoveNodeArena,
        plans: &mut Vec<CopyPlan>,
    ) -> ScheduleResult<()> {
        let transport = arena.node(id).transport();
        // Constants travel on buses; immediate encoding is the resource
        // manager's concern, not a connectivity fixup.
        if transport.source().is_immediate() {
            return Ok(());
        }
        let (Some(src), Some(dst)) = (
            transport.source().endpoint(),
            transport.destination().endpoint(),
        ) else {
            return Ok(());
        };
        if self.machine.connects(src, dst) {
            return Ok(());
        }
        let scratch = self.find_scratch(src, dst).ok_or_else(|| {
            ScheduleError::NoConnectivity {
                from: transport.source().to_string(),
                destination: transport.destination().to_string(),
            }
        })?;
        plans.push(CopyPlan {
            node: id,
            side,
            scratch,
        });
        Ok(())
    }

    /// First scratch register reachable from `src` and able to reach `dst`.
    fn find_scratch(&self, src: SocketEndpoint, dst: SocketEndpoint) -> Option<(RfIndex, u16)> {
        self.scratch.registers().iter().copied().find(|&(rf, _)| {
            let bridge = SocketEndpoint::RegisterFile(rf);
            self.machine.connects(src, bridge) && self.machine.connects(bridge, dst)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Bus, ControlUnit, FuOperation, FunctionUnit, RegisterFile};
    use crate::program::{BasicBlock, Instruction};
    use crate::scheduler::operation::prepare_block;

    /// rf0 has no path to the ALU; rf1 bridges: rf0 -> b0 -> rf1 -> b1 -> alu.
    /// The ALU output reaches rf1 and rf0 directly over b2.
    fn bridged_machine() -> Machine {
        let mut machine = Machine::new("m", ControlUnit::new(0));
        let rf0 = machine.add_register_file(RegisterFile::new("int", 8, 0));
        let rf1 = machine.add_register_file(RegisterFile::new("bridge", 2, 0));
        let mut alu = FunctionUnit::new("alu");
        let in1 = alu.add_port("in1", false);
        let in2 = alu.add_port("in2t", true);
        let out = alu.add_port("out1", false);
        alu.add_operation(FuOperation::new("add", 2, 1, 1));
        let fu = machine.add_function_unit(alu);

        let b0 = machine.add_bus(Bus::new("b0", 8, true));
        let b1 = machine.add_bus(Bus::new("b1", 8, true));
        let b2 = machine.add_bus(Bus::new("b2", 8, true));

        machine.connect_source(SocketEndpoint::RegisterFile(rf0), b0);
        machine.connect_destination(b0, SocketEndpoint::RegisterFile(rf1));
        machine.connect_source(SocketEndpoint::RegisterFile(rf1), b1);
        machine.connect_destination(b1, SocketEndpoint::FuPort(fu, in1));
        machine.connect_destination(b1, SocketEndpoint::FuPort(fu, in2));
        machine.connect_source(SocketEndpoint::FuPort(fu, out), b2);
        machine.connect_destination(b2, SocketEndpoint::RegisterFile(rf0));
        machine.connect_destination(b2, SocketEndpoint::RegisterFile(rf1));
        // rf1 can feed itself for operand staging.
        machine.connect_destination(b1, SocketEndpoint::RegisterFile(rf1));
        machine
    }

    fn add_operation_block() -> BasicBlock {
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
    fn test_unconnected_operands_get_input_copies() {
        let machine = bridged_machine();
        let pool = ScratchPool::new(vec![(1, 0), (1, 1)]);
        let (mut arena, operations, _) = prepare_block(&add_operation_block(), &machine).unwrap();

        let adder = RegisterCopyAdder::new(&machine, &pool);
        let added = adder
            .add_minimum_register_copies(&operations[0], &mut arena)
            .unwrap();

        // Both operand writes need a leg through rf1; the result is direct.
        assert_eq!(added.count(), 2);
        for &input in operations[0].inputs() {
            let pair = added.pair_for(input).unwrap();
            let copy = pair.input_copy.unwrap();
            assert!(pair.output_copy.is_none());
            // The original now reads from the scratch register.
            assert_eq!(
                arena.node(input).transport().source(),
                arena.node(copy).transport().destination()
            );
        }
        assert!(added.pair_for(operations[0].outputs()[0]).is_none());
    }

    #[test]
    fn test_connected_operation_needs_no_copies() {
        let machine = bridged_machine();
        let pool = ScratchPool::new(vec![(1, 0)]);
        let mut bb = BasicBlock::new();
        // Source directly connected: rf1 -> alu ports.
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(1, 0),
            Terminal::fu_operation_port(0, 0, "add"),
        )));
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(1, 1),
            Terminal::fu_operation_port(0, 1, "add"),
        )));
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::fu_operation_port(0, 2, "add"),
            Terminal::register(0, 2),
        )));
        let (mut arena, operations, _) = prepare_block(&bb, &machine).unwrap();

        let adder = RegisterCopyAdder::new(&machine, &pool);
        let added = adder
            .add_minimum_register_copies(&operations[0], &mut arena)
            .unwrap();
        assert_eq!(added.count(), 0);
    }

    #[test]
    fn test_planning_is_idempotent() {
        let machine = bridged_machine();
        let pool = ScratchPool::new(vec![(1, 0), (1, 1)]);
        let (arena, operations, _) = prepare_block(&add_operation_block(), &machine).unwrap();

        let adder = RegisterCopyAdder::new(&machine, &pool);
        let first = adder.plan_copies(&operations[0], &arena).unwrap();
        let second = adder.plan_copies(&operations[0], &arena).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|plan| plan.side == CopySide::Input));
    }

    #[test]
    fn test_no_scratch_register_is_no_connectivity() {
        let machine = bridged_machine();
        let pool = ScratchPool::empty();
        let (arena, operations, _) = prepare_block(&add_operation_block(), &machine).unwrap();

        let adder = RegisterCopyAdder::new(&machine, &pool);
        let err = adder.plan_copies(&operations[0], &arena).unwrap_err();
        assert!(matches!(err, ScheduleError::NoConnectivity { .. }));
    }

    #[test]
    fn test_immediate_sources_are_skipped() {
        let machine = bridged_machine();
        let pool = ScratchPool::new(vec![(1, 0)]);
        let mut bb = BasicBlock::new();
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::Immediate(3),
            Terminal::fu_operation_port(0, 0, "add"),
        )));
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::register(1, 0),
            Terminal::fu_operation_port(0, 1, "add"),
        )));
        bb.add_instruction(Instruction::from_move(Move::new(
            Terminal::fu_operation_port(0, 2, "add"),
            Terminal::register(0, 2),
        )));
        let (arena, operations, _) = prepare_block(&bb, &machine).unwrap();

        let adder = RegisterCopyAdder::new(&machine, &pool);
        let plans = adder.plan_copies(&operations[0], &arena).unwrap();
        assert!(plans.is_empty());
    }
}
