// This module drives scheduling. The sequential scheduler walks a procedure
// one basic block at a time; within a block it pulls candidate groups from
// the selector and commits them in order against a fresh resource manager.
// Operation groups are scheduled operand writes first (each preceded by its
// temporary-register leg when connectivity demanded one), with the triggering
// write withheld until every other operand is committed, then result reads no
// earlier than the trigger cycle plus the operation latency, each followed by
// its output-side temporary leg. Guarded moves have their lower bound pushed
// past the guard pipeline latency, and constant sources that cannot travel
// inline are flagged for long-immediate conversion before the cycle query.
// Every failure aborts the block's attempt; only a fully scheduled block is
// written back, cycle by cycle, into its instruction stream.

//! The sequential basic-block scheduler.

use hashbrown::HashSet;
use log::debug;

use crate::machine::Machine;
use crate::program::{BasicBlock, GuardSource, Instruction, MoveAnnotation, Procedure};
use crate::scheduler::error::{ScheduleError, ScheduleResult};
use crate::scheduler::move_node::{MoveNodeArena, MoveNodeId};
use crate::scheduler::operation::{prepare_block, MoveNodeGroup, OperationId, ProgramOperation};
use crate::scheduler::reg_copy::{AddedRegisterCopies, RegisterCopyAdder, ScratchPool};
use crate::scheduler::resources::SimpleResourceManager;
use crate::scheduler::selector::{MoveNodeSelector, SequentialMoveNodeSelector};

/// Schedules procedures and basic blocks for one target machine.
pub struct SequentialScheduler<'m> {
    machine: &'m Machine,
    scratch: ScratchPool,
}

impl<'m> SequentialScheduler<'m> {
    pub fn new(machine: &'m Machine, scratch: ScratchPool) -> Self {
        Self { machine, scratch }
    }

    /// Schedule a whole procedure in place: split it into basic blocks,
    /// schedule each independently, and reassemble the instruction stream
    /// with its control-flow references remapped to the new block starts.
    pub fn handle_procedure(&self, procedure: &mut Procedure) -> ScheduleResult<()> {
        debug!("scheduling procedure '{}'", procedure.name());
        let mut blocks = create_basic_blocks(procedure);
        for (block, _) in blocks.iter_mut() {
            self.handle_basic_block(block)?;
        }
        copy_basic_blocks_to_procedure(procedure, blocks);
        Ok(())
    }

    /// Schedule a single basic block in place.
    pub fn handle_basic_block(&self, bb: &mut BasicBlock) -> ScheduleResult<()> {
        if bb.instruction_count() == 0 {
            return Ok(());
        }
        debug!(
            "scheduling basic block of {} instructions",
            bb.instruction_count()
        );

        let (arena, operations, groups) = prepare_block(bb, self.machine)?;
        let mut run = BlockRun {
            machine: self.machine,
            scratch: &self.scratch,
            rm: SimpleResourceManager::new(self.machine),
            arena,
            operations,
        };
        let mut selector = SequentialMoveNodeSelector::new(groups);

        let mut cycle: u32 = 0;
        let mut group = selector.candidates();
        while !group.is_empty() {
            let first = group.node(0);
            if run.arena.node(first).is_operation_move() {
                cycle = run.schedule_operation(&group, cycle)? + 1;
            } else {
                cycle = run.schedule_move(cycle, first)? + 1;
            }

            if !group.is_scheduled(&run.arena) {
                return Err(ScheduleError::InvalidState {
                    reason: format!(
                        "move(s) did not get scheduled: {}",
                        group.describe(&run.arena)
                    ),
                });
            }

            for index in 0..group.node_count() {
                selector.notify_scheduled(group.node(index));
            }
            group = selector.candidates();
        }

        run.write_back(bb);
        Ok(())
    }
}

/// Mutable state of one block scheduling run.
struct BlockRun<'a> {
    machine: &'a Machine,
    scratch: &'a ScratchPool,
    rm: SimpleResourceManager<'a>,
    arena: MoveNodeArena,
    operations: Vec<ProgramOperation>,
}

impl<'a> BlockRun<'a> {
    /// Schedule all moves of one operation execution. Returns the last cycle
    /// the operation occupies.
    fn schedule_operation(
        &mut self,
        group: &MoveNodeGroup,
        earliest_cycle: u32,
    ) -> ScheduleResult<u32> {
        let first = self.arena.node(group.node(0));
        let op_id = first
            .destination_operation()
            .or_else(|| first.source_operation())
            .ok_or_else(|| ScheduleError::InvalidState {
                reason: format!(
                    "group leader '{}' belongs to no operation",
                    first.transport()
                ),
            })?;
        debug!(
            "scheduling operation '{}' on fu{} from cycle {}",
            self.operations[op_id].opcode(),
            self.operations[op_id].fu(),
            earliest_cycle
        );

        let adder = RegisterCopyAdder::new(self.machine, self.scratch);
        let copies = adder.add_minimum_register_copies(&self.operations[op_id], &mut self.arena)?;

        let trigger_cycle = self.schedule_operand_writes(earliest_cycle, group, &copies, op_id)?;
        self.schedule_result_reads(trigger_cycle + 1, group, &copies, op_id)
    }

    /// Schedule the operand writes of an operation execution, withholding the
    /// triggering write until every other operand is committed. Returns the
    /// trigger's cycle.
    fn schedule_operand_writes(
        &mut self,
        cycle: u32,
        group: &MoveNodeGroup,
        copies: &AddedRegisterCopies,
        op_id: OperationId,
    ) -> ScheduleResult<u32> {
        let input_count = self.operations[op_id].input_move_count();
        let mut cycle = cycle;
        let mut trigger: Option<MoveNodeId> = None;

        for index in 0..group.node_count() {
            let id = group.node(index);
            // Result reads wait for the second phase.
            if !self.arena.node(id).is_destination_operation() {
                continue;
            }

            cycle = self.schedule_input_operand_temp_moves(cycle, id, copies)?;
            self.schedule_move(cycle, id)?;

            let is_trigger = self
                .arena
                .node(id)
                .transport()
                .destination()
                .is_triggering(self.machine);
            if is_trigger
                && self.operations[op_id].scheduled_input_count(&self.arena) < input_count
            {
                // Writing the trigger starts execution; every other operand
                // must land first.
                debug!(
                    "delaying trigger '{}' until remaining operands commit",
                    self.arena.node(id).transport()
                );
                trigger = Some(id);
                self.unschedule(id)?;
                continue;
            }

            let committed = self.arena.node(id).cycle().ok_or_else(|| {
                ScheduleError::InvalidState {
                    reason: format!(
                        "move '{}' lost its cycle after assignment",
                        self.arena.node(id).transport()
                    ),
                }
            })?;
            cycle = committed + 1;
        }

        if let Some(id) = trigger {
            if !self.arena.node(id).is_scheduled() {
                debug_assert_eq!(
                    self.operations[op_id].scheduled_input_count(&self.arena),
                    input_count - 1
                );
                return self.schedule_move(cycle, id);
            }
        }
        Ok(cycle - 1)
    }

    /// Schedule the result reads of an operation execution, each no earlier
    /// than the operation's latency allows. Returns the last occupied cycle.
    fn schedule_result_reads(
        &mut self,
        cycle: u32,
        group: &MoveNodeGroup,
        copies: &AddedRegisterCopies,
        op_id: OperationId,
    ) -> ScheduleResult<u32> {
        let mut cycle = cycle;
        for index in 0..group.node_count() {
            let id = group.node(index);
            if self.arena.node(id).is_scheduled() {
                continue;
            }
            if !self.arena.node(id).is_source_operation() {
                return Err(ScheduleError::InvalidState {
                    reason: format!(
                        "move to schedule '{}' is not a result move",
                        self.arena.node(id).transport()
                    ),
                });
            }

            let ready = self.operations[op_id]
                .earliest_result_read_cycle(&self.arena, self.machine)
                .ok_or_else(|| ScheduleError::InvalidState {
                    reason: format!(
                        "result read of '{}' attempted before its trigger is scheduled",
                        self.operations[op_id].opcode()
                    ),
                })?;
            cycle = cycle.max(ready);
            cycle = self.schedule_move(cycle, id)? + 1;
            cycle = self.schedule_result_temp_moves(cycle, id, copies)?;
        }
        Ok(cycle - 1)
    }

    /// Schedule the temporary-register leg preceding an operand write, if the
    /// register copy adder inserted one.
    fn schedule_input_operand_temp_moves(
        &mut self,
        cycle: u32,
        operand: MoveNodeId,
        copies: &AddedRegisterCopies,
    ) -> ScheduleResult<u32> {
        let mut cycle = cycle;
        if copies.count() > 0 {
            if let Some(pair) = copies.pair_for(operand) {
                if let Some(copy) = pair.input_copy {
                    cycle = self.schedule_move(cycle, copy)? + 1;
                }
            }
        }
        Ok(cycle)
    }

    /// Schedule the temporary-register leg following a result read, if the
    /// register copy adder inserted one.
    fn schedule_result_temp_moves(
        &mut self,
        cycle: u32,
        result: MoveNodeId,
        copies: &AddedRegisterCopies,
    ) -> ScheduleResult<u32> {
        let mut cycle = cycle;
        if copies.count() > 0 {
            if let Some(pair) = copies.pair_for(result) {
                debug_assert!(pair.input_copy.is_none(), "no input-side copy for a result");
                if let Some(copy) = pair.output_copy {
                    cycle = self.schedule_move(cycle, copy)? + 1;
                }
            }
        }
        Ok(cycle)
    }

    /// Schedule a single move at the earliest feasible cycle at or after
    /// `earliest_cycle`, converting short immediates to long where needed.
    /// Returns the committed cycle.
    fn schedule_move(&mut self, earliest_cycle: u32, id: MoveNodeId) -> ScheduleResult<u32> {
        if self.arena.node(id).is_scheduled() {
            return Err(ScheduleError::InvalidState {
                reason: format!(
                    "move '{}' is already scheduled",
                    self.arena.node(id).transport()
                ),
            });
        }

        let mut earliest = earliest_cycle;

        // A conditional move cannot execute until its guard value has made
        // it through the guard pipeline.
        if let Some(guard) = self.arena.node(id).transport().guard() {
            let mut latency = self.machine.global_guard_latency();
            if let GuardSource::Register { rf, .. } = guard.source {
                latency += self.machine.register_file(rf).guard_latency();
            }
            earliest += latency;
        }

        let source_constant = self.arena.node(id).is_source_constant();
        if source_constant {
            let annotated = self
                .arena
                .node(id)
                .transport()
                .has_annotation(MoveAnnotation::RequiresLongImmediate);
            if !annotated {
                let needs_limm = if !self.rm.can_transport_immediate(self.arena.node(id)) {
                    true
                } else if !self.arena.node(id).is_destination_operation() {
                    // Some bus can carry the constant, but maybe none of
                    // those buses reaches this destination even on an
                    // otherwise empty cycle.
                    self.rm
                        .earliest_cycle(self.rm.largest_cycle() + 1, self.arena.node(id))
                        .is_none()
                } else {
                    false
                };
                if needs_limm {
                    let node = self.arena.node_mut(id);
                    node.transport_mut()
                        .set_annotation(MoveAnnotation::RequiresLongImmediate);
                    node.set_limm_added(true);
                    debug!(
                        "marked '{}' for long-immediate conversion",
                        self.arena.node(id).transport()
                    );
                }
            }

            // A constant return value that cannot travel inline is flagged so
            // the simulator still recognizes the return after conversion.
            if self.arena.node(id).transport().is_return()
                && !self.rm.can_transport_immediate(self.arena.node(id))
            {
                self.arena
                    .node_mut(id)
                    .transport_mut()
                    .set_annotation(MoveAnnotation::ProcedureReturnConstant);
            }
        }

        match self.rm.earliest_cycle(earliest, self.arena.node(id)) {
            Some(cycle) => {
                self.rm.assign(cycle, id, &mut self.arena)?;
                if !self.arena.node(id).is_scheduled() {
                    return Err(ScheduleError::InvalidState {
                        reason: format!(
                            "assignment of move '{}' did not stick",
                            self.arena.node(id).transport()
                        ),
                    });
                }
                Ok(cycle)
            }
            None => {
                let node = self.arena.node(id);
                if source_constant
                    && !node.is_destination_operation()
                    && node
                        .transport()
                        .has_annotation(MoveAnnotation::RequiresLongImmediate)
                {
                    Err(ScheduleError::MissingLongImmediateUnit {
                        move_desc: node.transport().to_string(),
                    })
                } else {
                    Err(ScheduleError::AssignmentFailed {
                        move_desc: node.transport().to_string(),
                    })
                }
            }
        }
    }

    /// Reverse a move's assignment, including a long-immediate annotation the
    /// scheduler itself attached during this placement.
    fn unschedule(&mut self, id: MoveNodeId) -> ScheduleResult<()> {
        if !self.arena.node(id).is_scheduled() {
            return Err(ScheduleError::InvalidState {
                reason: format!(
                    "trying to unschedule move '{}' which is not scheduled",
                    self.arena.node(id).transport()
                ),
            });
        }
        self.rm.unassign(id, &mut self.arena)?;
        if self.arena.node(id).limm_added() {
            let node = self.arena.node_mut(id);
            node.transport_mut()
                .remove_annotation(MoveAnnotation::RequiresLongImmediate);
            node.set_limm_added(false);
        }
        if self.arena.node(id).is_scheduled() || self.arena.node(id).is_placed() {
            return Err(ScheduleError::InvalidState {
                reason: format!(
                    "unscheduling of move '{}' failed",
                    self.arena.node(id).transport()
                ),
            });
        }
        Ok(())
    }

    /// Rebuild the block's instruction stream from the committed schedule,
    /// one instruction per cycle, idle cycles empty.
    fn write_back(&self, bb: &mut BasicBlock) {
        if self.rm.scheduled_move_count() == 0 {
            return;
        }
        bb.clear();
        for cycle in 0..=self.rm.largest_cycle() {
            let mut instruction = Instruction::new();
            for id in self.rm.moves_at(cycle) {
                instruction.add_move(self.arena.node(id).transport().clone());
            }
            bb.add_instruction(instruction);
        }
    }
}

/// Split a procedure into basic blocks: a referenced instruction starts a new
/// block, a control-flow move ends one. Returns each block with its original
/// start index; empty blocks are dropped.
pub fn create_basic_blocks(procedure: &Procedure) -> Vec<(BasicBlock, usize)> {
    let mut blocks = Vec::new();
    let mut current = BasicBlock::new();
    let mut start = 0usize;

    for index in 0..procedure.instruction_count() {
        let instruction = procedure.instruction_at(index).clone();

        if procedure.has_reference(index) {
            if current.instruction_count() > 0 {
                blocks.push((std::mem::take(&mut current), start));
            }
            start = index;
        }

        let ends_block = instruction.has_control_flow_move();
        current.add_instruction(instruction);
        if ends_block {
            blocks.push((std::mem::take(&mut current), start));
            start = index + 1;
        }
    }

    if current.instruction_count() > 0 {
        blocks.push((current, start));
    }
    blocks
}

/// Rebuild the procedure from scheduled blocks, remapping the referenced
/// instruction set to the blocks' new start indices.
pub fn copy_basic_blocks_to_procedure(procedure: &mut Procedure, blocks: Vec<(BasicBlock, usize)>) {
    let mut instructions = Vec::new();
    let mut references = HashSet::new();

    for (block, original_start) in blocks {
        if procedure.has_reference(original_start) {
            references.insert(instructions.len());
        }
        for instruction in block.instructions() {
            instructions.push(instruction.clone());
        }
    }
    procedure.replace_instructions(instructions, references);
}
