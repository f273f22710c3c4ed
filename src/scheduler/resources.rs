// This module implements the resource manager: the cycle-indexed occupancy
// table the scheduler allocates transports against. For every cycle it tracks
// the buses in use, the function-unit ports touched, and per-file register
// read/write port usage plus immediate-unit read slots. earliest_cycle is a
// pure feasibility query that scans forward from a lower bound for the first
// cycle where some bus can carry the move from its source to its destination
// with all of those resources free; assign re-checks that feasibility
// defensively, claims the chosen route and marks the node scheduled; unassign
// releases exactly what assign claimed, leaving the table observably
// identical to its pre-assign state. Constant sources are routed inline over
// a bus with a wide-enough short-immediate field, or through a long-immediate
// unit once the move carries the conversion annotation.

//! Cycle- and resource-indexed transport allocation.

use hashbrown::{HashMap, HashSet};
use log::{debug, trace};

use crate::machine::{BusIndex, FuIndex, IuIndex, Machine, PortIndex, RfIndex, SocketEndpoint};
use crate::program::{MoveAnnotation, Terminal};
use crate::scheduler::error::{ScheduleError, ScheduleResult};
use crate::scheduler::move_node::{MoveNode, MoveNodeArena, MoveNodeId};

/// How far past the lower bound `earliest_cycle` searches before giving up.
pub const CYCLE_SEARCH_HORIZON: u32 = 4096;

/// The source-side resource a transport occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceClaim {
    RfRead(RfIndex),
    FuPort(FuIndex, PortIndex),
    IuRead(IuIndex),
}

/// The destination-side resource a transport occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestinationClaim {
    RfWrite(RfIndex),
    FuPort(FuIndex, PortIndex),
}

/// One feasible way to carry a move in a given cycle.
#[derive(Debug, Clone, Copy)]
struct TransportRoute {
    bus: BusIndex,
    /// `None` for inline immediates; the constant travels on the bus itself.
    source: Option<SourceClaim>,
    destination: DestinationClaim,
}

/// The resources a committed node holds.
#[derive(Debug, Clone, Copy)]
struct Placement {
    cycle: u32,
    route: TransportRoute,
}

/// Occupancy of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CycleResources {
    buses: HashSet<BusIndex>,
    fu_ports: HashSet<(FuIndex, PortIndex)>,
    rf_reads: HashMap<RfIndex, usize>,
    rf_writes: HashMap<RfIndex, usize>,
    iu_reads: HashMap<IuIndex, usize>,
}

impl CycleResources {
    fn is_empty(&self) -> bool {
        self.buses.is_empty()
            && self.fu_ports.is_empty()
            && self.rf_reads.is_empty()
            && self.rf_writes.is_empty()
            && self.iu_reads.is_empty()
    }
}

/// The per-block transport allocation table.
///
/// One instance exists per basic-block scheduling run; it is mutated only
/// through `assign`/`unassign` and queried through `earliest_cycle`.
pub struct SimpleResourceManager<'m> {
    machine: &'m Machine,
    occupancy: HashMap<u32, CycleResources>,
    placements: HashMap<MoveNodeId, Placement>,
}

impl<'m> SimpleResourceManager<'m> {
    pub fn new(machine: &'m Machine) -> Self {
        Self {
            machine,
            occupancy: HashMap::new(),
            placements: HashMap::new(),
        }
    }

    /// Smallest feasible cycle ≥ `lower_bound` for the move, or `None` if
    /// none exists within the search horizon. Pure query.
    pub fn earliest_cycle(&self, lower_bound: u32, node: &MoveNode) -> Option<u32> {
        if !self.has_capability(node) {
            return None;
        }
        (lower_bound..=lower_bound.saturating_add(CYCLE_SEARCH_HORIZON))
            .find(|&cycle| self.route_at(cycle, node).is_some())
    }

    /// Commit the move at `cycle`, claiming the resources of the first
    /// feasible route. The feasibility check is repeated here even though the
    /// single-threaded caller just queried it.
    pub fn assign(
        &mut self,
        cycle: u32,
        id: MoveNodeId,
        arena: &mut MoveNodeArena,
    ) -> ScheduleResult<()> {
        if self.placements.contains_key(&id) || arena.node(id).is_scheduled() {
            return Err(ScheduleError::InvalidState {
                reason: format!("move '{}' is already assigned", arena.node(id).transport()),
            });
        }
        let route = self.route_at(cycle, arena.node(id)).ok_or_else(|| {
            ScheduleError::ResourceConflict {
                reason: format!(
                    "no feasible route for move '{}' at cycle {}",
                    arena.node(id).transport(),
                    cycle
                ),
            }
        })?;
        self.claim(cycle, &route);
        self.placements.insert(id, Placement { cycle, route });
        arena.node_mut(id).set_scheduled(cycle);
        debug!(
            "assigned '{}' at cycle {} on bus {}",
            arena.node(id).transport(),
            cycle,
            route.bus
        );
        Ok(())
    }

    /// Release all resources of a previously assigned node; the exact inverse
    /// of `assign`.
    pub fn unassign(&mut self, id: MoveNodeId, arena: &mut MoveNodeArena) -> ScheduleResult<()> {
        let placement = self.placements.remove(&id).ok_or_else(|| {
            ScheduleError::InvalidState {
                reason: format!(
                    "unassigning move '{}' which holds no resources",
                    arena.node(id).transport()
                ),
            }
        })?;
        self.release(&placement);
        arena.node_mut(id).set_unscheduled();
        debug!(
            "unassigned '{}' from cycle {}",
            arena.node(id).transport(),
            placement.cycle
        );
        Ok(())
    }

    /// Whether the constant source can travel inline on some bus reaching the
    /// destination. Capability only; occupancy is ignored.
    pub fn can_transport_immediate(&self, node: &MoveNode) -> bool {
        match (
            node.transport().source(),
            node.transport().destination().endpoint(),
        ) {
            (Terminal::Immediate(value), Some(dest)) => {
                self.machine.can_reach_with_short_immediate(*value, dest)
            }
            _ => false,
        }
    }

    /// High-water mark of assigned activity; zero when nothing is assigned.
    pub fn largest_cycle(&self) -> u32 {
        self.placements
            .values()
            .map(|placement| placement.cycle)
            .max()
            .unwrap_or(0)
    }

    /// Ids assigned at `cycle`, in id order.
    pub fn moves_at(&self, cycle: u32) -> Vec<MoveNodeId> {
        let mut ids: Vec<MoveNodeId> = self
            .placements
            .iter()
            .filter(|(_, placement)| placement.cycle == cycle)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of currently assigned nodes.
    pub fn scheduled_move_count(&self) -> usize {
        self.placements.len()
    }

    /// Whether any route exists for the move on this machine at all,
    /// regardless of occupancy.
    fn has_capability(&self, node: &MoveNode) -> bool {
        let Some(dest) = node.transport().destination().endpoint() else {
            return false;
        };
        match node.transport().source() {
            Terminal::Immediate(value) => {
                if node
                    .transport()
                    .has_annotation(MoveAnnotation::RequiresLongImmediate)
                {
                    self.machine.immediate_unit_routes(dest).next().is_some()
                } else {
                    self.machine.can_reach_with_short_immediate(*value, dest)
                }
            }
            source => match source.endpoint() {
                Some(src) => self.machine.connects(src, dest),
                None => false,
            },
        }
    }

    /// First feasible route for the move at `cycle`, if any.
    fn route_at(&self, cycle: u32, node: &MoveNode) -> Option<TransportRoute> {
        let dest_terminal = node.transport().destination();
        let dest = dest_terminal.endpoint()?;
        let destination = match dest {
            SocketEndpoint::RegisterFile(rf) => DestinationClaim::RfWrite(rf),
            SocketEndpoint::FuPort(fu, port) => DestinationClaim::FuPort(fu, port),
            SocketEndpoint::ImmediateUnit(_) => return None,
        };

        let candidates: Vec<(BusIndex, Option<SourceClaim>)> = match node.transport().source() {
            Terminal::Immediate(value) => {
                if node
                    .transport()
                    .has_annotation(MoveAnnotation::RequiresLongImmediate)
                {
                    self.machine
                        .immediate_unit_routes(dest)
                        .map(|(iu, bus)| (bus, Some(SourceClaim::IuRead(iu))))
                        .collect()
                } else {
                    self.machine
                        .short_immediate_buses(*value, dest)
                        .map(|bus| (bus, None))
                        .collect()
                }
            }
            source => {
                let src = source.endpoint()?;
                let claim = match src {
                    SocketEndpoint::RegisterFile(rf) => SourceClaim::RfRead(rf),
                    SocketEndpoint::FuPort(fu, port) => SourceClaim::FuPort(fu, port),
                    SocketEndpoint::ImmediateUnit(iu) => SourceClaim::IuRead(iu),
                };
                self.machine
                    .connecting_buses(src, dest)
                    .map(|bus| (bus, Some(claim)))
                    .collect()
            }
        };

        for (bus, source) in candidates {
            if !self.bus_free(cycle, bus) {
                continue;
            }
            if let Some(claim) = source {
                if !self.source_available(cycle, claim) {
                    continue;
                }
            }
            if !self.destination_available(cycle, destination) {
                continue;
            }
            trace!(
                "route for '{}' at cycle {}: bus {}",
                node.transport(),
                cycle,
                bus
            );
            return Some(TransportRoute {
                bus,
                source,
                destination,
            });
        }
        None
    }

    fn bus_free(&self, cycle: u32, bus: BusIndex) -> bool {
        self.occupancy
            .get(&cycle)
            .map_or(true, |slot| !slot.buses.contains(&bus))
    }

    fn source_available(&self, cycle: u32, claim: SourceClaim) -> bool {
        let Some(slot) = self.occupancy.get(&cycle) else {
            return true;
        };
        match claim {
            SourceClaim::RfRead(rf) => {
                slot.rf_reads.get(&rf).copied().unwrap_or(0)
                    < self.machine.register_file(rf).read_ports()
            }
            SourceClaim::FuPort(fu, port) => !slot.fu_ports.contains(&(fu, port)),
            SourceClaim::IuRead(iu) => {
                slot.iu_reads.get(&iu).copied().unwrap_or(0)
                    < self.machine.immediate_unit(iu).read_ports()
            }
        }
    }

    fn destination_available(&self, cycle: u32, claim: DestinationClaim) -> bool {
        let Some(slot) = self.occupancy.get(&cycle) else {
            return true;
        };
        match claim {
            DestinationClaim::RfWrite(rf) => {
                slot.rf_writes.get(&rf).copied().unwrap_or(0)
                    < self.machine.register_file(rf).write_ports()
            }
            DestinationClaim::FuPort(fu, port) => !slot.fu_ports.contains(&(fu, port)),
        }
    }

    fn claim(&mut self, cycle: u32, route: &TransportRoute) {
        let slot = self.occupancy.entry(cycle).or_default();
        slot.buses.insert(route.bus);
        match route.destination {
            DestinationClaim::RfWrite(rf) => *slot.rf_writes.entry(rf).or_insert(0) += 1,
            DestinationClaim::FuPort(fu, port) => {
                slot.fu_ports.insert((fu, port));
            }
        }
        match route.source {
            Some(SourceClaim::RfRead(rf)) => *slot.rf_reads.entry(rf).or_insert(0) += 1,
            Some(SourceClaim::FuPort(fu, port)) => {
                slot.fu_ports.insert((fu, port));
            }
            Some(SourceClaim::IuRead(iu)) => *slot.iu_reads.entry(iu).or_insert(0) += 1,
            None => {}
        }
    }

    fn release(&mut self, placement: &Placement) {
        let route = &placement.route;
        let Some(slot) = self.occupancy.get_mut(&placement.cycle) else {
            return;
        };
        slot.buses.remove(&route.bus);
        match route.destination {
            DestinationClaim::RfWrite(rf) => decrement(&mut slot.rf_writes, rf),
            DestinationClaim::FuPort(fu, port) => {
                slot.fu_ports.remove(&(fu, port));
            }
        }
        match route.source {
            Some(SourceClaim::RfRead(rf)) => decrement(&mut slot.rf_reads, rf),
            Some(SourceClaim::FuPort(fu, port)) => {
                slot.fu_ports.remove(&(fu, port));
            }
            Some(SourceClaim::IuRead(iu)) => decrement(&mut slot.iu_reads, iu),
            None => {}
        }
        if slot.is_empty() {
            self.occupancy.remove(&placement.cycle);
        }
    }
}

fn decrement<K: Eq + std::hash::Hash>(counts: &mut HashMap<K, usize>, key: K) {
    if let Some(count) = counts.get_mut(&key) {
        *count -= 1;
        if *count == 0 {
            counts.remove(&key);
        }
    }
}
