//! Tests for the resource-manager contract: pure queries, transactional
//! assign/unassign pairs, and the immediate-transport capability check.

use ttasched::machine::{Bus, ControlUnit, FunctionUnit, Machine, RegisterFile, SocketEndpoint};
use ttasched::program::{Move, Terminal};
use ttasched::scheduler::{MoveNode, MoveNodeArena, SimpleResourceManager};

/// One register file, one single-port FU, one bus wired both ways.
fn one_bus_machine() -> Machine {
    let mut machine = Machine::new("one-bus", ControlUnit::new(0));
    let rf = machine.add_register_file(RegisterFile::new("int", 8, 0));
    let mut fu = FunctionUnit::new("unit");
    let port = fu.add_port("p0t", true);
    let fu = machine.add_function_unit(fu);

    let bus = machine.add_bus(Bus::new("b0", 6, false));
    machine.connect_source(SocketEndpoint::RegisterFile(rf), bus);
    machine.connect_destination(bus, SocketEndpoint::RegisterFile(rf));
    machine.connect_destination(bus, SocketEndpoint::FuPort(fu, port));
    machine
}

#[test]
fn test_earliest_cycle_is_a_pure_query() {
    let machine = one_bus_machine();
    let rm = SimpleResourceManager::new(&machine);
    let mut arena = MoveNodeArena::new();
    let id = arena.add(MoveNode::new(Move::new(
        Terminal::register(0, 0),
        Terminal::register(0, 1),
    )));

    // Querying twice gives the same answer and schedules nothing.
    assert_eq!(rm.earliest_cycle(5, arena.node(id)), Some(5));
    assert_eq!(rm.earliest_cycle(5, arena.node(id)), Some(5));
    assert!(!arena.node(id).is_scheduled());
    assert_eq!(rm.scheduled_move_count(), 0);
}

#[test]
fn test_assign_unassign_restores_feasibility_for_others() {
    let machine = one_bus_machine();
    let mut rm = SimpleResourceManager::new(&machine);
    let mut arena = MoveNodeArena::new();
    let a = arena.add(MoveNode::new(Move::new(
        Terminal::register(0, 0),
        Terminal::register(0, 1),
    )));
    let b = arena.add(MoveNode::new(Move::new(
        Terminal::register(0, 2),
        Terminal::register(0, 3),
    )));

    let free = rm.earliest_cycle(0, arena.node(b));
    assert_eq!(free, Some(0));

    rm.assign(0, a, &mut arena).unwrap();
    assert_eq!(rm.earliest_cycle(0, arena.node(b)), Some(1));

    rm.unassign(a, &mut arena).unwrap();
    assert_eq!(rm.earliest_cycle(0, arena.node(b)), free);
    assert_eq!(rm.largest_cycle(), 0);
    assert!(!arena.node(a).is_scheduled());
    assert!(!arena.node(a).is_placed());
}

#[test]
fn test_unassign_without_assign_is_an_error() {
    let machine = one_bus_machine();
    let mut rm = SimpleResourceManager::new(&machine);
    let mut arena = MoveNodeArena::new();
    let id = arena.add(MoveNode::new(Move::new(
        Terminal::register(0, 0),
        Terminal::register(0, 1),
    )));

    assert!(rm.unassign(id, &mut arena).is_err());
}

#[test]
fn test_immediate_capability_respects_encoding_and_reach() {
    let machine = one_bus_machine();
    let rm = SimpleResourceManager::new(&machine);
    let mut arena = MoveNodeArena::new();

    // 6-bit unsigned field: 0..=63.
    let fits = arena.add(MoveNode::new(Move::new(
        Terminal::Immediate(63),
        Terminal::register(0, 0),
    )));
    let negative = arena.add(MoveNode::new(Move::new(
        Terminal::Immediate(-1),
        Terminal::register(0, 0),
    )));

    assert!(rm.can_transport_immediate(arena.node(fits)));
    assert!(!rm.can_transport_immediate(arena.node(negative)));
}

#[test]
fn test_moves_at_reflects_commitments() {
    let machine = one_bus_machine();
    let mut rm = SimpleResourceManager::new(&machine);
    let mut arena = MoveNodeArena::new();
    let a = arena.add(MoveNode::new(Move::new(
        Terminal::register(0, 0),
        Terminal::register(0, 1),
    )));
    let b = arena.add(MoveNode::new(Move::new(
        Terminal::register(0, 2),
        Terminal::fu_port(0, 0),
    )));

    rm.assign(0, a, &mut arena).unwrap();
    rm.assign(2, b, &mut arena).unwrap();

    assert_eq!(rm.moves_at(0), vec![a]);
    assert!(rm.moves_at(1).is_empty());
    assert_eq!(rm.moves_at(2), vec![b]);
    assert_eq!(rm.largest_cycle(), 2);
}
