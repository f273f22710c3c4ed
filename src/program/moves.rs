// This module defines the move: one data transport from a source terminal to
// a destination terminal, optionally predicated by a guard. A move's identity
// (kind and guard) is fixed at construction; its terminals can be repointed
// only by the scheduler itself when a temporary register leg is spliced in,
// and its annotation set stays mutable throughout so scheduling passes can
// attach flags (long-immediate conversion, procedure-return marking) that
// later passes and the simulator consume.

//! Moves, guards and move annotations.

use std::fmt;

use crate::machine::{FuIndex, PortIndex, RfIndex};
use crate::program::terminal::Terminal;

/// The value a guard predicate is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardSource {
    /// A boolean register; guard reads from register files pay the file's
    /// extra guard latency.
    Register { rf: RfIndex, index: u16 },
    /// A function-unit output port.
    FuPort { fu: FuIndex, port: PortIndex },
}

/// A guard predicate making a move conditional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveGuard {
    pub inverted: bool,
    pub source: GuardSource,
}

impl MoveGuard {
    pub fn new(inverted: bool, source: GuardSource) -> Self {
        Self { inverted, source }
    }
}

/// Control-flow classification of a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Normal,
    Jump,
    Call,
    Return,
}

/// Named flags attached to a move and persisted with it after scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveAnnotation {
    /// The constant source cannot travel inline and must be routed through
    /// a long-immediate unit by later passes.
    RequiresLongImmediate,
    /// A procedure-return constant that was converted away from a short
    /// immediate; keeps the simulator's automatic-stop detection working.
    ProcedureReturnConstant,
}

/// One data transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    source: Terminal,
    destination: Terminal,
    guard: Option<MoveGuard>,
    kind: MoveKind,
    annotations: Vec<MoveAnnotation>,
}

impl Move {
    pub fn new(source: Terminal, destination: Terminal) -> Self {
        Self {
            source,
            destination,
            guard: None,
            kind: MoveKind::Normal,
            annotations: Vec::new(),
        }
    }

    pub fn with_guard(mut self, guard: MoveGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_kind(mut self, kind: MoveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn source(&self) -> &Terminal {
        &self.source
    }

    pub fn destination(&self) -> &Terminal {
        &self.destination
    }

    pub fn guard(&self) -> Option<&MoveGuard> {
        self.guard.as_ref()
    }

    pub fn kind(&self) -> MoveKind {
        self.kind
    }

    pub fn is_unconditional(&self) -> bool {
        self.guard.is_none()
    }

    pub fn is_return(&self) -> bool {
        self.kind == MoveKind::Return
    }

    /// Jumps, calls and returns end a basic block.
    pub fn is_control_flow(&self) -> bool {
        matches!(self.kind, MoveKind::Jump | MoveKind::Call | MoveKind::Return)
    }

    /// Repoint the source; used when a temporary register leg is inserted.
    pub(crate) fn set_source(&mut self, source: Terminal) {
        self.source = source;
    }

    /// Repoint the destination; used when a temporary register leg is
    /// inserted.
    pub(crate) fn set_destination(&mut self, destination: Terminal) {
        self.destination = destination;
    }

    /// Attach an annotation. Setting a flag that is already present is a
    /// no-op; the set never holds duplicates.
    pub fn set_annotation(&mut self, annotation: MoveAnnotation) {
        if !self.has_annotation(annotation) {
            self.annotations.push(annotation);
        }
    }

    /// Remove an annotation if present.
    pub fn remove_annotation(&mut self, annotation: MoveAnnotation) {
        self.annotations.retain(|a| *a != annotation);
    }

    pub fn has_annotation(&self, annotation: MoveAnnotation) -> bool {
        self.annotations.contains(&annotation)
    }

    pub fn annotations(&self) -> &[MoveAnnotation] {
        &self.annotations
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(guard) = &self.guard {
            let polarity = if guard.inverted { "!" } else { "?" };
            match guard.source {
                GuardSource::Register { rf, index } => {
                    write!(f, "{}rf{}.{} ", polarity, rf, index)?
                }
                GuardSource::FuPort { fu, port } => write!(f, "{}fu{}.p{} ", polarity, fu, port)?,
            }
        }
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_set_semantics() {
        let mut mv = Move::new(Terminal::Immediate(3), Terminal::register(0, 1));
        assert!(!mv.has_annotation(MoveAnnotation::RequiresLongImmediate));

        mv.set_annotation(MoveAnnotation::RequiresLongImmediate);
        mv.set_annotation(MoveAnnotation::RequiresLongImmediate);
        assert_eq!(mv.annotations().len(), 1);

        mv.remove_annotation(MoveAnnotation::RequiresLongImmediate);
        assert!(mv.annotations().is_empty());
    }

    #[test]
    fn test_control_flow_classification() {
        let plain = Move::new(Terminal::register(0, 0), Terminal::register(0, 1));
        assert!(!plain.is_control_flow());
        assert!(!plain.is_return());

        let ret = Move::new(Terminal::register(0, 0), Terminal::fu_port(0, 0))
            .with_kind(MoveKind::Return);
        assert!(ret.is_control_flow());
        assert!(ret.is_return());
    }

    #[test]
    fn test_display_with_guard() {
        let mv = Move::new(Terminal::Immediate(5), Terminal::register(1, 2)).with_guard(
            MoveGuard::new(true, GuardSource::Register { rf: 0, index: 3 }),
        );
        assert_eq!(mv.to_string(), "!rf0.3 #5 -> rf1.2");
    }
}
