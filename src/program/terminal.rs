//! Move terminals.
//!
//! A terminal is one end of a data transport: a register, a function-unit
//! port, or (as a source only) an immediate constant. An FU-port terminal
//! optionally carries the opcode binding that ties the port access to one
//! operation execution.

use std::fmt;

use crate::machine::{FuIndex, Machine, PortIndex, RfIndex, SocketEndpoint};

/// One end of a move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    /// A register in a register file.
    Register { rf: RfIndex, index: u16 },
    /// A function-unit port, optionally bound to an operation execution.
    FuPort {
        fu: FuIndex,
        port: PortIndex,
        opcode: Option<String>,
    },
    /// An immediate constant; only valid as a move source.
    Immediate(i64),
}

impl Terminal {
    /// Shorthand for a register terminal.
    pub fn register(rf: RfIndex, index: u16) -> Self {
        Terminal::Register { rf, index }
    }

    /// Shorthand for an FU-port terminal without an opcode binding.
    pub fn fu_port(fu: FuIndex, port: PortIndex) -> Self {
        Terminal::FuPort {
            fu,
            port,
            opcode: None,
        }
    }

    /// Shorthand for an FU-port terminal bound to an operation execution.
    pub fn fu_operation_port(fu: FuIndex, port: PortIndex, opcode: &str) -> Self {
        Terminal::FuPort {
            fu,
            port,
            opcode: Some(opcode.to_string()),
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, Terminal::Register { .. })
    }

    pub fn is_fu_port(&self) -> bool {
        matches!(self, Terminal::FuPort { .. })
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Terminal::Immediate(_))
    }

    /// The opcode binding of an FU-port terminal, if any.
    pub fn opcode(&self) -> Option<&str> {
        match self {
            Terminal::FuPort { opcode, .. } => opcode.as_deref(),
            _ => None,
        }
    }

    /// The interconnect endpoint this terminal occupies; `None` for
    /// immediates, which travel on the bus itself.
    pub fn endpoint(&self) -> Option<SocketEndpoint> {
        match self {
            Terminal::Register { rf, .. } => Some(SocketEndpoint::RegisterFile(*rf)),
            Terminal::FuPort { fu, port, .. } => Some(SocketEndpoint::FuPort(*fu, *port)),
            Terminal::Immediate(_) => None,
        }
    }

    /// Whether this terminal is the triggering port of its function unit.
    pub fn is_triggering(&self, machine: &Machine) -> bool {
        match self {
            Terminal::FuPort { fu, port, .. } => {
                machine.function_unit(*fu).port(*port).is_triggering()
            }
            _ => false,
        }
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Register { rf, index } => write!(f, "rf{}.{}", rf, index),
            Terminal::FuPort {
                fu,
                port,
                opcode: Some(op),
            } => write!(f, "fu{}.p{}[{}]", fu, port, op),
            Terminal::FuPort {
                fu,
                port,
                opcode: None,
            } => write!(f, "fu{}.p{}", fu, port),
            Terminal::Immediate(value) => write!(f, "#{}", value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{ControlUnit, FunctionUnit};

    #[test]
    fn test_endpoint_mapping() {
        assert_eq!(
            Terminal::register(2, 5).endpoint(),
            Some(SocketEndpoint::RegisterFile(2))
        );
        assert_eq!(
            Terminal::fu_port(1, 3).endpoint(),
            Some(SocketEndpoint::FuPort(1, 3))
        );
        assert_eq!(Terminal::Immediate(42).endpoint(), None);
    }

    #[test]
    fn test_triggering_lookup() {
        let mut machine = Machine::new("m", ControlUnit::new(0));
        let mut fu = FunctionUnit::new("alu");
        let plain = fu.add_port("in1", false);
        let trig = fu.add_port("in2t", true);
        let fu = machine.add_function_unit(fu);

        assert!(Terminal::fu_port(fu, trig).is_triggering(&machine));
        assert!(!Terminal::fu_port(fu, plain).is_triggering(&machine));
        assert!(!Terminal::register(0, 0).is_triggering(&machine));
    }

    #[test]
    fn test_display() {
        assert_eq!(Terminal::register(0, 3).to_string(), "rf0.3");
        assert_eq!(Terminal::Immediate(-7).to_string(), "#-7");
        assert_eq!(Terminal::fu_operation_port(1, 0, "add").to_string(), "fu1.p0[add]");
    }
}
