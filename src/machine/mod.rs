// This module describes the target machine the scheduler compiles for: the set
// of function units (each with named ports, one of them triggering, and an
// operation table with latencies), register files (with sizes, access port
// counts and guard latencies), long-immediate units, transport buses (with
// their inline immediate encoding ranges), and the socket connectivity that
// says which resource can drive which bus and which bus can deliver to which
// resource. The machine is a read-only query surface during scheduling: the
// resource manager asks it for transport routes and immediate encodings, the
// register copy adder asks it for direct connectivity between resource pairs,
// and the scheduler asks it for guard latencies and triggering ports. It is
// constructed programmatically and passed by reference; no global state.

//! Target machine description.
//!
//! A machine is assembled from function units, register files, immediate
//! units and buses, plus the socket connectivity between them. During
//! scheduling it is only queried, never mutated.

pub mod units;

use hashbrown::HashSet;

pub use units::{
    Bus, BusIndex, FuIndex, FuOperation, FuPort, FunctionUnit, ImmediateUnit, IuIndex, PortIndex,
    RegisterFile, RfIndex,
};

/// One end of a transport: the resource a bus reads from or delivers to.
///
/// Register granularity does not matter for connectivity; a register file is
/// connected as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketEndpoint {
    RegisterFile(RfIndex),
    FuPort(FuIndex, PortIndex),
    ImmediateUnit(IuIndex),
}

/// Global control properties of the machine.
#[derive(Debug, Clone)]
pub struct ControlUnit {
    global_guard_latency: u32,
}

impl ControlUnit {
    pub fn new(global_guard_latency: u32) -> Self {
        Self {
            global_guard_latency,
        }
    }

    pub fn global_guard_latency(&self) -> u32 {
        self.global_guard_latency
    }
}

/// A complete target machine.
#[derive(Debug, Clone)]
pub struct Machine {
    name: String,
    control: ControlUnit,
    function_units: Vec<FunctionUnit>,
    register_files: Vec<RegisterFile>,
    immediate_units: Vec<ImmediateUnit>,
    buses: Vec<Bus>,
    /// (endpoint, bus): the endpoint can drive the bus.
    bus_sources: HashSet<(SocketEndpoint, BusIndex)>,
    /// (bus, endpoint): the bus can deliver to the endpoint.
    bus_destinations: HashSet<(BusIndex, SocketEndpoint)>,
}

impl Machine {
    pub fn new(name: &str, control: ControlUnit) -> Self {
        Self {
            name: name.to_string(),
            control,
            function_units: Vec::new(),
            register_files: Vec::new(),
            immediate_units: Vec::new(),
            buses: Vec::new(),
            bus_sources: HashSet::new(),
            bus_destinations: HashSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pipeline delay between writing any guard source and the processor
    /// acting on the guard.
    pub fn global_guard_latency(&self) -> u32 {
        self.control.global_guard_latency()
    }

    pub fn add_function_unit(&mut self, fu: FunctionUnit) -> FuIndex {
        self.function_units.push(fu);
        self.function_units.len() - 1
    }

    pub fn add_register_file(&mut self, rf: RegisterFile) -> RfIndex {
        self.register_files.push(rf);
        self.register_files.len() - 1
    }

    pub fn add_immediate_unit(&mut self, iu: ImmediateUnit) -> IuIndex {
        self.immediate_units.push(iu);
        self.immediate_units.len() - 1
    }

    pub fn add_bus(&mut self, bus: Bus) -> BusIndex {
        self.buses.push(bus);
        self.buses.len() - 1
    }

    pub fn function_unit(&self, index: FuIndex) -> &FunctionUnit {
        &self.function_units[index]
    }

    pub fn function_unit_count(&self) -> usize {
        self.function_units.len()
    }

    pub fn register_file(&self, index: RfIndex) -> &RegisterFile {
        &self.register_files[index]
    }

    pub fn register_file_count(&self) -> usize {
        self.register_files.len()
    }

    pub fn immediate_unit(&self, index: IuIndex) -> &ImmediateUnit {
        &self.immediate_units[index]
    }

    pub fn immediate_unit_count(&self) -> usize {
        self.immediate_units.len()
    }

    pub fn bus(&self, index: BusIndex) -> &Bus {
        &self.buses[index]
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    /// Declare that `endpoint` can drive `bus`.
    pub fn connect_source(&mut self, endpoint: SocketEndpoint, bus: BusIndex) {
        assert!(bus < self.buses.len());
        self.bus_sources.insert((endpoint, bus));
    }

    /// Declare that `bus` can deliver to `endpoint`.
    pub fn connect_destination(&mut self, bus: BusIndex, endpoint: SocketEndpoint) {
        assert!(bus < self.buses.len());
        self.bus_destinations.insert((bus, endpoint));
    }

    pub fn drives_bus(&self, endpoint: SocketEndpoint, bus: BusIndex) -> bool {
        self.bus_sources.contains(&(endpoint, bus))
    }

    pub fn delivers_to(&self, bus: BusIndex, endpoint: SocketEndpoint) -> bool {
        self.bus_destinations.contains(&(bus, endpoint))
    }

    /// Whether any single bus carries data directly from `from` to `to`.
    pub fn connects(&self, from: SocketEndpoint, to: SocketEndpoint) -> bool {
        (0..self.buses.len()).any(|bus| self.drives_bus(from, bus) && self.delivers_to(bus, to))
    }

    /// Buses that carry data directly from `from` to `to`, in index order.
    pub fn connecting_buses(
        &self,
        from: SocketEndpoint,
        to: SocketEndpoint,
    ) -> impl Iterator<Item = BusIndex> + '_ {
        (0..self.buses.len())
            .filter(move |&bus| self.drives_bus(from, bus) && self.delivers_to(bus, to))
    }

    /// Buses that can deliver the given constant inline to `to`, in index
    /// order.
    pub fn short_immediate_buses(
        &self,
        value: i64,
        to: SocketEndpoint,
    ) -> impl Iterator<Item = BusIndex> + '_ {
        (0..self.buses.len())
            .filter(move |&bus| self.buses[bus].fits_immediate(value) && self.delivers_to(bus, to))
    }

    /// Whether some bus can deliver the constant inline to `to`.
    pub fn can_reach_with_short_immediate(&self, value: i64, to: SocketEndpoint) -> bool {
        self.short_immediate_buses(value, to).next().is_some()
    }

    /// Immediate-unit routes to `to`: (unit, bus) pairs where the unit drives
    /// the bus and the bus delivers to `to`, in index order.
    pub fn immediate_unit_routes(
        &self,
        to: SocketEndpoint,
    ) -> impl Iterator<Item = (IuIndex, BusIndex)> + '_ {
        (0..self.immediate_units.len()).flat_map(move |iu| {
            self.connecting_buses(SocketEndpoint::ImmediateUnit(iu), to)
                .map(move |bus| (iu, bus))
        })
    }
}
