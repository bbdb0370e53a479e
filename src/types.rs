//! Core type definitions for the simulation kernel.
//!
//! This module defines the fundamental types used throughout the simulator.

/// Simulation time unit, in picoseconds.
///
/// The global clock never decreases. All scheduling is relative to the
/// current value, and every component converts its own clock cycles into
/// `SimTime` through its clock period.
pub type SimTime = u64;

/// A count of clock cycles in a component's clock domain.
pub type Cycles = u64;

/// Index of a component inside the simulation engine.
///
/// Identifiers are handed out in creation order, which keeps the whole
/// simulation deterministic for a given construction sequence.
pub type ComponentId = usize;

/// Index of a port within the port list declared by its component.
///
/// For components with many identical slave ports (routers, controllers),
/// the port index doubles as the "mux id" telling the handler which caller
/// a request came from.
pub type PortId = usize;

/// Component-local identifier of a schedulable event.
///
/// Each component chooses its own numbering; the kernel only uses the
/// `(ComponentId, EventId)` pair to deduplicate armed events.
pub type EventId = u32;

/// Picoseconds in one nanosecond.
pub const PS_PER_NS: SimTime = 1_000;

/// Converts a clock frequency in MHz into a clock period in picoseconds.
///
/// Returns `None` for a zero frequency.
pub fn period_from_mhz(frequency_mhz: u64) -> Option<SimTime> {
    if frequency_mhz == 0 {
        None
    } else {
        Some(1_000_000 / frequency_mhz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_aliases() {
        let time: SimTime = 1000;
        let component: ComponentId = 42;
        let port: PortId = 3;
        let event: EventId = 1;

        assert_eq!(time, 1000);
        assert_eq!(component, 42);
        assert_eq!(port, 3);
        assert_eq!(event, 1);
    }

    #[test]
    fn test_period_from_mhz() {
        assert_eq!(period_from_mhz(1000), Some(1000));
        assert_eq!(period_from_mhz(500), Some(2000));
        assert_eq!(period_from_mhz(0), None);
    }
}
