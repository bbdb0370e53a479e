//! Component definitions and the `Component` trait.
//!
//! Components are the simulated hardware blocks. Each one owns private
//! state, declares a fixed list of ports, and only reacts to callbacks
//! delivered by the engine: its own scheduled events, inbound requests on
//! slave ports, responses and grants on master ports, and wire values.

use serde::{Deserialize, Serialize};
use std::any::Any;

use crate::context::SimContext;
use crate::error::{SimError, SimResult};
use crate::request::{IoStatus, Request};
use crate::types::{EventId, PortId, SimTime};

/// Interface type of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Request/response traffic with backpressure
    Io,
    /// Fire-and-forget value propagation
    Wire,
    /// Frequency and reset signaling
    Clock,
}

/// Which side of a binding a port sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Master,
    Slave,
}

/// Static description of a port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDesc {
    /// Name of the port, unique within its component
    pub name: String,
    /// Interface type
    pub kind: PortKind,
    /// Binding side
    pub direction: PortDirection,
}

impl PortDesc {
    /// Creates a new port description.
    pub fn new(name: impl Into<String>, kind: PortKind, direction: PortDirection) -> Self {
        Self {
            name: name.into(),
            kind,
            direction,
        }
    }

    /// An IO master port (issues requests).
    pub fn io_master(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Io, PortDirection::Master)
    }

    /// An IO slave port (receives requests).
    pub fn io_slave(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Io, PortDirection::Slave)
    }

    /// A wire master port (drives values).
    pub fn wire_master(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Wire, PortDirection::Master)
    }

    /// A wire slave port (receives values).
    pub fn wire_slave(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Wire, PortDirection::Slave)
    }

    /// A clock-control master port.
    pub fn clock_master(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Clock, PortDirection::Master)
    }

    /// A clock-control slave port. The engine applies received signals to
    /// the owning component directly.
    pub fn clock_slave(name: impl Into<String>) -> Self {
        Self::new(name, PortKind::Clock, PortDirection::Slave)
    }

    /// Returns true if this port can be bound to `other` as master to slave.
    pub fn can_bind_to(&self, other: &PortDesc) -> bool {
        self.kind == other.kind
            && self.direction == PortDirection::Master
            && other.direction == PortDirection::Slave
    }
}

/// Signal carried by a clock-control binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSignal {
    /// Changes the clock period of the target, in picoseconds
    SetPeriod(SimTime),
    /// Asserts (`true`) or releases (`false`) the target's reset
    Reset(bool),
}

/// Static description of an instantiated component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentDesc {
    /// Hierarchical path, segments separated by `/`
    pub path: String,
    /// Component type name
    pub type_name: String,
    /// Clock period in picoseconds
    pub period: SimTime,
    /// Declared ports
    pub ports: Vec<PortDesc>,
}

impl ComponentDesc {
    /// Returns the last path segment.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Returns the parent path, if the component is not a root.
    pub fn parent(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

/// Object-safe downcasting support for components.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The core trait that all simulated hardware blocks implement.
///
/// Every callback receives a [`SimContext`] through which the component
/// schedules its own events, talks to its bound peers and reads the clock.
/// Callbacks run to completion; a component never observes another
/// callback of its own before the current one returns.
///
/// The default handlers treat any unexpected callback as a fatal protocol
/// violation, so a component only implements what its ports can receive.
pub trait Component: AsAny + Send {
    /// Type name used in diagnostics and statistics.
    fn type_name(&self) -> &'static str;

    /// Declares the component's ports. Port indices are positions in this list.
    fn ports(&self) -> Vec<PortDesc>;

    /// Reset notification: `active == true` when reset is asserted,
    /// `false` when it is released and the component may start working.
    fn reset(&mut self, _ctx: &mut SimContext<'_>, _active: bool) -> SimResult<()> {
        Ok(())
    }

    /// Called when one of the component's scheduled events fires.
    fn handle_event(&mut self, ctx: &mut SimContext<'_>, event: EventId) -> SimResult<()> {
        Err(SimError::UnknownEvent {
            component: ctx.name().to_string(),
            event,
        })
    }

    /// Called synchronously, in the caller's stack, when a request arrives
    /// on a slave port.
    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: PortId,
        _req: Request,
    ) -> SimResult<IoStatus> {
        Err(ctx.fatal(format!("port {} does not accept requests", port)))
    }

    /// Called when a request previously answered with `Pending` comes back
    /// on a master port.
    fn handle_resp(&mut self, ctx: &mut SimContext<'_>, port: PortId, _req: Request) -> SimResult<()> {
        Err(ctx.fatal(format!("unexpected response on port {}", port)))
    }

    /// Called when a slave that denied a request on `port` is ready again.
    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, port: PortId) -> SimResult<()> {
        Err(ctx.fatal(format!("unexpected grant on port {}", port)))
    }

    /// Called synchronously when a wire master bound to `port` drives a value.
    fn handle_wire(&mut self, ctx: &mut SimContext<'_>, port: PortId, value: u64) -> SimResult<()> {
        Err(ctx.fatal(format!("unexpected wire value {} on port {}", value, port)))
    }

    /// Exports component statistics as JSON.
    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_binding_rules() {
        let master = PortDesc::io_master("out");
        let slave = PortDesc::io_slave("input");
        let wire = PortDesc::wire_slave("irq");

        assert!(master.can_bind_to(&slave));
        assert!(!slave.can_bind_to(&master));
        assert!(!master.can_bind_to(&wire));
        assert!(PortDesc::clock_master("clk").can_bind_to(&PortDesc::clock_slave("clock")));
    }

    #[test]
    fn test_component_desc_naming() {
        let desc = ComponentDesc {
            path: "chip0/cluster/redmule".to_string(),
            type_name: "RedMule".to_string(),
            period: 1000,
            ports: vec![PortDesc::io_slave("input")],
        };
        assert_eq!(desc.name(), "redmule");
        assert_eq!(desc.parent(), Some("chip0/cluster"));

        let root = ComponentDesc {
            path: "ctrl".to_string(),
            ..desc
        };
        assert_eq!(root.name(), "ctrl");
        assert_eq!(root.parent(), None);
    }

    struct Dummy;

    impl Component for Dummy {
        fn type_name(&self) -> &'static str {
            "Dummy"
        }

        fn ports(&self) -> Vec<PortDesc> {
            Vec::new()
        }
    }

    #[test]
    fn test_downcast() {
        let boxed: Box<dyn Component> = Box::new(Dummy);
        let any = <dyn Component as AsAny>::as_any(boxed.as_ref());
        assert!(any.downcast_ref::<Dummy>().is_some());
        assert_eq!(boxed.type_name(), "Dummy");
        assert_eq!(boxed.export_stats(), serde_json::json!({}));
    }
}
