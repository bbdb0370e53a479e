//! The handle through which a component talks to the kernel.
//!
//! A [`SimContext`] is created by the engine for the duration of one
//! callback and borrows the engine mutably. All interaction between a
//! component and the rest of the platform goes through it, which is what
//! keeps components free of shared mutable state.

use crate::component::ClockSignal;
use crate::engine::SimulationEngine;
use crate::error::{SimError, SimResult};
use crate::request::{IoStatus, Request};
use crate::types::{ComponentId, Cycles, EventId, PortId, SimTime};

/// Callback context of one component.
pub struct SimContext<'a> {
    engine: &'a mut SimulationEngine,
    id: ComponentId,
}

impl<'a> SimContext<'a> {
    pub(crate) fn new(engine: &'a mut SimulationEngine, id: ComponentId) -> Self {
        Self { engine, id }
    }

    /// Identifier of the component this context belongs to.
    pub fn id(&self) -> ComponentId {
        self.id
    }

    /// Hierarchical path of the component, used in diagnostics.
    pub fn name(&self) -> &str {
        self.engine.path(self.id).unwrap_or("?")
    }

    /// Current simulated time in picoseconds.
    pub fn now(&self) -> SimTime {
        self.engine.now()
    }

    /// Clock period of the component in picoseconds.
    pub fn period(&self) -> SimTime {
        self.engine.period_of(self.id)
    }

    /// Current time expressed in cycles of the component's clock.
    pub fn cycles(&self) -> Cycles {
        self.now() / self.period().max(1)
    }

    /// Arms `event` to fire `cycles` edges of the component's clock from now.
    /// Called between two edges, the count starts at the next one.
    ///
    /// Returns false if the event was already armed for that time or
    /// earlier; the existing arming is kept.
    pub fn enqueue(&mut self, event: EventId, cycles: Cycles) -> bool {
        let due = self.engine.due_after(self.id, cycles);
        self.engine.queue_mut().schedule_event(self.id, event, due)
    }

    /// Returns true if `event` is currently armed.
    pub fn is_enqueued(&self, event: EventId) -> bool {
        self.engine.queue().is_armed(self.id, event)
    }

    /// Disarms `event`. Returns true if it was armed.
    pub fn cancel(&mut self, event: EventId) -> bool {
        self.engine.queue_mut().cancel_event(self.id, event)
    }

    /// Submits `req` through master `port`, synchronously.
    ///
    /// The bound slave's handler runs before this returns. On `Completed`
    /// and `Denied` the request comes back to the caller; on `Pending` the
    /// slave keeps it until it calls [`SimContext::resp`].
    pub fn req(&mut self, port: PortId, req: Request) -> SimResult<IoStatus> {
        self.engine.dispatch_req(self.id, port, req)
    }

    /// Returns a request previously answered with `Pending` to its initiator.
    ///
    /// The initiator's `handle_resp` runs as a zero-delay event.
    pub fn resp(&mut self, req: Request) -> SimResult<()> {
        self.engine.dispatch_resp(self.id, req)
    }

    /// Signals the master bound to slave `port` that it may resubmit its
    /// denied request. Its `handle_grant` runs as a zero-delay event.
    pub fn grant(&mut self, port: PortId) -> SimResult<()> {
        self.engine.dispatch_grant(self.id, port)
    }

    /// Drives `value` on wire master `port`.
    pub fn wire(&mut self, port: PortId, value: u64) -> SimResult<()> {
        self.engine.dispatch_wire(self.id, port, value)
    }

    /// Sends a clock-control signal on clock master `port`.
    pub fn clock(&mut self, port: PortId, signal: ClockSignal) -> SimResult<()> {
        self.engine.dispatch_clock(self.id, port, signal)
    }

    /// Returns true if `port` is bound to a peer.
    pub fn is_bound(&self, port: PortId) -> bool {
        self.engine.peer_of(self.id, port).is_some()
    }

    /// Stops the run loop after the current callback with `code`.
    pub fn quit(&mut self, code: i32) {
        let name = self.name().to_string();
        self.engine.quit_from(&name, code);
    }

    /// Builds a fatal diagnostic attributed to this component.
    ///
    /// Callers return it with `Err(ctx.fatal(..))`.
    pub fn fatal(&self, message: impl Into<String>) -> SimError {
        SimError::fatal(self.name(), message)
    }
}
