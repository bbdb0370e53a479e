//! Global simulation engine.
//!
//! The `SimulationEngine` owns every component, the port bindings between
//! them and the event queue, and advances the single global clock by
//! popping events. Execution is single-threaded and cooperative: one
//! callback runs to completion before the next one starts.
//!
//! Components live in an arena indexed by [`ComponentId`]. While a
//! component executes a callback it is taken out of the arena, so a
//! synchronous request that loops back into a component already on the
//! call stack is detected and reported as [`SimError::Reentrant`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::component::{ClockSignal, Component, ComponentDesc, PortDesc, PortDirection, PortKind};
use crate::config::parse_endpoint;
use crate::context::SimContext;
use crate::error::{SimError, SimResult};
use crate::event::{Action, EventQueue, Fired, TraceRecord};
use crate::request::{IoStatus, Request, ResponseSink};
use crate::types::{period_from_mhz, ComponentId, Cycles, EventId, PortId, SimTime};

/// Statistics collected by the simulation engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EngineStats {
    /// Scheduled component events fired
    pub events_fired: u64,
    /// Requests submitted through master ports
    pub requests: u64,
    /// Requests answered with `Denied`
    pub denied: u64,
    /// Requests answered with `Pending`
    pub pending: u64,
    /// Asynchronous responses delivered
    pub responses: u64,
    /// Grants delivered
    pub grants: u64,
    /// Wire values propagated
    pub wire_updates: u64,
}

struct Slot {
    path: String,
    type_name: &'static str,
    component: Option<Box<dyn Component>>,
    ports: Vec<PortDesc>,
    peers: Vec<Option<(ComponentId, PortId)>>,
    period: SimTime,
}

/// The global simulation engine.
///
/// # Example
///
/// ```ignore
/// let mut engine = SimulationEngine::new();
/// let mem = engine.add_component("mem", Box::new(Memory::new(4096, 1)))?;
/// let cpu = engine.add_component("cpu", Box::new(ScriptedMaster::new()))?;
/// engine.bind_paths("cpu:out", "mem:input")?;
/// engine.start()?;
/// let exit_code = engine.join()?;
/// ```
pub struct SimulationEngine {
    slots: Vec<Slot>,
    by_path: HashMap<String, ComponentId>,
    queue: EventQueue,
    now: SimTime,
    default_period: SimTime,
    max_time: Option<SimTime>,
    started: bool,
    quit_requested: bool,
    exit_code: Option<i32>,
    halted: Option<String>,
    stats: EngineStats,
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationEngine {
    /// Creates an engine whose components default to a 1 GHz clock.
    pub fn new() -> Self {
        Self::with_default_period(1000)
    }

    /// Creates an engine with the given default clock period in picoseconds.
    pub fn with_default_period(period: SimTime) -> Self {
        Self {
            slots: Vec::new(),
            by_path: HashMap::new(),
            queue: EventQueue::new(),
            now: 0,
            default_period: period.max(1),
            max_time: None,
            started: false,
            quit_requested: false,
            exit_code: None,
            halted: None,
            stats: EngineStats::default(),
        }
    }

    /// Creates an engine with the given default clock frequency.
    pub fn with_frequency_mhz(frequency_mhz: u64) -> SimResult<Self> {
        let period = period_from_mhz(frequency_mhz)
            .ok_or_else(|| SimError::fatal("engine", "clock frequency must be non-zero"))?;
        Ok(Self::with_default_period(period))
    }

    /// Limits `run` to events due at or before `time`.
    pub fn set_max_time(&mut self, time: Option<SimTime>) {
        self.max_time = time;
    }

    /// Records every fired item for later inspection.
    pub fn enable_trace(&mut self) {
        self.queue.enable_trace();
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Adds a component at a hierarchical `path`.
    pub fn add_component(
        &mut self,
        path: impl Into<String>,
        component: Box<dyn Component>,
    ) -> SimResult<ComponentId> {
        let path = path.into();
        if path.is_empty() || path.split('/').any(str::is_empty) || path.contains(':') {
            return Err(SimError::Binding(format!("invalid component path '{}'", path)));
        }
        if self.by_path.contains_key(&path) {
            return Err(SimError::Binding(format!("duplicate component path '{}'", path)));
        }

        let ports = component.ports();
        for (index, port) in ports.iter().enumerate() {
            if ports[..index].iter().any(|p| p.name == port.name) {
                return Err(SimError::Binding(format!(
                    "component '{}' declares port '{}' twice",
                    path, port.name
                )));
            }
        }

        let id = self.slots.len();
        debug!(component = %path, id, kind = component.type_name(), "component added");
        self.slots.push(Slot {
            path: path.clone(),
            type_name: component.type_name(),
            peers: vec![None; ports.len()],
            ports,
            component: Some(component),
            period: self.default_period,
        });
        self.by_path.insert(path, id);
        Ok(id)
    }

    /// Sets the clock period of a component, in picoseconds.
    pub fn set_period(&mut self, id: ComponentId, period: SimTime) -> SimResult<()> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| SimError::NoSuchComponent(id.to_string()))?;
        if period == 0 {
            return Err(SimError::fatal(slot.path.clone(), "clock period must be non-zero"));
        }
        slot.period = period;
        Ok(())
    }

    /// Sets the clock frequency of a component, in MHz.
    pub fn set_frequency_mhz(&mut self, id: ComponentId, frequency_mhz: u64) -> SimResult<()> {
        let period = period_from_mhz(frequency_mhz).ok_or_else(|| {
            SimError::fatal(
                self.path(id).unwrap_or("?").to_string(),
                "clock frequency must be non-zero",
            )
        })?;
        self.set_period(id, period)
    }

    fn port_index(&self, id: ComponentId, port: &str) -> SimResult<PortId> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| SimError::NoSuchComponent(id.to_string()))?;
        slot.ports
            .iter()
            .position(|p| p.name == port)
            .ok_or_else(|| SimError::Binding(format!("'{}' has no port '{}'", slot.path, port)))
    }

    /// Binds master port `master_port` of `master` to slave port
    /// `slave_port` of `slave`.
    ///
    /// Both ports must have the same interface type, the first must be a
    /// master and the second a slave, and neither may already be bound.
    pub fn bind(
        &mut self,
        master: ComponentId,
        master_port: &str,
        slave: ComponentId,
        slave_port: &str,
    ) -> SimResult<()> {
        let mport = self.port_index(master, master_port)?;
        let sport = self.port_index(slave, slave_port)?;

        let mdesc = &self.slots[master].ports[mport];
        let sdesc = &self.slots[slave].ports[sport];
        if !mdesc.can_bind_to(sdesc) {
            return Err(SimError::Binding(format!(
                "cannot bind {}:{} ({:?} {:?}) to {}:{} ({:?} {:?})",
                self.slots[master].path,
                master_port,
                mdesc.kind,
                mdesc.direction,
                self.slots[slave].path,
                slave_port,
                sdesc.kind,
                sdesc.direction,
            )));
        }
        for (id, port, name) in [(master, mport, master_port), (slave, sport, slave_port)] {
            if self.slots[id].peers[port].is_some() {
                return Err(SimError::Binding(format!(
                    "port {}:{} is already bound",
                    self.slots[id].path, name
                )));
            }
        }

        self.slots[master].peers[mport] = Some((slave, sport));
        self.slots[slave].peers[sport] = Some((master, mport));
        debug!(
            master = %self.slots[master].path,
            master_port,
            slave = %self.slots[slave].path,
            slave_port,
            "ports bound"
        );
        Ok(())
    }

    /// Binds two `"path:port"` endpoints.
    pub fn bind_paths(&mut self, master: &str, slave: &str) -> SimResult<()> {
        let (mpath, mport) = parse_endpoint(master)?;
        let (spath, sport) = parse_endpoint(slave)?;
        let mid = self
            .lookup(mpath)
            .ok_or_else(|| SimError::NoSuchComponent(mpath.to_string()))?;
        let sid = self
            .lookup(spath)
            .ok_or_else(|| SimError::NoSuchComponent(spath.to_string()))?;
        self.bind(mid, mport, sid, sport)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Current simulated time in picoseconds.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of components.
    pub fn component_count(&self) -> usize {
        self.slots.len()
    }

    /// Finds a component by hierarchical path.
    pub fn lookup(&self, path: &str) -> Option<ComponentId> {
        self.by_path.get(path).copied()
    }

    /// Returns the hierarchical path of a component.
    pub fn path(&self, id: ComponentId) -> Option<&str> {
        self.slots.get(id).map(|slot| slot.path.as_str())
    }

    /// Returns the components whose path is directly below `path`.
    pub fn children(&self, path: &str) -> Vec<ComponentId> {
        let prefix = format!("{}/", path);
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| {
                slot.path
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| !rest.contains('/'))
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Describes a component.
    pub fn describe(&self, id: ComponentId) -> Option<ComponentDesc> {
        self.slots.get(id).map(|slot| ComponentDesc {
            path: slot.path.clone(),
            type_name: slot.type_name.to_string(),
            period: slot.period,
            ports: slot.ports.clone(),
        })
    }

    /// Clock period of a component in picoseconds.
    pub fn period_of(&self, id: ComponentId) -> SimTime {
        self.slots
            .get(id)
            .map(|slot| slot.period)
            .unwrap_or(self.default_period)
    }

    /// Returns the peer bound to `port` of `id`.
    pub fn peer_of(&self, id: ComponentId, port: PortId) -> Option<(ComponentId, PortId)> {
        self.slots.get(id)?.peers.get(port).copied().flatten()
    }

    /// Typed access to a component, for inspection between runs.
    pub fn component<T: Component>(&self, id: ComponentId) -> Option<&T> {
        let boxed = self.slots.get(id)?.component.as_ref()?;
        <dyn Component as crate::component::AsAny>::as_any(boxed.as_ref()).downcast_ref::<T>()
    }

    /// Typed mutable access to a component, for preloading state.
    pub fn component_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        let boxed = self.slots.get_mut(id)?.component.as_mut()?;
        <dyn Component as crate::component::AsAny>::as_any_mut(boxed.as_mut()).downcast_mut::<T>()
    }

    /// Typed access to a component by path.
    pub fn component_by_path<T: Component>(&self, path: &str) -> Option<&T> {
        self.component(self.lookup(path)?)
    }

    /// Typed mutable access to a component by path.
    pub fn component_by_path_mut<T: Component>(&mut self, path: &str) -> Option<&mut T> {
        let id = self.lookup(path)?;
        self.component_mut(id)
    }

    /// Exit code passed to `quit`, if any component called it.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Returns true once a component called `quit`.
    pub fn is_quit(&self) -> bool {
        self.quit_requested
    }

    /// Number of items still scheduled.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Recorded event trace (empty unless tracing was enabled).
    pub fn trace(&self) -> &[TraceRecord] {
        self.queue.trace()
    }

    /// Returns the engine statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub(crate) fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub(crate) fn queue_mut(&mut self) -> &mut EventQueue {
        &mut self.queue
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Runs `f` on component `id` with a fresh context, taking the
    /// component out of the arena for the duration of the call.
    fn with_component<R>(
        &mut self,
        id: ComponentId,
        caller: Option<ComponentId>,
        f: impl FnOnce(&mut dyn Component, &mut SimContext<'_>) -> SimResult<R>,
    ) -> SimResult<R> {
        let slot = self
            .slots
            .get_mut(id)
            .ok_or_else(|| SimError::NoSuchComponent(id.to_string()))?;
        let Some(mut component) = slot.component.take() else {
            let caller = caller
                .and_then(|c| self.path(c))
                .unwrap_or("host")
                .to_string();
            return Err(SimError::Reentrant {
                component: self.slots[id].path.clone(),
                caller,
            });
        };
        let result = {
            let mut ctx = SimContext::new(self, id);
            f(component.as_mut(), &mut ctx)
        };
        self.slots[id].component = Some(component);
        result
    }

    fn checked_peer(
        &self,
        id: ComponentId,
        port: PortId,
        kind: PortKind,
        direction: PortDirection,
    ) -> SimResult<(ComponentId, PortId)> {
        let slot = &self.slots[id];
        let desc = slot.ports.get(port).ok_or_else(|| SimError::UnknownPort {
            component: slot.path.clone(),
            port,
        })?;
        if desc.kind != kind || desc.direction != direction {
            return Err(SimError::fatal(
                slot.path.clone(),
                format!(
                    "port '{}' is {:?} {:?}, used as {:?} {:?}",
                    desc.name, desc.kind, desc.direction, kind, direction
                ),
            ));
        }
        slot.peers[port].ok_or_else(|| SimError::Unbound {
            component: slot.path.clone(),
            port: desc.name.clone(),
        })
    }

    pub(crate) fn dispatch_req(
        &mut self,
        from: ComponentId,
        port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        let (peer, peer_port) = self.checked_peer(from, port, PortKind::Io, PortDirection::Master)?;
        self.stats.requests += 1;
        req.push_sink(ResponseSink {
            component: from,
            port,
        });
        let status = self.with_component(peer, Some(from), |component, ctx| {
            component.handle_req(ctx, peer_port, req)
        })?;
        Ok(match status {
            IoStatus::Completed(mut req) => {
                req.pop_sink();
                IoStatus::Completed(req)
            }
            IoStatus::Denied(mut req) => {
                req.pop_sink();
                self.stats.denied += 1;
                IoStatus::Denied(req)
            }
            IoStatus::Pending => {
                self.stats.pending += 1;
                IoStatus::Pending
            }
        })
    }

    pub(crate) fn dispatch_resp(&mut self, from: ComponentId, mut req: Request) -> SimResult<()> {
        let sink = req.pop_sink().ok_or_else(|| {
            SimError::fatal(
                self.slots[from].path.clone(),
                format!("response for request at 0x{:x} has no initiator", req.addr),
            )
        })?;
        self.queue
            .schedule_response(sink.component, sink.port, req, self.now);
        Ok(())
    }

    pub(crate) fn dispatch_grant(&mut self, from: ComponentId, port: PortId) -> SimResult<()> {
        let (peer, peer_port) = self.checked_peer(from, port, PortKind::Io, PortDirection::Slave)?;
        self.queue.schedule_grant(peer, peer_port, self.now);
        Ok(())
    }

    pub(crate) fn dispatch_wire(
        &mut self,
        from: ComponentId,
        port: PortId,
        value: u64,
    ) -> SimResult<()> {
        let (peer, peer_port) =
            self.checked_peer(from, port, PortKind::Wire, PortDirection::Master)?;
        self.stats.wire_updates += 1;
        self.with_component(peer, Some(from), |component, ctx| {
            component.handle_wire(ctx, peer_port, value)
        })
    }

    pub(crate) fn dispatch_clock(
        &mut self,
        from: ComponentId,
        port: PortId,
        signal: ClockSignal,
    ) -> SimResult<()> {
        let (peer, _) = self.checked_peer(from, port, PortKind::Clock, PortDirection::Master)?;
        match signal {
            ClockSignal::SetPeriod(period) => self.set_period(peer, period),
            ClockSignal::Reset(active) => self.with_component(peer, Some(from), |component, ctx| {
                component.reset(ctx, active)
            }),
        }
    }

    pub(crate) fn quit_from(&mut self, component: &str, code: i32) {
        info!(component, code, time = self.now, "simulation quit requested");
        self.quit_requested = true;
        self.exit_code = Some(code);
    }

    fn dispatch(&mut self, fired: Fired) -> SimResult<()> {
        self.now = fired.time;
        let target = fired.target;
        match fired.action {
            Action::Fire(event) => {
                self.stats.events_fired += 1;
                self.with_component(target, None, |component, ctx| {
                    component.handle_event(ctx, event)
                })
            }
            Action::Respond { port, request } => {
                self.stats.responses += 1;
                self.with_component(target, None, |component, ctx| {
                    component.handle_resp(ctx, port, request)
                })
            }
            Action::Grant { port } => {
                self.stats.grants += 1;
                self.with_component(target, None, |component, ctx| {
                    component.handle_grant(ctx, port)
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Host access
    // ------------------------------------------------------------------

    /// Schedules `event` of component `id` from the host, `cycles` cycles
    /// of the component's clock from now.
    pub fn schedule(&mut self, id: ComponentId, event: EventId, cycles: Cycles) -> bool {
        let due = self.due_after(id, cycles);
        self.queue.schedule_event(id, event, due)
    }

    /// Time of the clock edge of `id` lying `cycles` cycles after the
    /// current time. Off-edge times are first rounded up to the next edge.
    pub(crate) fn due_after(&self, id: ComponentId, cycles: Cycles) -> SimTime {
        let period = self.period_of(id).max(1);
        self.now.div_ceil(period) * period + cycles * period
    }

    /// Drives `value` into wire slave `port` of `id` from the host.
    pub fn drive_wire(&mut self, id: ComponentId, port: &str, value: u64) -> SimResult<()> {
        let port = self.port_index(id, port)?;
        let desc = &self.slots[id].ports[port];
        if desc.kind != PortKind::Wire || desc.direction != PortDirection::Slave {
            return Err(SimError::Binding(format!(
                "{}:{} is not a wire slave port",
                self.slots[id].path, desc.name
            )));
        }
        self.stats.wire_updates += 1;
        self.with_component(id, None, |component, ctx| {
            component.handle_wire(ctx, port, value)
        })
    }

    // ------------------------------------------------------------------
    // Run control
    // ------------------------------------------------------------------

    fn reset_all(&mut self, active: bool) -> SimResult<()> {
        for id in 0..self.slots.len() {
            self.with_component(id, None, |component, ctx| component.reset(ctx, active))?;
        }
        Ok(())
    }

    /// Asserts then releases reset on every component, in creation order.
    pub fn start(&mut self) -> SimResult<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        info!(components = self.slots.len(), "simulation starting");
        self.reset_all(true)?;
        self.reset_all(false)
    }

    fn check_halted(&self) -> SimResult<()> {
        match &self.halted {
            Some(reason) => Err(SimError::fatal(
                "engine",
                format!("simulation halted: {}", reason),
            )),
            None => Ok(()),
        }
    }

    /// Fires every event due at or before `limit` (all events if `None`),
    /// stopping early on `quit` or on a fatal error.
    fn run_bounded(&mut self, limit: Option<SimTime>) -> SimResult<()> {
        self.check_halted()?;
        self.start()?;
        while !self.quit_requested {
            let Some(due) = self.queue.peek_time() else {
                break;
            };
            if limit.is_some_and(|limit| due > limit) {
                break;
            }
            let Some(fired) = self.queue.pop() else {
                break;
            };
            if let Err(err) = self.dispatch(fired) {
                error!(time = self.now, error = %err, "fatal error, halting simulation");
                self.halted = Some(err.to_string());
                self.queue.clear();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs until the queue drains, a component quits, or the configured
    /// maximum time is reached.
    pub fn run(&mut self) -> SimResult<()> {
        self.run_bounded(self.max_time)
    }

    /// Runs every event due within `duration` picoseconds from now, then
    /// advances the clock to the end of the window.
    pub fn step(&mut self, duration: SimTime) -> SimResult<()> {
        self.run_until(self.now + duration)
    }

    /// Runs every event due at or before `time`, then advances the clock to
    /// `time` unless a component quit earlier.
    pub fn run_until(&mut self, time: SimTime) -> SimResult<()> {
        self.run_bounded(Some(time))?;
        if !self.quit_requested && time > self.now {
            self.now = time;
        }
        Ok(())
    }

    /// Runs to completion and returns the exit code.
    ///
    /// Returns `Ok(None)` if the queue drained without any component
    /// calling `quit`.
    pub fn join(&mut self) -> SimResult<Option<i32>> {
        if !self.quit_requested {
            self.run()?;
        }
        if self.exit_code.is_none() && self.queue.is_empty() {
            warn!(time = self.now, "event queue drained without quit");
        }
        Ok(self.exit_code)
    }

    /// Exports statistics from the engine and all components.
    pub fn export_stats(&self) -> serde_json::Value {
        let mut component_stats = serde_json::Map::new();
        for slot in &self.slots {
            if let Some(component) = slot.component.as_ref() {
                let mut stats = component.export_stats();
                if let Some(map) = stats.as_object_mut() {
                    map.insert("type".to_string(), slot.type_name.into());
                }
                component_stats.insert(slot.path.clone(), stats);
            }
        }

        serde_json::json!({
            "engine": {
                "current_time": self.now,
                "exit_code": self.exit_code,
                "component_count": self.slots.len(),
                "events_fired": self.stats.events_fired,
                "requests": self.stats.requests,
                "denied": self.stats.denied,
                "pending": self.stats.pending,
                "responses": self.stats.responses,
                "grants": self.stats.grants,
                "wire_updates": self.stats.wire_updates,
                "pending_events": self.queue.len(),
            },
            "components": component_stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Slave that completes reads immediately and parks writes until a
    /// fixed delay has elapsed.
    struct Responder {
        delay: Cycles,
        parked: Option<Request>,
        deny_next: bool,
        denied_port: Option<PortId>,
    }

    impl Responder {
        fn new(delay: Cycles) -> Self {
            Self {
                delay,
                parked: None,
                deny_next: false,
                denied_port: None,
            }
        }
    }

    impl Component for Responder {
        fn type_name(&self) -> &'static str {
            "Responder"
        }

        fn ports(&self) -> Vec<PortDesc> {
            vec![PortDesc::io_slave("input")]
        }

        fn handle_req(
            &mut self,
            ctx: &mut SimContext<'_>,
            port: PortId,
            mut req: Request,
        ) -> SimResult<IoStatus> {
            if self.deny_next || self.parked.is_some() {
                self.deny_next = false;
                self.denied_port = Some(port);
                return Ok(IoStatus::Denied(req));
            }
            if req.is_write {
                self.parked = Some(req);
                ctx.enqueue(0, self.delay);
                Ok(IoStatus::Pending)
            } else {
                req.inc_latency(2);
                Ok(IoStatus::Completed(req))
            }
        }

        fn handle_event(&mut self, ctx: &mut SimContext<'_>, event: EventId) -> SimResult<()> {
            if event != 0 {
                return Err(SimError::UnknownEvent {
                    component: ctx.name().to_string(),
                    event,
                });
            }
            if let Some(req) = self.parked.take() {
                ctx.resp(req)?;
            }
            if let Some(port) = self.denied_port.take() {
                ctx.grant(port)?;
            }
            Ok(())
        }
    }

    /// Master that issues its script one request per cycle and logs
    /// everything it observes.
    #[derive(Default)]
    struct Issuer {
        script: Vec<Request>,
        stash: Option<Request>,
        log: Vec<(SimTime, String)>,
        quit_after: Option<usize>,
    }

    impl Issuer {
        fn issue(&mut self, ctx: &mut SimContext<'_>, req: Request) -> SimResult<()> {
            let addr = req.addr;
            match ctx.req(0, req)? {
                IoStatus::Completed(req) => self
                    .log
                    .push((ctx.now(), format!("completed {:x} lat {}", addr, req.latency))),
                IoStatus::Pending => self.log.push((ctx.now(), format!("pending {:x}", addr))),
                IoStatus::Denied(req) => {
                    self.log.push((ctx.now(), format!("denied {:x}", addr)));
                    self.stash = Some(req);
                }
            }
            Ok(())
        }
    }

    impl Component for Issuer {
        fn type_name(&self) -> &'static str {
            "Issuer"
        }

        fn ports(&self) -> Vec<PortDesc> {
            vec![PortDesc::io_master("out")]
        }

        fn reset(&mut self, ctx: &mut SimContext<'_>, active: bool) -> SimResult<()> {
            if !active && !self.script.is_empty() {
                ctx.enqueue(0, 1);
            }
            Ok(())
        }

        fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
            if self.stash.is_none() && !self.script.is_empty() {
                let req = self.script.remove(0);
                self.issue(ctx, req)?;
            }
            if !self.script.is_empty() {
                ctx.enqueue(0, 1);
            }
            Ok(())
        }

        fn handle_resp(&mut self, ctx: &mut SimContext<'_>, _port: PortId, req: Request) -> SimResult<()> {
            self.log.push((ctx.now(), format!("resp {:x}", req.addr)));
            if self.quit_after.is_some_and(|n| self.log.len() >= n) {
                ctx.quit(3);
            }
            Ok(())
        }

        fn handle_grant(&mut self, ctx: &mut SimContext<'_>, _port: PortId) -> SimResult<()> {
            self.log.push((ctx.now(), "grant".to_string()));
            if let Some(req) = self.stash.take() {
                self.issue(ctx, req)?;
            }
            Ok(())
        }
    }

    fn pair(script: Vec<Request>, delay: Cycles) -> (SimulationEngine, ComponentId, ComponentId) {
        let mut engine = SimulationEngine::new();
        let issuer = engine
            .add_component(
                "top/issuer",
                Box::new(Issuer {
                    script,
                    ..Default::default()
                }),
            )
            .unwrap();
        let responder = engine
            .add_component("top/responder", Box::new(Responder::new(delay)))
            .unwrap();
        engine.bind_paths("top/issuer:out", "top/responder:input").unwrap();
        (engine, issuer, responder)
    }

    #[test]
    fn test_engine_creation() {
        let engine = SimulationEngine::new();
        assert_eq!(engine.now(), 0);
        assert_eq!(engine.component_count(), 0);
        assert!(SimulationEngine::with_frequency_mhz(0).is_err());
    }

    #[test]
    fn test_lookup_and_tree() {
        let (engine, issuer, responder) = pair(Vec::new(), 1);
        assert_eq!(engine.lookup("top/issuer"), Some(issuer));
        assert_eq!(engine.path(responder), Some("top/responder"));
        assert_eq!(engine.children("top"), vec![issuer, responder]);
        assert!(engine.children("top/issuer").is_empty());
        assert_eq!(engine.describe(issuer).unwrap().type_name, "Issuer");
        assert!(engine.component::<Issuer>(issuer).is_some());
        assert!(engine.component::<Responder>(issuer).is_none());
    }

    #[test]
    fn test_binding_validation() {
        let (mut engine, issuer, responder) = pair(Vec::new(), 1);
        // already bound
        assert!(engine.bind(issuer, "out", responder, "input").is_err());
        // wrong direction
        let other = engine
            .add_component("other", Box::new(Responder::new(1)))
            .unwrap();
        assert!(engine.bind(other, "input", responder, "input").is_err());
        assert!(engine.bind_paths("nope:out", "other:input").is_err());
        assert!(engine.add_component("other", Box::new(Responder::new(1))).is_err());
    }

    #[test]
    fn test_completed_request() {
        let (mut engine, issuer, _) = pair(vec![Request::read(0x10, 4)], 1);
        assert_eq!(engine.join().unwrap(), None);
        let log = &engine.component::<Issuer>(issuer).unwrap().log;
        assert_eq!(log, &vec![(1000, "completed 10 lat 2".to_string())]);
        assert_eq!(engine.stats().requests, 1);
    }

    #[test]
    fn test_pending_then_response() {
        let (mut engine, issuer, _) = pair(vec![Request::write(0x20, vec![1; 4])], 5);
        engine.run().unwrap();
        let log = &engine.component::<Issuer>(issuer).unwrap().log;
        assert_eq!(
            log,
            &vec![
                (1000, "pending 20".to_string()),
                (6000, "resp 20".to_string()),
            ]
        );
        assert_eq!(engine.stats().responses, 1);
    }

    #[test]
    fn test_denied_then_granted() {
        let script = vec![Request::write(0x1, vec![0; 4]), Request::read(0x2, 4)];
        let (mut engine, issuer, _) = pair(script, 3);
        engine.run().unwrap();
        let log = &engine.component::<Issuer>(issuer).unwrap().log;
        assert_eq!(
            log,
            &vec![
                (1000, "pending 1".to_string()),
                (2000, "denied 2".to_string()),
                (4000, "resp 1".to_string()),
                (4000, "grant".to_string()),
                (4000, "completed 2 lat 2".to_string()),
            ]
        );
        assert_eq!(engine.stats().denied, 1);
        assert_eq!(engine.stats().grants, 1);
    }

    #[test]
    fn test_quit_stops_run() {
        let script = vec![
            Request::write(0x1, vec![0; 4]),
            Request::read(0x2, 4),
            Request::read(0x3, 4),
        ];
        let (mut engine, issuer, _) = pair(script, 1);
        engine.component_mut::<Issuer>(issuer).unwrap().quit_after = Some(2);
        assert_eq!(engine.join().unwrap(), Some(3));
        assert!(engine.is_quit());
        assert_eq!(engine.now(), 2000);
    }

    #[test]
    fn test_step_and_run_until() {
        let (mut engine, issuer, _) = pair(vec![Request::write(0x20, vec![1; 4])], 5);
        engine.step(1500).unwrap();
        assert_eq!(engine.now(), 1500);
        assert_eq!(engine.component::<Issuer>(issuer).unwrap().log.len(), 1);
        engine.run_until(10_000).unwrap();
        assert_eq!(engine.now(), 10_000);
        assert_eq!(engine.component::<Issuer>(issuer).unwrap().log.len(), 2);
    }

    struct Looper;

    impl Component for Looper {
        fn type_name(&self) -> &'static str {
            "Looper"
        }

        fn ports(&self) -> Vec<PortDesc> {
            vec![PortDesc::io_master("out"), PortDesc::io_slave("input")]
        }

        fn reset(&mut self, ctx: &mut SimContext<'_>, active: bool) -> SimResult<()> {
            if !active {
                ctx.enqueue(0, 0);
            }
            Ok(())
        }

        fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
            let _ = ctx.req(0, Request::read(0, 4))?;
            Ok(())
        }
    }

    #[test]
    fn test_reentrant_call_is_fatal() {
        let mut engine = SimulationEngine::new();
        engine.add_component("loop", Box::new(Looper)).unwrap();
        engine.bind_paths("loop:out", "loop:input").unwrap();
        let err = engine.run().unwrap_err();
        assert!(matches!(err, SimError::Reentrant { .. }));
        // the engine stays halted
        assert!(engine.run().is_err());
    }

    #[test]
    fn test_unknown_event_is_fatal() {
        let (mut engine, _, responder) = pair(Vec::new(), 1);
        engine.schedule(responder, 9, 1);
        let err = engine.run().unwrap_err();
        assert!(matches!(err, SimError::UnknownEvent { event: 9, .. }));
    }

    #[test]
    fn test_per_component_clock() {
        let (mut engine, issuer, _) = pair(vec![Request::read(0x10, 4)], 1);
        engine.set_frequency_mhz(issuer, 500).unwrap();
        engine.run().unwrap();
        let log = &engine.component::<Issuer>(issuer).unwrap().log;
        assert_eq!(log[0].0, 2000);
    }

    #[test]
    fn test_enqueue_from_other_domain_lands_on_edge() {
        let (mut engine, issuer, responder) = pair(vec![Request::write(0x30, vec![0; 4])], 1);
        engine.set_period(responder, 3000).unwrap();
        engine.run().unwrap();
        // woken at 1000, the responder counts from its edge at 3000
        let log = &engine.component::<Issuer>(issuer).unwrap().log;
        assert_eq!(
            log,
            &vec![
                (1000, "pending 30".to_string()),
                (6000, "resp 30".to_string()),
            ]
        );

        assert_eq!(engine.due_after(responder, 0), 6000);
        assert_eq!(engine.due_after(responder, 2), 12_000);
    }

    #[test]
    fn test_export_stats() {
        let (mut engine, _, _) = pair(vec![Request::read(0x10, 4)], 1);
        engine.run().unwrap();
        let stats = engine.export_stats();
        assert_eq!(stats["engine"]["requests"], 1);
        assert_eq!(stats["components"]["top/issuer"]["type"], "Issuer");
    }
}
