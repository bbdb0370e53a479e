//! Time-ordered event queue of the simulation kernel.
//!
//! Every scheduled item fires at an absolute `due` time. Items with equal
//! `due` fire in insertion order, which is what makes two runs of the same
//! platform produce the same trace.
//!
//! Self-re-arming component events go through an arming table: an event is
//! identified by `(ComponentId, EventId)` and is armed at most once. Arming
//! it again for a later or equal time is a no-op, arming it for an earlier
//! time supersedes the old entry. Superseded and cancelled heap entries are
//! left in place and skipped when they surface.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::request::Request;
use crate::types::{ComponentId, EventId, PortId, SimTime};

/// What happens when a scheduled item fires.
#[derive(Debug)]
pub enum Action {
    /// Run the target's `handle_event`.
    Fire(EventId),
    /// Deliver a response to the target's master port.
    Respond { port: PortId, request: Request },
    /// Deliver a grant to the target's master port.
    Grant { port: PortId },
}

impl Action {
    /// Returns the traceable kind of the action.
    pub fn kind(&self) -> TraceAction {
        match self {
            Action::Fire(event) => TraceAction::Event(*event),
            Action::Respond { port, .. } => TraceAction::Response(*port),
            Action::Grant { port } => TraceAction::Grant(*port),
        }
    }
}

/// Kind of a fired item, as recorded in the event trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceAction {
    Event(EventId),
    Response(PortId),
    Grant(PortId),
}

/// One entry of the event trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Simulated time at which the item fired
    pub time: SimTime,
    /// Component that received it
    pub component: ComponentId,
    /// What was delivered
    pub action: TraceAction,
}

/// An item that has fired and must be dispatched by the engine.
#[derive(Debug)]
pub struct Fired {
    pub time: SimTime,
    pub target: ComponentId,
    pub action: Action,
}

struct Scheduled {
    due: SimTime,
    seq: u64,
    target: ComponentId,
    action: Action,
}

impl Eq for Scheduled {}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.due, self.seq) == (other.due, other.seq)
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reversed so the earliest (due, seq) pops first
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Global time-ordered queue of pending callbacks.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Scheduled>,
    /// Live arming of each component event: (due, seq of the live heap entry)
    armed: HashMap<(ComponentId, EventId), (SimTime, u64)>,
    next_seq: u64,
    /// Number of heap entries that will actually fire
    live: usize,
    fired: u64,
    trace: Option<Vec<TraceRecord>>,
}

impl EventQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, due: SimTime, target: ComponentId, action: Action) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled {
            due,
            seq,
            target,
            action,
        });
        self.live += 1;
        seq
    }

    /// Arms `event` of `target` to fire at `due`.
    ///
    /// Returns false if the event was already armed for `due` or earlier,
    /// in which case nothing changes.
    pub fn schedule_event(&mut self, target: ComponentId, event: EventId, due: SimTime) -> bool {
        if let Some(&(armed_due, _)) = self.armed.get(&(target, event)) {
            if armed_due <= due {
                return false;
            }
            // the old heap entry becomes stale
            self.live -= 1;
        }
        let seq = self.push(due, target, Action::Fire(event));
        self.armed.insert((target, event), (due, seq));
        true
    }

    /// Disarms `event` of `target`. Returns true if it was armed.
    pub fn cancel_event(&mut self, target: ComponentId, event: EventId) -> bool {
        if self.armed.remove(&(target, event)).is_some() {
            self.live -= 1;
            true
        } else {
            false
        }
    }

    /// Returns the time at which `event` of `target` is armed, if it is.
    pub fn armed_at(&self, target: ComponentId, event: EventId) -> Option<SimTime> {
        self.armed.get(&(target, event)).map(|&(due, _)| due)
    }

    /// Returns true if `event` of `target` is armed.
    pub fn is_armed(&self, target: ComponentId, event: EventId) -> bool {
        self.armed.contains_key(&(target, event))
    }

    /// Schedules delivery of a response to `target`'s master `port`.
    pub fn schedule_response(
        &mut self,
        target: ComponentId,
        port: PortId,
        request: Request,
        due: SimTime,
    ) {
        self.push(due, target, Action::Respond { port, request });
    }

    /// Schedules delivery of a grant to `target`'s master `port`.
    pub fn schedule_grant(&mut self, target: ComponentId, port: PortId, due: SimTime) {
        self.push(due, target, Action::Grant { port });
    }

    fn is_stale(&self, item: &Scheduled) -> bool {
        match item.action {
            Action::Fire(event) => match self.armed.get(&(item.target, event)) {
                Some(&(_, seq)) => seq != item.seq,
                None => true,
            },
            _ => false,
        }
    }

    fn purge_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_stale(top) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }

    /// Returns the due time of the next item that will fire.
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.purge_stale();
        self.heap.peek().map(|item| item.due)
    }

    /// Removes and returns the next item that will fire.
    pub fn pop(&mut self) -> Option<Fired> {
        self.purge_stale();
        let item = self.heap.pop()?;
        if let Action::Fire(event) = item.action {
            self.armed.remove(&(item.target, event));
        }
        self.live -= 1;
        self.fired += 1;
        if let Some(trace) = self.trace.as_mut() {
            trace.push(TraceRecord {
                time: item.due,
                component: item.target,
                action: item.action.kind(),
            });
        }
        Some(Fired {
            time: item.due,
            target: item.target,
            action: item.action,
        })
    }

    /// Number of items that will still fire.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Returns true if nothing will fire anymore.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total number of items fired since creation.
    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    /// Starts recording fired items.
    pub fn enable_trace(&mut self) {
        if self.trace.is_none() {
            self.trace = Some(Vec::new());
        }
    }

    /// Returns the recorded trace (empty if tracing is disabled).
    pub fn trace(&self) -> &[TraceRecord] {
        self.trace.as_deref().unwrap_or(&[])
    }

    /// Drops every pending item. Requests owned by pending responses are released.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.armed.clear();
        self.live = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fire_order(queue: &mut EventQueue) -> Vec<(SimTime, ComponentId, TraceAction)> {
        let mut out = Vec::new();
        while let Some(fired) = queue.pop() {
            out.push((fired.time, fired.target, fired.action.kind()));
        }
        out
    }

    #[test]
    fn test_time_order_and_fifo_ties() {
        let mut queue = EventQueue::new();
        queue.schedule_event(1, 0, 300);
        queue.schedule_event(2, 0, 100);
        queue.schedule_event(3, 0, 100);
        queue.schedule_grant(4, 1, 100);

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.peek_time(), Some(100));
        assert_eq!(
            fire_order(&mut queue),
            vec![
                (100, 2, TraceAction::Event(0)),
                (100, 3, TraceAction::Event(0)),
                (100, 4, TraceAction::Grant(1)),
                (300, 1, TraceAction::Event(0)),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_idempotent_enqueue() {
        let mut queue = EventQueue::new();
        assert!(queue.schedule_event(1, 7, 1000));
        assert!(!queue.schedule_event(1, 7, 1000));
        assert!(!queue.schedule_event(1, 7, 2000));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.armed_at(1, 7), Some(1000));

        assert_eq!(fire_order(&mut queue).len(), 1);
        assert!(!queue.is_armed(1, 7));
    }

    #[test]
    fn test_earlier_arming_supersedes() {
        let mut queue = EventQueue::new();
        queue.schedule_event(1, 0, 5000);
        assert!(queue.schedule_event(1, 0, 2000));
        assert_eq!(queue.len(), 1);

        assert_eq!(fire_order(&mut queue), vec![(2000, 1, TraceAction::Event(0))]);
    }

    #[test]
    fn test_cancel() {
        let mut queue = EventQueue::new();
        queue.schedule_event(1, 0, 100);
        queue.schedule_event(1, 1, 200);
        assert!(queue.cancel_event(1, 0));
        assert!(!queue.cancel_event(1, 0));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek_time(), Some(200));

        // re-arming after cancel works
        queue.schedule_event(1, 0, 300);
        assert_eq!(fire_order(&mut queue).len(), 2);
    }

    #[test]
    fn test_rearm_after_fire() {
        let mut queue = EventQueue::new();
        queue.schedule_event(1, 0, 100);
        let fired = queue.pop().unwrap();
        assert_eq!(fired.time, 100);
        assert!(queue.schedule_event(1, 0, 100));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_response_carries_request() {
        let mut queue = EventQueue::new();
        queue.schedule_response(2, 0, Request::write(0x10, vec![9; 4]), 50);
        let fired = queue.pop().unwrap();
        match fired.action {
            Action::Respond { port, request } => {
                assert_eq!(port, 0);
                assert_eq!(request.addr, 0x10);
                assert_eq!(request.data(), &[9; 4]);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_trace_recording() {
        let mut queue = EventQueue::new();
        queue.enable_trace();
        queue.schedule_event(1, 3, 10);
        queue.schedule_grant(2, 0, 20);
        fire_order(&mut queue);

        assert_eq!(
            queue.trace(),
            &[
                TraceRecord { time: 10, component: 1, action: TraceAction::Event(3) },
                TraceRecord { time: 20, component: 2, action: TraceAction::Grant(0) },
            ]
        );
        assert_eq!(queue.fired_count(), 2);
    }
}
