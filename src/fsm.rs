//! Building blocks shared by the timing-model state machines.
//!
//! Every timing-accurate accelerator follows the same skeleton, stepped by
//! one self-re-armed event per cycle: compute the number of memory blocks a
//! phase needs, drip-feed them under a queue-depth limit, wait for the
//! outstanding ones to land, then move to the next phase.
//! [`BlockStreamer`] owns the counters of that loop and [`StateTracker`]
//! keeps the current state together with the transitions taken by the
//! current job.

use std::collections::VecDeque;
use std::fmt::Debug;

use crate::types::Cycles;

/// Finite state of a timing model.
///
/// Models start in `IDLE`, and `FINISHED` is the single terminal state that
/// is rearmed back to `IDLE` once the job has been acknowledged.
pub trait TimingState: Copy + Eq + Debug {
    const IDLE: Self;
    const FINISHED: Self;

    fn is_idle(self) -> bool {
        self == Self::IDLE
    }

    fn is_finished(self) -> bool {
        self == Self::FINISHED
    }
}

/// Current state of a model plus the transitions of the running job.
#[derive(Clone, Debug)]
pub struct StateTracker<S: TimingState> {
    current: S,
    history: Vec<S>,
}

impl<S: TimingState> Default for StateTracker<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: TimingState> StateTracker<S> {
    /// Creates a tracker in the idle state.
    pub fn new() -> Self {
        Self {
            current: S::IDLE,
            history: vec![S::IDLE],
        }
    }

    /// Returns the current state.
    pub fn get(&self) -> S {
        self.current
    }

    /// Moves to `next`, recording the transition if the state changes.
    pub fn set(&mut self, next: S) {
        if next != self.current {
            tracing::trace!(from = ?self.current, to = ?next, "state transition");
            self.history.push(next);
        }
        self.current = next;
    }

    /// Forgets the transitions of the previous job.
    pub fn begin_job(&mut self) {
        self.history.clear();
        self.history.push(self.current);
    }

    /// States visited by the current job, in order, starting with the state
    /// it was triggered in.
    pub fn history(&self) -> &[S] {
        &self.history
    }

    /// Number of times `state` was entered during the current job.
    pub fn entries(&self, state: S) -> usize {
        self.history.iter().skip(1).filter(|&&s| s == state).count()
    }
}

/// Drip-feed counters of one FSM phase.
///
/// The model calls [`tick`](Self::tick) once per cycle, issues one block
/// whenever [`can_issue`](Self::can_issue) allows it, records its expected
/// completion with [`record_issue`](Self::record_issue), retires landed
/// blocks with [`drain`](Self::drain) and advances once
/// [`is_drained`](Self::is_drained) holds.
#[derive(Clone, Debug)]
pub struct BlockStreamer {
    total: u64,
    issued: u64,
    timestamp: Cycles,
    queue_depth: usize,
    outstanding: VecDeque<Cycles>,
    blocks_issued_total: u64,
}

impl BlockStreamer {
    /// Creates a streamer that allows at most `queue_depth + 1` blocks in
    /// flight.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            total: 0,
            issued: 0,
            timestamp: 0,
            queue_depth,
            outstanding: VecDeque::new(),
            blocks_issued_total: 0,
        }
    }

    /// Starts a phase that needs `total` blocks; the phase clock restarts at 0.
    pub fn rearm(&mut self, total: u64) {
        self.total = total;
        self.issued = 0;
        self.timestamp = 0;
    }

    /// Advances the phase clock by one cycle and returns the new value.
    pub fn tick(&mut self) -> Cycles {
        self.timestamp += 1;
        self.timestamp
    }

    /// Returns true if another block may be issued this cycle.
    pub fn can_issue(&self) -> bool {
        self.issued < self.total && self.outstanding.len() <= self.queue_depth
    }

    /// Records a block issued this cycle that will land after `latency` cycles.
    pub fn record_issue(&mut self, latency: Cycles) {
        self.outstanding.push_back(self.timestamp + latency);
        self.issued += 1;
        self.blocks_issued_total += 1;
    }

    /// Retires every block whose completion cycle has been reached.
    /// Returns the number of retired blocks.
    pub fn drain(&mut self) -> usize {
        let mut retired = 0;
        while self
            .outstanding
            .front()
            .is_some_and(|&stamp| stamp <= self.timestamp)
        {
            self.outstanding.pop_front();
            retired += 1;
        }
        retired
    }

    /// Returns true once every block was issued and has landed.
    pub fn is_drained(&self) -> bool {
        self.issued >= self.total && self.outstanding.is_empty()
    }

    /// Phase clock, in cycles since the last `rearm`.
    pub fn timestamp(&self) -> Cycles {
        self.timestamp
    }

    /// Blocks issued in the current phase.
    pub fn issued(&self) -> u64 {
        self.issued
    }

    /// Blocks the current phase needs.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Blocks in flight.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Blocks issued since creation.
    pub fn blocks_issued_total(&self) -> u64 {
        self.blocks_issued_total
    }
}
