//! Scripted initiator for tests and benchmarks.
//!
//! [`ScriptedMaster`] plays the role of a core or DMA: it submits a list
//! of requests at given cycles on its `out` port and records every
//! outcome, honoring the full request protocol (stash on `Denied`,
//! resubmit on grant, wait for `resp` on `Pending`).

use std::collections::VecDeque;

use crate::component::{Component, PortDesc};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, IoStatusKind, Request};
use crate::types::{Cycles, EventId, PortId, SimTime};

/// A request that came back to the master.
#[derive(Debug)]
pub struct Completion {
    /// The request, with its payload and accumulated latency
    pub request: Request,
    /// `Completed` if answered synchronously, `Pending` if through `resp`
    pub status: IoStatusKind,
    /// Simulated time at which the master issued it
    pub issued_at: SimTime,
    /// Simulated time at which it came back
    pub time: SimTime,
}

/// A master that replays a request script.
#[derive(Debug, Default)]
pub struct ScriptedMaster {
    /// Requests still to issue, ordered by cycle
    script: VecDeque<(Cycles, Request)>,
    /// Request waiting for a grant
    stash: Option<Request>,
    /// Issue times of pending requests, oldest first
    in_flight: VecDeque<SimTime>,
    /// Exit code to quit with once the script is done
    quit_code: Option<i32>,
    /// Requests that came back, in arrival order
    pub completions: Vec<Completion>,
    /// Number of `Denied` outcomes observed
    pub denials: u64,
    /// Number of grants received
    pub grants: u64,
}

impl ScriptedMaster {
    /// Event that issues the requests due at the current cycle.
    pub const ISSUE: EventId = 0;

    /// Creates a master with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `req` to be issued at cycle `cycle`.
    pub fn with_request(mut self, cycle: Cycles, req: Request) -> Self {
        self.push_request(cycle, req);
        self
    }

    /// Quits the simulation with `code` once every request came back.
    pub fn with_quit_on_done(mut self, code: i32) -> Self {
        self.quit_code = Some(code);
        self
    }

    /// Adds a request to the script, keeping it ordered by cycle.
    pub fn push_request(&mut self, cycle: Cycles, req: Request) {
        let position = self
            .script
            .iter()
            .position(|(c, _)| *c > cycle)
            .unwrap_or(self.script.len());
        self.script.insert(position, (cycle, req));
    }

    /// Returns true once every request was issued and came back.
    pub fn is_done(&self) -> bool {
        self.script.is_empty() && self.stash.is_none() && self.in_flight.is_empty()
    }

    /// Returns true while a denied request waits for its grant.
    pub fn is_stalled(&self) -> bool {
        self.stash.is_some()
    }

    fn submit(&mut self, ctx: &mut SimContext<'_>, req: Request) -> SimResult<()> {
        let issued_at = ctx.now();
        match ctx.req(0, req)? {
            IoStatus::Completed(request) => self.completions.push(Completion {
                request,
                status: IoStatusKind::Completed,
                issued_at,
                time: ctx.now(),
            }),
            IoStatus::Pending => self.in_flight.push_back(issued_at),
            IoStatus::Denied(request) => {
                self.denials += 1;
                self.stash = Some(request);
            }
        }
        Ok(())
    }

    fn issue_due(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let now = ctx.cycles();
        while self.stash.is_none() && self.script.front().is_some_and(|(c, _)| *c <= now) {
            if let Some((_, req)) = self.script.pop_front() {
                self.submit(ctx, req)?;
            }
        }
        if self.stash.is_none() {
            if let Some(&(next, _)) = self.script.front() {
                ctx.enqueue(Self::ISSUE, next - now);
            }
        }
        self.check_done(ctx);
        Ok(())
    }

    fn check_done(&mut self, ctx: &mut SimContext<'_>) {
        if self.is_done() {
            if let Some(code) = self.quit_code.take() {
                ctx.quit(code);
            }
        }
    }
}

impl Component for ScriptedMaster {
    fn type_name(&self) -> &'static str {
        "ScriptedMaster"
    }

    fn ports(&self) -> Vec<PortDesc> {
        vec![PortDesc::io_master("out")]
    }

    fn reset(&mut self, ctx: &mut SimContext<'_>, active: bool) -> SimResult<()> {
        if !active {
            if let Some(&(first, _)) = self.script.front() {
                ctx.enqueue(Self::ISSUE, first.saturating_sub(ctx.cycles()));
            }
        }
        Ok(())
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
        self.issue_due(ctx)
    }

    fn handle_resp(&mut self, ctx: &mut SimContext<'_>, _port: PortId, req: Request) -> SimResult<()> {
        let issued_at = self.in_flight.pop_front().unwrap_or(0);
        self.completions.push(Completion {
            request: req,
            status: IoStatusKind::Pending,
            issued_at,
            time: ctx.now(),
        });
        self.check_done(ctx);
        Ok(())
    }

    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, _port: PortId) -> SimResult<()> {
        self.grants += 1;
        if let Some(req) = self.stash.take() {
            self.submit(ctx, req)?;
        }
        self.issue_due(ctx)
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "completions": self.completions.len(),
            "denials": self.denials,
            "grants": self.grants,
            "in_flight": self.in_flight.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_ordered() {
        let master = ScriptedMaster::new()
            .with_request(5, Request::read(0x5, 4))
            .with_request(1, Request::read(0x1, 4))
            .with_request(5, Request::read(0x6, 4))
            .with_request(3, Request::read(0x3, 4));
        let order: Vec<(Cycles, u64)> = master.script.iter().map(|(c, r)| (*c, r.addr)).collect();
        assert_eq!(order, vec![(1, 0x1), (3, 0x3), (5, 0x5), (5, 0x6)]);
        assert!(!master.is_done());
        assert!(ScriptedMaster::new().is_done());
    }
}
