//! Round-robin flit router.
//!
//! A router has `radix` symmetric ports. Every input owns a FIFO of
//! `virtual_ch` flits. Once per cycle the router scans the inputs starting
//! just after the last one that forwarded something, asks the topology
//! manager bound to `top_req` for the output of every queued flit, and
//! forwards the flits whose output is neither stalled nor already used in
//! this round. Flits that cannot leave stay queued for the next round.

use std::collections::VecDeque;

use crate::component::{Component, PortDesc};
use crate::components::flit::{self, FlitArg};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::{EventId, PortId};

/// Router with ports `in_<i>`, `out_<i>` and `top_req`.
#[derive(Debug)]
pub struct Router {
    radix: usize,
    virtual_ch: usize,
    rx_fifo: Vec<VecDeque<Request>>,
    input_stalled: Vec<bool>,
    output_stalled: Vec<bool>,
    rr_port: usize,
    /// Flits forwarded, per input port
    pub forwarded: Vec<u64>,
    /// Requests denied because an input FIFO was full
    pub denied: u64,
    /// Times an output denied a flit
    pub output_stalls: u64,
    /// Routing probes sent to the topology manager
    pub probes: u64,
}

impl Router {
    /// Event running one arbitration round.
    pub const ROUTE: EventId = 0;

    pub fn new(radix: usize, virtual_ch: usize) -> ConfigResult<Self> {
        if radix == 0 || virtual_ch == 0 {
            return Err(ConfigError::Validation(format!(
                "router needs a non-zero radix and virtual_ch (got {} and {})",
                radix, virtual_ch
            )));
        }
        Ok(Self {
            radix,
            virtual_ch,
            rx_fifo: (0..radix).map(|_| VecDeque::new()).collect(),
            input_stalled: vec![false; radix],
            output_stalled: vec![false; radix],
            rr_port: 0,
            forwarded: vec![0; radix],
            denied: 0,
            output_stalls: 0,
            probes: 0,
        })
    }

    /// Builds a router from `radix` and `virtual_ch`.
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Self::new(config.get_usize("radix")?, config.get_usize("virtual_ch")?)
    }

    pub fn radix(&self) -> usize {
        self.radix
    }

    /// Flits queued on input `port`.
    pub fn queued(&self, port: usize) -> usize {
        self.rx_fifo.get(port).map_or(0, VecDeque::len)
    }

    fn out_port(&self, out: usize) -> PortId {
        self.radix + out
    }

    fn top_port(&self) -> PortId {
        2 * self.radix
    }

    /// Asks the topology manager for the output of `flit`, received on
    /// input `port`.
    fn route(&mut self, ctx: &mut SimContext<'_>, flit: &Request, port: usize) -> SimResult<usize> {
        let mut probe = flit.fork();
        flit::set(&mut probe, FlitArg::PortId, port as i64);
        self.probes += 1;
        let answer = match ctx.req(self.top_port(), probe)? {
            IoStatus::Completed(answer) => answer,
            other => {
                return Err(ctx.fatal(format!(
                    "no valid topology manager, probe answered {:?}",
                    other.kind()
                )))
            }
        };
        let out = flit::get(&answer, FlitArg::PortId);
        if out < 0 || out as usize >= self.radix {
            return Err(ctx.fatal(format!(
                "topology chose port {} for destination {}, radix is {}",
                out,
                flit::get(flit, FlitArg::DestId),
                self.radix
            )));
        }
        Ok(out as usize)
    }

    /// Forwards what can leave input `port` this round. Returns true if at
    /// least one flit left.
    fn process_port(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: usize,
        used: &mut [bool],
    ) -> SimResult<bool> {
        let mut forwarded = false;
        let queued = std::mem::take(&mut self.rx_fifo[port]);
        let mut remain = VecDeque::with_capacity(queued.len());

        for mut flit in queued {
            let out = self.route(ctx, &flit, port)?;
            if self.output_stalled[out] || used[out] {
                remain.push_back(flit);
                continue;
            }
            flit::set(&mut flit, FlitArg::PortId, out as i64);
            match ctx.req(self.out_port(out), flit)? {
                IoStatus::Denied(flit) => {
                    tracing::trace!(component = ctx.name(), out, "output stalled");
                    self.output_stalled[out] = true;
                    self.output_stalls += 1;
                    remain.push_back(flit);
                }
                IoStatus::Completed(_) | IoStatus::Pending => {
                    tracing::trace!(component = ctx.name(), input = port, out, "flit forwarded");
                    used[out] = true;
                    forwarded = true;
                    self.forwarded[port] += 1;
                }
            }
        }
        self.rx_fifo[port] = remain;

        if self.input_stalled[port] && self.rx_fifo[port].len() < self.virtual_ch {
            self.input_stalled[port] = false;
            ctx.grant(port)?;
        }
        Ok(forwarded)
    }

    fn arbitrate(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let mut used = vec![false; self.radix];
        let mut last_forward = self.rr_port;
        for i in 0..self.radix {
            let port = (i + self.rr_port) % self.radix;
            if self.process_port(ctx, port, &mut used)? {
                last_forward = port;
            }
        }
        self.rr_port = (last_forward + 1) % self.radix;

        if self.rx_fifo.iter().any(|fifo| !fifo.is_empty()) {
            ctx.enqueue(Self::ROUTE, 1);
        }
        Ok(())
    }
}

impl Component for Router {
    fn type_name(&self) -> &'static str {
        "Router"
    }

    fn ports(&self) -> Vec<PortDesc> {
        let mut ports: Vec<PortDesc> = (0..self.radix)
            .map(|i| PortDesc::io_slave(format!("in_{}", i)))
            .collect();
        ports.extend((0..self.radix).map(|i| PortDesc::io_master(format!("out_{}", i))));
        ports.push(PortDesc::io_master("top_req"));
        ports
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: PortId,
        req: Request,
    ) -> SimResult<IoStatus> {
        if self.rx_fifo[port].len() >= self.virtual_ch {
            tracing::trace!(component = ctx.name(), port, "input FIFO full, request denied");
            self.input_stalled[port] = true;
            self.denied += 1;
            return Ok(IoStatus::Denied(req));
        }
        let mut flit = req.fork();
        flit::set(&mut flit, FlitArg::PortId, port as i64);
        self.rx_fifo[port].push_back(flit);
        ctx.enqueue(Self::ROUTE, 1);
        Ok(IoStatus::Completed(req))
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
        self.arbitrate(ctx)
    }

    fn handle_resp(&mut self, _ctx: &mut SimContext<'_>, _port: PortId, _req: Request) -> SimResult<()> {
        Ok(())
    }

    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, port: PortId) -> SimResult<()> {
        if port < self.radix || port >= 2 * self.radix {
            return Err(ctx.fatal(format!("grant on port {}, which is not an output", port)));
        }
        let out = port - self.radix;
        if !self.output_stalled[out] {
            return Err(ctx.fatal(format!("output port {} is not stalled but was granted", out)));
        }
        self.output_stalled[out] = false;
        tracing::trace!(component = ctx.name(), out, "output un-stalled");
        ctx.enqueue(Self::ROUTE, 1);
        Ok(())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "radix": self.radix,
            "virtual_ch": self.virtual_ch,
            "forwarded": self.forwarded,
            "denied": self.denied,
            "output_stalls": self.output_stalls,
            "probes": self.probes,
        })
    }
}
