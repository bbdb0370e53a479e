//! Per-cluster peripheral registers.
//!
//! | offset | read                     | write                                |
//! |--------|--------------------------|--------------------------------------|
//! | 0      | cluster id               | arrive at the global barrier         |
//! | 4      | 1                        |                                      |
//! | 8      | number of clusters       |                                      |
//! | 12     | clusters along x         |                                      |
//! | 16     | clusters along y         |                                      |
//! | 20     |                          | opens, then closes, a sync window    |
//! | 24     | 0                        |                                      |
//! | 28     |                          | broadcasts a global barrier wake-up  |
//!
//! A core arriving at the global barrier is answered `Pending` and released
//! when a wake-up reaches `global_barrier_slave`. A wake-up that comes first
//! is remembered and lets the next arrival through at once.
//!
//! The block also gathers the per-core `barrier_req_<i>` wires into one
//! `barrier_ack` pulse, and raises `fetch_start` once both the HBM preload
//! and the instruction preheat are done.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::{PortId, SimTime};

const PORT_INPUT: PortId = 0;
const PORT_BARRIER_SLAVE: PortId = 1;
const PORT_BARRIER_MASTER: PortId = 2;
const PORT_BARRIER_ACK: PortId = 3;
const PORT_PRELOAD_DONE: PortId = 4;
const PORT_PREHEAT_DONE: PortId = 5;
const PORT_FETCH_START: PortId = 6;
const FIRST_CORE_PORT: PortId = 7;

pub const REG_CLUSTER_ID: u64 = 0;
pub const REG_PRESENT: u64 = 4;
pub const REG_NUM_CLUSTER: u64 = 8;
pub const REG_NUM_CLUSTER_X: u64 = 12;
pub const REG_NUM_CLUSTER_Y: u64 = 16;
pub const REG_SYNC_WINDOW: u64 = 20;
pub const REG_ZERO: u64 = 24;
pub const REG_WAKEUP: u64 = 28;

#[derive(Debug)]
pub struct ClusterRegisters {
    cluster_id: u32,
    num_cluster_x: u32,
    num_cluster_y: u32,
    nb_cores: usize,
    global_barrier_addr: u64,
    barrier_status: u64,
    /// Core request parked at the global barrier
    barrier_query: Option<Request>,
    /// A wake-up arrived before any core
    wakeup_early: bool,
    /// Wake-up denied by the barrier network, resent on grant
    wakeup_stash: Option<Request>,
    sync_window_start: Option<SimTime>,
    hbm_preload_done: bool,
    inst_preheat_done: bool,
    /// `fetch_start` was raised
    pub fetch_started: bool,
    /// Local barriers completed
    pub local_barriers: u64,
    /// Global barrier releases
    pub global_barriers: u64,
    /// Wake-ups broadcast by this cluster
    pub wakeups_sent: u64,
    /// Closed sync windows as (period in ns, type written)
    pub sync_windows: Vec<(u64, u32)>,
}

impl ClusterRegisters {
    pub fn new(cluster_id: u32, num_cluster_x: u32, num_cluster_y: u32, nb_cores: usize) -> ConfigResult<Self> {
        if nb_cores == 0 || nb_cores > 64 {
            return Err(ConfigError::invalid(
                "nb_cores",
                format!("{} cores, 1 to 64 are supported", nb_cores),
            ));
        }
        Ok(Self {
            cluster_id,
            num_cluster_x,
            num_cluster_y,
            nb_cores,
            global_barrier_addr: 0,
            barrier_status: 0,
            barrier_query: None,
            wakeup_early: false,
            wakeup_stash: None,
            sync_window_start: None,
            hbm_preload_done: false,
            inst_preheat_done: false,
            fetch_started: false,
            local_barriers: 0,
            global_barriers: 0,
            wakeups_sent: 0,
            sync_windows: Vec::new(),
        })
    }

    /// Address written by a wake-up broadcast.
    pub fn with_global_barrier_addr(mut self, addr: u64) -> Self {
        self.global_barrier_addr = addr;
        self
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Ok(Self::new(
            config.get_uint_or("cluster_id", 0)? as u32,
            config.get_uint("num_cluster_x")? as u32,
            config.get_uint("num_cluster_y")? as u32,
            config.get_usize_or("nb_cores", 1)?,
        )?
        .with_global_barrier_addr(config.get_uint_or("global_barrier_addr", 0)?))
    }

    /// Returns true while a core waits at the global barrier.
    pub fn is_waiting(&self) -> bool {
        self.barrier_query.is_some()
    }

    fn read(&self, offset: u64) -> Option<u32> {
        match offset {
            REG_CLUSTER_ID => Some(self.cluster_id),
            REG_PRESENT => Some(1),
            REG_NUM_CLUSTER => Some(self.num_cluster_x * self.num_cluster_y),
            REG_NUM_CLUSTER_X => Some(self.num_cluster_x),
            REG_NUM_CLUSTER_Y => Some(self.num_cluster_y),
            REG_ZERO => Some(0),
            _ => None,
        }
    }

    fn sync_window(&mut self, ctx: &SimContext<'_>, kind: u32) {
        match self.sync_window_start.take() {
            None => self.sync_window_start = Some(ctx.now()),
            Some(start) => {
                let period_ns = (ctx.now() - start) / 1000;
                tracing::debug!(
                    component = ctx.name(),
                    start_ns = start / 1000,
                    period_ns,
                    kind,
                    "cluster sync"
                );
                self.sync_windows.push((period_ns, kind));
            }
        }
    }

    fn send_wakeup(&mut self, ctx: &mut SimContext<'_>, req: Request) -> SimResult<()> {
        match ctx.req(PORT_BARRIER_MASTER, req)? {
            IoStatus::Denied(req) => self.wakeup_stash = Some(req),
            IoStatus::Completed(_) | IoStatus::Pending => self.wakeups_sent += 1,
        }
        Ok(())
    }

    /// Masks travel as their low bytes, behind a broadcast flag.
    fn wakeup(&mut self, ctx: &mut SimContext<'_>, value: u32) -> SimResult<()> {
        let row_mask = (value & 0xffff) as u8;
        let col_mask = (value >> 16) as u8;
        tracing::trace!(component = ctx.name(), row_mask, col_mask, "global barrier wake-up");
        if self.wakeup_stash.is_some() {
            return Err(ctx.fatal("wake-up broadcast while the previous one is still denied"));
        }
        let req = Request::write(self.global_barrier_addr, vec![1, row_mask, col_mask, 0]);
        self.send_wakeup(ctx, req)
    }

    fn fetch_start_check(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if self.hbm_preload_done && self.inst_preheat_done && !self.fetch_started {
            tracing::debug!(component = ctx.name(), "starting instruction fetch");
            self.fetch_started = true;
            if ctx.is_bound(PORT_FETCH_START) {
                ctx.wire(PORT_FETCH_START, 1)?;
            }
        }
        Ok(())
    }

    fn core_barrier(&mut self, ctx: &mut SimContext<'_>, core: usize, value: u64) -> SimResult<()> {
        if value != 0 {
            self.barrier_status |= 1 << core;
        }
        let all = if self.nb_cores == 64 { u64::MAX } else { (1u64 << self.nb_cores) - 1 };
        if self.barrier_status == all {
            tracing::trace!(component = ctx.name(), "barrier reached");
            self.barrier_status = 0;
            self.local_barriers += 1;
            if ctx.is_bound(PORT_BARRIER_ACK) {
                ctx.wire(PORT_BARRIER_ACK, 1)?;
            }
        }
        Ok(())
    }

    fn global_barrier(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        match self.barrier_query.take() {
            Some(query) => {
                self.wakeup_early = false;
                self.global_barriers += 1;
                ctx.resp(query)
            }
            None => {
                self.wakeup_early = true;
                Ok(())
            }
        }
    }
}

impl Component for ClusterRegisters {
    fn type_name(&self) -> &'static str {
        "ClusterRegisters"
    }

    fn ports(&self) -> Vec<PortDesc> {
        let mut ports = vec![
            PortDesc::io_slave("input"),
            PortDesc::io_slave("global_barrier_slave"),
            PortDesc::io_master("global_barrier_master"),
            PortDesc::wire_master("barrier_ack"),
            PortDesc::wire_slave("hbm_preload_done"),
            PortDesc::wire_slave("inst_preheat_done"),
            PortDesc::wire_master("fetch_start"),
        ];
        ports.extend((0..self.nb_cores).map(|i| PortDesc::wire_slave(format!("barrier_req_{}", i))));
        ports
    }

    fn reset(&mut self, _ctx: &mut SimContext<'_>, active: bool) -> SimResult<()> {
        if active {
            self.barrier_status = 0;
        }
        Ok(())
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        match port {
            PORT_BARRIER_SLAVE => {
                self.global_barrier(ctx)?;
                return Ok(IoStatus::Completed(req));
            }
            PORT_INPUT => {}
            other => return Err(ctx.fatal(format!("request on port {}, which is not input", other))),
        }
        if req.size() != 4 {
            return Err(ctx.fatal(format!(
                "{}-byte access at 0x{:x}, registers are 4 bytes wide",
                req.size(),
                req.addr
            )));
        }

        if !req.is_write {
            if let Some(value) = self.read(req.addr) {
                req.set_value_u32(value);
            }
            return Ok(IoStatus::Completed(req));
        }

        let value = req.value_u32().unwrap_or(0);
        match req.addr {
            REG_CLUSTER_ID if self.barrier_query.is_none() => {
                if std::mem::take(&mut self.wakeup_early) {
                    self.global_barriers += 1;
                    return Ok(IoStatus::Completed(req));
                }
                tracing::trace!(component = ctx.name(), "core waiting at the global barrier");
                self.barrier_query = Some(req);
                return Ok(IoStatus::Pending);
            }
            REG_SYNC_WINDOW => self.sync_window(ctx, value),
            REG_WAKEUP => self.wakeup(ctx, value)?,
            _ => {}
        }
        Ok(IoStatus::Completed(req))
    }

    fn handle_resp(&mut self, _ctx: &mut SimContext<'_>, _port: PortId, _req: Request) -> SimResult<()> {
        Ok(())
    }

    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, _port: PortId) -> SimResult<()> {
        let Some(req) = self.wakeup_stash.take() else {
            return Err(ctx.fatal("no wake-up is stalled but a grant arrived"));
        };
        self.send_wakeup(ctx, req)
    }

    fn handle_wire(&mut self, ctx: &mut SimContext<'_>, port: PortId, value: u64) -> SimResult<()> {
        match port {
            PORT_PRELOAD_DONE => {
                tracing::debug!(component = ctx.name(), "HBM preloading done");
                self.hbm_preload_done = true;
                self.fetch_start_check(ctx)
            }
            PORT_PREHEAT_DONE => {
                tracing::debug!(component = ctx.name(), "instruction preheating done");
                self.inst_preheat_done = true;
                self.fetch_start_check(ctx)
            }
            p if p >= FIRST_CORE_PORT && p < FIRST_CORE_PORT + self.nb_cores => {
                self.core_barrier(ctx, p - FIRST_CORE_PORT, value)
            }
            other => Err(ctx.fatal(format!("wire on port {}, which is not a wire input", other))),
        }
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "cluster_id": self.cluster_id,
            "local_barriers": self.local_barriers,
            "global_barriers": self.global_barriers,
            "wakeups_sent": self.wakeups_sent,
            "fetch_started": self.fetch_started,
            "sync_windows": self.sync_windows.len(),
        })
    }
}
