//! Timing model of the RedMulE matrix-multiply accelerator.
//!
//! A job computes `Z = X * W (+ Y)` for an `M x N` by `N x K` product. The
//! model does not compute anything: it streams the memory blocks the real
//! array would move through its TCDM port, one block per cycle under a
//! queue-depth limit, and pads every tile iteration up to the modeled
//! compute time of the systolic array.
//!
//! Register map (32-bit, offsets in bytes):
//!
//! | offset | register |
//! |---|---|
//! | 0 | M |
//! | 4 | N |
//! | 8 | K |
//! | 12 | X address |
//! | 16 | Y address |
//! | 20 | Z address |
//! | 32 | status: read triggers the job, write is logged |

use serde::Serialize;

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::fsm::{BlockStreamer, StateTracker, TimingState};
use crate::request::{IoStatus, Request};
use crate::types::{Cycles, EventId, PortId};

pub const REG_M: u64 = 0;
pub const REG_N: u64 = 4;
pub const REG_K: u64 = 8;
pub const REG_X_ADDR: u64 = 12;
pub const REG_Y_ADDR: u64 = 16;
pub const REG_Z_ADDR: u64 = 20;
pub const REG_STATUS: u64 = 32;

const PORT_INPUT: PortId = 0;
const PORT_TCDM: PortId = 1;

/// States of the accelerator FSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RedMuleState {
    Idle,
    Preload,
    Routine,
    Storing,
    Finished,
}

impl TimingState for RedMuleState {
    const IDLE: Self = RedMuleState::Idle;
    const FINISHED: Self = RedMuleState::Finished;
}

/// Geometry of the compute array and of its memory interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedMuleGeometry {
    /// Rows of compute elements
    pub ce_height: u64,
    /// Columns of compute elements
    pub ce_width: u64,
    /// Pipeline stages per compute element
    pub ce_pipe: u64,
    /// Bytes per matrix element
    pub elem_size: u64,
    /// Bytes moved per TCDM block
    pub bandwidth: u64,
    /// Extra blocks allowed in flight beyond the first
    pub queue_depth: usize,
}

impl RedMuleGeometry {
    /// Checks that every dimension is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |key: &str, reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.ce_height == 0 {
            return Err(invalid("ce_height", "must be non-zero"));
        }
        if self.ce_width == 0 {
            return Err(invalid("ce_width", "must be non-zero"));
        }
        if self.elem_size == 0 {
            return Err(invalid("elem_size", "must be non-zero"));
        }
        if self.bandwidth < self.elem_size {
            return Err(invalid("bandwidth", "must hold at least one element"));
        }
        Ok(())
    }

    /// Rows of a tile.
    pub fn buffer_h(&self) -> u64 {
        self.ce_height
    }

    /// Columns of a tile.
    pub fn buffer_w(&self) -> u64 {
        self.ce_width * (self.ce_pipe + 1)
    }

    /// Blocks needed to move one tile row.
    pub fn blocks_per_row(&self) -> u64 {
        let elems_per_block = self.bandwidth / self.elem_size;
        self.buffer_w().div_ceil(elems_per_block)
    }

    /// Blocks of the preload phase (first X and Y tiles).
    pub fn preload_blocks(&self) -> u64 {
        self.blocks_per_row() * 2 * self.ce_height
    }

    /// Blocks of the storing phase (last Z tile).
    pub fn storing_blocks(&self) -> u64 {
        self.blocks_per_row() * self.ce_height
    }

    /// Blocks moved during tile iteration `iter` of `grid`.
    ///
    /// Every iteration loads a W tile. All but the last one prefetch the
    /// next X tile; the last iteration along N also prefetches the next Y
    /// tile, and the first iteration along N of every output tile but the
    /// first writes back the previous Z tile.
    pub fn routine_blocks(&self, grid: &TileGrid, iter: &TileIter) -> u64 {
        let is_last = grid.is_last(iter);
        let is_first = iter.is_first();
        let mut rows = self.buffer_w();
        if !is_last {
            rows += self.ce_height;
        }
        if iter.k == grid.x_row_tiles - 1 && !is_last {
            rows += self.ce_height;
        }
        if iter.k == 0 && !is_first {
            rows += self.ce_height;
        }
        self.blocks_per_row() * rows
    }

    /// Modeled compute cycles of one tile iteration.
    pub fn compute_cycles(&self) -> Cycles {
        let depth = self.ce_pipe + 1;
        self.ce_width * depth * depth
    }
}

/// Tile counts of a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileGrid {
    /// Tiles along N
    pub x_row_tiles: u64,
    /// Tiles along K
    pub z_row_tiles: u64,
    /// Tiles along M
    pub z_col_tiles: u64,
}

impl TileGrid {
    pub fn new(geometry: &RedMuleGeometry, m: u64, n: u64, k: u64) -> Self {
        Self {
            x_row_tiles: n.div_ceil(geometry.buffer_w()),
            z_row_tiles: k.div_ceil(geometry.buffer_w()),
            z_col_tiles: m.div_ceil(geometry.buffer_h()),
        }
    }

    /// Number of routine iterations of a job.
    pub fn iterations(&self) -> u64 {
        self.x_row_tiles * self.z_row_tiles * self.z_col_tiles
    }

    fn is_last(&self, iter: &TileIter) -> bool {
        iter.i == self.z_col_tiles - 1
            && iter.j == self.z_row_tiles - 1
            && iter.k == self.x_row_tiles - 1
    }
}

/// Position in the tile grid; `k` moves fastest, then `j`, then `i`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TileIter {
    pub i: u64,
    pub j: u64,
    pub k: u64,
}

impl TileIter {
    fn is_first(&self) -> bool {
        self.i == 0 && self.j == 0 && self.k == 0
    }

    /// Moves to the next tile. Returns true once the grid is exhausted.
    pub fn advance(&mut self, grid: &TileGrid) -> bool {
        self.k += 1;
        if self.k == grid.x_row_tiles {
            self.k = 0;
            self.j += 1;
            if self.j == grid.z_row_tiles {
                self.j = 0;
                self.i += 1;
                if self.i == grid.z_col_tiles {
                    return true;
                }
            }
        }
        false
    }
}

/// Closed-form job latency of the model.
pub struct RedMuleTiming;

impl RedMuleTiming {
    /// Cycles between the trigger and the reply for an `M x N x K` job,
    /// when every block completes synchronously with `latency` cycles and
    /// `latency <= queue_depth` so the queue never throttles.
    pub fn analytic_cycles(
        geometry: &RedMuleGeometry,
        m: u64,
        n: u64,
        k: u64,
        latency: Cycles,
    ) -> Cycles {
        let grid = TileGrid::new(geometry, m, n, k);
        let compute = geometry.compute_cycles();
        let phase = |blocks: u64| if blocks == 0 { 1 } else { blocks + latency };

        // one cycle to leave IDLE, one to reply from FINISHED
        let mut cycles = 2 + phase(geometry.preload_blocks());
        let mut iter = TileIter::default();
        loop {
            cycles += phase(geometry.routine_blocks(&grid, &iter)).max(compute);
            if iter.advance(&grid) {
                break;
            }
        }
        cycles + phase(geometry.storing_blocks())
    }
}

/// RedMulE accelerator model.
///
/// Port `input` is the register slave, port `tcdm` the master towards the
/// scratchpad. A trigger while a job runs is denied; the initiator is
/// granted once the model is idle again.
#[derive(Debug)]
pub struct RedMule {
    geometry: RedMuleGeometry,
    m: u32,
    n: u32,
    k: u32,
    x_addr: u32,
    y_addr: u32,
    z_addr: u32,
    fsm: StateTracker<RedMuleState>,
    streamer: BlockStreamer,
    grid: TileGrid,
    iter: TileIter,
    query: Option<Request>,
    denied_trigger: bool,
    timer_start: Cycles,
    /// Jobs completed
    pub jobs: u64,
    /// Cycles spent in completed jobs
    pub total_cycles: Cycles,
    /// Latency of the last completed job
    pub last_job_cycles: Cycles,
    /// Tile iterations executed
    pub routine_iterations: u64,
    /// Times the storing phase was entered
    pub storing_entries: u64,
    /// Iterations padded up to the compute model
    pub compute_bound_iterations: u64,
}

impl RedMule {
    /// Event stepping the FSM once per cycle.
    pub const FSM: EventId = 0;

    /// Creates an idle accelerator. Registers start at M = N = K = 4.
    pub fn new(geometry: RedMuleGeometry) -> ConfigResult<Self> {
        geometry.validate()?;
        Ok(Self {
            geometry,
            m: 4,
            n: 4,
            k: 4,
            x_addr: 0,
            y_addr: 0,
            z_addr: 0,
            fsm: StateTracker::new(),
            streamer: BlockStreamer::new(geometry.queue_depth),
            grid: TileGrid::default(),
            iter: TileIter::default(),
            query: None,
            denied_trigger: false,
            timer_start: 0,
            jobs: 0,
            total_cycles: 0,
            last_job_cycles: 0,
            routine_iterations: 0,
            storing_entries: 0,
            compute_bound_iterations: 0,
        })
    }

    /// Builds the model from `ce_height`, `ce_width`, `ce_pipe`,
    /// `elem_size`, `queue_depth` and either `bandwidth` or
    /// `tcdm_bank_width * tcdm_bank_number`.
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let bandwidth = if config.contains("bandwidth") {
            config.get_uint("bandwidth")?
        } else {
            config.get_uint("tcdm_bank_width")? * config.get_uint("tcdm_bank_number")?
        };
        Self::new(RedMuleGeometry {
            ce_height: config.get_uint("ce_height")?,
            ce_width: config.get_uint("ce_width")?,
            ce_pipe: config.get_uint_or("ce_pipe", 0)?,
            elem_size: config.get_uint_or("elem_size", 2)?,
            bandwidth,
            queue_depth: config.get_usize_or("queue_depth", 1)?,
        })
    }

    pub fn geometry(&self) -> &RedMuleGeometry {
        &self.geometry
    }

    /// Current FSM state.
    pub fn state(&self) -> RedMuleState {
        self.fsm.get()
    }

    /// States visited by the last job.
    pub fn state_history(&self) -> &[RedMuleState] {
        self.fsm.history()
    }

    /// Returns true while a job is running.
    pub fn is_busy(&self) -> bool {
        self.query.is_some()
    }

    fn read_register(&self, offset: u64) -> Option<u32> {
        match offset {
            REG_M => Some(self.m),
            REG_N => Some(self.n),
            REG_K => Some(self.k),
            REG_X_ADDR => Some(self.x_addr),
            REG_Y_ADDR => Some(self.y_addr),
            REG_Z_ADDR => Some(self.z_addr),
            _ => None,
        }
    }

    fn write_register(&mut self, ctx: &SimContext<'_>, offset: u64, value: u32) {
        match offset {
            REG_M => self.m = value,
            REG_N => self.n = value,
            REG_K => self.k = value,
            REG_X_ADDR => self.x_addr = value,
            REG_Y_ADDR => self.y_addr = value,
            REG_Z_ADDR => self.z_addr = value,
            REG_STATUS => tracing::debug!(component = ctx.name(), value, "write status"),
            _ => tracing::warn!(component = ctx.name(), offset, "write to invalid register ignored"),
        }
    }

    fn trigger(&mut self, ctx: &mut SimContext<'_>, req: Request) -> SimResult<IoStatus> {
        if self.query.is_some() {
            tracing::debug!(component = ctx.name(), "trigger while busy, denied");
            self.denied_trigger = true;
            return Ok(IoStatus::Denied(req));
        }
        let (m, n, k) = (self.m as u64, self.n as u64, self.k as u64);
        if m == 0 || n == 0 || k == 0 {
            return Err(ctx.fatal(format!(
                "INVALID configuration (M-N-K): {}, {}, {}",
                m, n, k
            )));
        }
        tracing::debug!(component = ctx.name(), m, n, k, "job triggered");

        self.grid = TileGrid::new(&self.geometry, m, n, k);
        self.iter = TileIter::default();
        self.fsm.set(RedMuleState::Idle);
        self.fsm.begin_job();
        self.streamer.rearm(0);
        self.timer_start = ctx.cycles();
        ctx.enqueue(Self::FSM, 1);
        self.query = Some(req);
        Ok(IoStatus::Pending)
    }

    /// Issues at most one block and retires landed ones.
    fn stream(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if self.streamer.can_issue() {
            let offset = self.streamer.issued() * self.geometry.bandwidth;
            let size = self.geometry.bandwidth as usize;
            let block = if self.fsm.get() == RedMuleState::Storing {
                Request::write(self.z_addr as u64 + offset, vec![0; size])
            } else {
                Request::read(self.x_addr as u64 + offset, size)
            };
            match ctx.req(PORT_TCDM, block)? {
                IoStatus::Completed(done) => {
                    tracing::trace!(
                        component = ctx.name(),
                        state = ?self.fsm.get(),
                        block = self.streamer.issued(),
                        latency = done.latency,
                        "tcdm block sent"
                    );
                    self.streamer.record_issue(done.latency);
                }
                other => {
                    return Err(ctx.fatal(format!(
                        "error while accessing data in {:?} (i-j-k: {}-{}-{}): tcdm answered {:?}",
                        self.fsm.get(),
                        self.iter.i,
                        self.iter.j,
                        self.iter.k,
                        other.kind()
                    )));
                }
            }
        }
        self.streamer.drain();
        Ok(())
    }

    fn step(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.streamer.tick();

        match self.fsm.get() {
            RedMuleState::Idle => {
                self.fsm.set(RedMuleState::Preload);
                self.streamer.rearm(self.geometry.preload_blocks());
                ctx.enqueue(Self::FSM, 1);
            }
            RedMuleState::Preload => {
                self.stream(ctx)?;
                if self.streamer.is_drained() {
                    self.fsm.set(RedMuleState::Routine);
                    self.streamer
                        .rearm(self.geometry.routine_blocks(&self.grid, &self.iter));
                }
                ctx.enqueue(Self::FSM, 1);
            }
            RedMuleState::Routine => {
                self.stream(ctx)?;
                if !self.streamer.is_drained() {
                    ctx.enqueue(Self::FSM, 1);
                    return Ok(());
                }

                let elapsed = self.streamer.timestamp();
                let modeled = self.geometry.compute_cycles();
                self.routine_iterations += 1;
                if elapsed >= modeled {
                    tracing::trace!(component = ctx.name(), elapsed, modeled, "memory bound iteration");
                    ctx.enqueue(Self::FSM, 1);
                } else {
                    tracing::trace!(component = ctx.name(), elapsed, modeled, "compute bound iteration");
                    self.compute_bound_iterations += 1;
                    ctx.enqueue(Self::FSM, modeled - elapsed + 1);
                }

                if self.iter.advance(&self.grid) {
                    self.fsm.set(RedMuleState::Storing);
                    self.storing_entries += 1;
                    self.streamer.rearm(self.geometry.storing_blocks());
                } else {
                    self.streamer
                        .rearm(self.geometry.routine_blocks(&self.grid, &self.iter));
                }
            }
            RedMuleState::Storing => {
                self.stream(ctx)?;
                if self.streamer.is_drained() {
                    self.streamer.rearm(0);
                    self.fsm.set(RedMuleState::Finished);
                }
                ctx.enqueue(Self::FSM, 1);
            }
            RedMuleState::Finished => {
                let Some(mut query) = self.query.take() else {
                    return Err(ctx.fatal("INVALID RedMule query"));
                };
                let elapsed = ctx.cycles() - self.timer_start;
                self.jobs += 1;
                self.total_cycles += elapsed;
                self.last_job_cycles = elapsed;
                tracing::info!(
                    component = ctx.name(),
                    start = self.timer_start,
                    end = ctx.cycles(),
                    period = elapsed,
                    runtime = self.total_cycles,
                    job = self.jobs,
                    "matmul finished"
                );
                query.inc_latency(elapsed);
                ctx.resp(query)?;
                self.fsm.set(RedMuleState::Idle);
                if std::mem::take(&mut self.denied_trigger) {
                    ctx.grant(PORT_INPUT)?;
                }
            }
        }
        Ok(())
    }
}

impl Component for RedMule {
    fn type_name(&self) -> &'static str {
        "RedMule"
    }

    fn ports(&self) -> Vec<PortDesc> {
        vec![PortDesc::io_slave("input"), PortDesc::io_master("tcdm")]
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        _port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        tracing::trace!(
            component = ctx.name(),
            offset = req.addr,
            size = req.size(),
            is_write = req.is_write,
            "register access"
        );
        if req.size() != 4 || req.addr % 4 != 0 {
            return Err(ctx.fatal(format!(
                "unsupported register access (offset: 0x{:x}, size: {})",
                req.addr,
                req.size()
            )));
        }

        if req.is_write {
            let value = req.value_u32().unwrap_or(0);
            self.write_register(ctx, req.addr, value);
            return Ok(IoStatus::Completed(req));
        }
        if req.addr == REG_STATUS {
            return self.trigger(ctx, req);
        }
        match self.read_register(req.addr) {
            Some(value) => {
                req.set_value_u32(value);
                Ok(IoStatus::Completed(req))
            }
            None => Err(ctx.fatal(format!("read from invalid register 0x{:x}", req.addr))),
        }
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
        self.step(ctx)
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.fsm.get(),
            "jobs": self.jobs,
            "total_cycles": self.total_cycles,
            "last_job_cycles": self.last_job_cycles,
            "routine_iterations": self.routine_iterations,
            "storing_entries": self.storing_entries,
            "compute_bound_iterations": self.compute_bound_iterations,
            "blocks": self.streamer.blocks_issued_total(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> RedMuleGeometry {
        RedMuleGeometry {
            ce_height: 4,
            ce_width: 4,
            ce_pipe: 0,
            elem_size: 2,
            bandwidth: 8,
            queue_depth: 4,
        }
    }

    #[test]
    fn test_block_budget() {
        let g = geometry();
        assert_eq!(g.buffer_w(), 4);
        assert_eq!(g.blocks_per_row(), 1);
        assert_eq!(g.preload_blocks(), 8);
        assert_eq!(g.storing_blocks(), 4);

        let single = TileGrid::new(&g, 4, 4, 4);
        assert_eq!(single.iterations(), 1);
        // the only iteration is both first and last: W rows only
        assert_eq!(g.routine_blocks(&single, &TileIter::default()), 4);

        let grid = TileGrid::new(&g, 8, 8, 4);
        assert_eq!((grid.z_col_tiles, grid.z_row_tiles, grid.x_row_tiles), (2, 1, 2));
        assert_eq!(g.routine_blocks(&grid, &TileIter { i: 0, j: 0, k: 0 }), 8);
        assert_eq!(g.routine_blocks(&grid, &TileIter { i: 0, j: 0, k: 1 }), 12);
        assert_eq!(g.routine_blocks(&grid, &TileIter { i: 1, j: 0, k: 0 }), 12);
        assert_eq!(g.routine_blocks(&grid, &TileIter { i: 1, j: 0, k: 1 }), 4);
    }

    #[test]
    fn test_tile_iteration_order() {
        let g = geometry();
        let grid = TileGrid::new(&g, 8, 12, 8);
        let mut iter = TileIter::default();
        let mut visited = vec![iter];
        while !iter.advance(&grid) {
            visited.push(iter);
        }
        assert_eq!(visited.len() as u64, grid.iterations());
        assert_eq!(visited.len(), 2 * 2 * 3);
        assert_eq!(visited[1], TileIter { i: 0, j: 0, k: 1 });
        assert_eq!(visited[3], TileIter { i: 0, j: 1, k: 0 });
        assert_eq!(visited[6], TileIter { i: 1, j: 0, k: 0 });
    }

    #[test]
    fn test_analytic_cycles() {
        let g = geometry();
        // 1 + 1 + (8 + 1) + (4 + 1) + (4 + 1)
        assert_eq!(RedMuleTiming::analytic_cycles(&g, 4, 4, 4, 1), 21);

        // a deep pipeline makes the single iteration compute bound
        let deep = RedMuleGeometry {
            ce_pipe: 3,
            bandwidth: 32,
            ..g
        };
        assert_eq!(deep.compute_cycles(), 64);
        let preload = deep.preload_blocks() + 1;
        let storing = deep.storing_blocks() + 1;
        assert_eq!(
            RedMuleTiming::analytic_cycles(&deep, 4, 16, 16, 1),
            2 + preload + 64 + storing
        );
    }

    #[test]
    fn test_from_config() {
        let cfg = ComponentConfig::new()
            .with("ce_height", 4)
            .with("ce_width", 4)
            .with("tcdm_bank_width", 4)
            .with("tcdm_bank_number", 2)
            .with("queue_depth", 4);
        let model = RedMule::from_config(&cfg).unwrap();
        assert_eq!(*model.geometry(), geometry());
        assert_eq!(model.state(), RedMuleState::Idle);

        let narrow = cfg.clone().with("bandwidth", 1);
        assert!(RedMule::from_config(&narrow).is_err());
        assert!(RedMule::from_config(&ComponentConfig::new().with("ce_width", 4)).is_err());
    }
}
