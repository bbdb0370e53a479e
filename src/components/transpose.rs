//! Tiled matrix transpose engine.
//!
//! The engine copies an `M x N` row-major matrix at the source address to
//! its `N x M` transpose at the destination address, one square tile at a
//! time: every tile row is loaded through the TCDM port, the tile is
//! transposed locally, and the rows of the transposed tile are stored back.
//!
//! Registers: 0 M, 4 N, 8 source address, 12 destination address, 16
//! element size. Reading offset 20 starts a job; reading offset 24 waits
//! for the running job and is answered once it is finished.

use serde::Serialize;

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::fsm::{BlockStreamer, StateTracker, TimingState};
use crate::request::{IoStatus, Request};
use crate::types::{EventId, PortId};

const PORT_INPUT: PortId = 0;
const PORT_TCDM: PortId = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TransposeState {
    Idle,
    Start,
    LoadTile,
    StoreTile,
    Finished,
    Acknowledge,
}

impl TimingState for TransposeState {
    const IDLE: Self = TransposeState::Idle;
    const FINISHED: Self = TransposeState::Finished;
}

/// Transpose engine model with a `buffer_dim`-byte square tile buffer.
#[derive(Debug)]
pub struct TransposeEngine {
    buffer_dim: usize,
    m: u32,
    n: u32,
    src_addr: u32,
    dst_addr: u32,
    elem_size: u32,
    fsm: StateTracker<TransposeState>,
    streamer: BlockStreamer,
    tile_dim: usize,
    row_iter: usize,
    col_iter: usize,
    max_row_iter: usize,
    max_col_iter: usize,
    rows_per_tile: usize,
    cols_per_tile: usize,
    scratch: Vec<u8>,
    transposed: Vec<u8>,
    query: Option<Request>,
    denied: bool,
    /// Jobs completed
    pub jobs: u64,
    /// Tiles transposed
    pub tiles: u64,
}

impl TransposeEngine {
    /// Event stepping the FSM.
    pub const FSM: EventId = 0;

    pub const REG_M: u64 = 0;
    pub const REG_N: u64 = 4;
    pub const REG_SRC: u64 = 8;
    pub const REG_DST: u64 = 12;
    pub const REG_ELEM_SIZE: u64 = 16;
    pub const REG_START: u64 = 20;
    pub const REG_WAIT: u64 = 24;

    pub fn new(buffer_dim: usize, queue_depth: usize) -> ConfigResult<Self> {
        if buffer_dim == 0 {
            return Err(ConfigError::InvalidValue {
                key: "buffer_dim".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(Self {
            buffer_dim,
            m: 0,
            n: 0,
            src_addr: 0,
            dst_addr: 0,
            elem_size: 2,
            fsm: StateTracker::new(),
            streamer: BlockStreamer::new(queue_depth),
            tile_dim: 0,
            row_iter: 0,
            col_iter: 0,
            max_row_iter: 0,
            max_col_iter: 0,
            rows_per_tile: 0,
            cols_per_tile: 0,
            scratch: Vec::new(),
            transposed: Vec::new(),
            query: None,
            denied: false,
            jobs: 0,
            tiles: 0,
        })
    }

    /// Builds the engine from `buffer_dim` and `queue_depth`.
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Self::new(
            config.get_usize("buffer_dim")?,
            config.get_usize_or("queue_depth", 1)?,
        )
    }

    pub fn state(&self) -> TransposeState {
        self.fsm.get()
    }

    pub fn state_history(&self) -> &[TransposeState] {
        self.fsm.history()
    }

    fn elem(&self) -> usize {
        self.elem_size as usize
    }

    fn start(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let elem = self.elem();
        if elem != 1 && elem != 2 {
            return Err(ctx.fatal(format!("element size {} is not supported", elem)));
        }
        let (m, n) = (self.m as usize, self.n as usize);
        self.tile_dim = self.buffer_dim / elem;
        if self.tile_dim == 0 {
            return Err(ctx.fatal(format!(
                "a {}-byte buffer holds no {}-byte element",
                self.buffer_dim, elem
            )));
        }
        self.row_iter = 0;
        self.col_iter = 0;
        self.max_row_iter = m.div_ceil(self.tile_dim);
        self.max_col_iter = n.div_ceil(self.tile_dim);
        self.rows_per_tile = m.min(self.tile_dim);
        self.cols_per_tile = n.min(self.tile_dim);
        let tile_bytes = self.tile_dim * self.tile_dim * elem;
        self.scratch = vec![0; tile_bytes];
        self.transposed = vec![0; tile_bytes];
        tracing::debug!(
            component = ctx.name(),
            m,
            n,
            tile_dim = self.tile_dim,
            tiles = self.max_row_iter * self.max_col_iter,
            "transpose started"
        );
        Ok(())
    }

    /// Transposes the square scratch tile into `transposed`.
    fn transpose_tile(&mut self) {
        let elem = self.elem();
        let dim = self.tile_dim;
        for i in 0..dim {
            for j in 0..dim {
                let dst = (i * dim + j) * elem;
                let src = (j * dim + i) * elem;
                self.transposed[dst..dst + elem].copy_from_slice(&self.scratch[src..src + elem]);
            }
        }
    }

    /// Moves to the next tile. Returns false once every tile was handled.
    fn next_tile(&mut self) -> bool {
        self.col_iter += 1;
        if self.col_iter >= self.max_col_iter {
            self.col_iter = 0;
            self.row_iter += 1;
            if self.row_iter >= self.max_row_iter {
                return false;
            }
        }
        true
    }

    fn load_row(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let elem = self.elem();
        let row = self.streamer.issued() as usize;
        let n = self.n as usize;
        let addr = self.src_addr as usize
            + self.row_iter * self.tile_dim * n * elem
            + self.col_iter * self.tile_dim * elem
            + row * n * elem;
        let len = self.cols_per_tile * elem;

        let done = self.access(ctx, Request::read(addr as u64, len))?;
        let at = self.tile_dim * row * elem;
        self.scratch[at..at + len].copy_from_slice(done.data());
        self.streamer.record_issue(done.latency);
        Ok(())
    }

    fn store_row(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let elem = self.elem();
        let row = self.streamer.issued() as usize;
        let m = self.m as usize;
        let addr = self.dst_addr as usize
            + self.col_iter * self.tile_dim * m * elem
            + self.row_iter * self.tile_dim * elem
            + row * m * elem;
        let len = self.cols_per_tile * elem;
        let at = self.tile_dim * row * elem;

        let payload = self.transposed[at..at + len].to_vec();
        let done = self.access(ctx, Request::write(addr as u64, payload))?;
        self.streamer.record_issue(done.latency);
        Ok(())
    }

    fn access(&self, ctx: &mut SimContext<'_>, req: Request) -> SimResult<Request> {
        let addr = req.addr;
        match ctx.req(PORT_TCDM, req)? {
            IoStatus::Completed(done) => {
                tracing::trace!(
                    component = ctx.name(),
                    state = ?self.fsm.get(),
                    row_iter = self.row_iter,
                    col_iter = self.col_iter,
                    addr,
                    "tcdm row access"
                );
                Ok(done)
            }
            other => Err(ctx.fatal(format!(
                "error while accessing data in {:?}: tcdm answered {:?}",
                self.fsm.get(),
                other.kind()
            ))),
        }
    }

    fn step(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        self.streamer.tick();
        match self.fsm.get() {
            TransposeState::Idle => {}
            TransposeState::Start => {
                self.start(ctx)?;
                self.streamer.rearm(self.rows_per_tile as u64);
                self.fsm.set(TransposeState::LoadTile);
                ctx.enqueue(Self::FSM, 1);
            }
            TransposeState::LoadTile => {
                if self.streamer.can_issue() {
                    self.load_row(ctx)?;
                }
                self.streamer.drain();
                if self.streamer.is_drained() {
                    self.transpose_tile();
                    std::mem::swap(&mut self.rows_per_tile, &mut self.cols_per_tile);
                    self.streamer.rearm(self.rows_per_tile as u64);
                    self.fsm.set(TransposeState::StoreTile);
                }
                ctx.enqueue(Self::FSM, 1);
            }
            TransposeState::StoreTile => {
                if self.streamer.can_issue() {
                    self.store_row(ctx)?;
                }
                self.streamer.drain();
                if self.streamer.is_drained() {
                    self.tiles += 1;
                    if self.next_tile() {
                        let (m, n) = (self.m as usize, self.n as usize);
                        self.rows_per_tile = (m - self.row_iter * self.tile_dim).min(self.tile_dim);
                        self.cols_per_tile = (n - self.col_iter * self.tile_dim).min(self.tile_dim);
                        self.streamer.rearm(self.rows_per_tile as u64);
                        self.fsm.set(TransposeState::LoadTile);
                    } else {
                        self.rows_per_tile = 0;
                        self.cols_per_tile = 0;
                        self.streamer.rearm(0);
                        self.fsm.set(TransposeState::Finished);
                    }
                }
                ctx.enqueue(Self::FSM, 1);
            }
            TransposeState::Finished => {
                // re-armed by the wait request when nobody is waiting yet
                if self.query.is_some() {
                    self.fsm.set(TransposeState::Acknowledge);
                    ctx.enqueue(Self::FSM, 1);
                } else {
                    tracing::trace!(component = ctx.name(), "finished, waiting for query");
                }
            }
            TransposeState::Acknowledge => {
                let Some(query) = self.query.take() else {
                    return Err(ctx.fatal("acknowledge without a waiting query"));
                };
                ctx.resp(query)?;
                self.jobs += 1;
                self.fsm.set(TransposeState::Idle);
                tracing::debug!(component = ctx.name(), jobs = self.jobs, "transpose done");
                if std::mem::take(&mut self.denied) {
                    ctx.grant(PORT_INPUT)?;
                }
            }
        }
        Ok(())
    }

    fn read_register(&self, offset: u64) -> Option<u32> {
        match offset {
            Self::REG_M => Some(self.m),
            Self::REG_N => Some(self.n),
            Self::REG_SRC => Some(self.src_addr),
            Self::REG_DST => Some(self.dst_addr),
            Self::REG_ELEM_SIZE => Some(self.elem_size),
            _ => None,
        }
    }
}

impl Component for TransposeEngine {
    fn type_name(&self) -> &'static str {
        "TransposeEngine"
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
        if req.size() != 4 || req.addr % 4 != 0 {
            return Err(ctx.fatal(format!(
                "unsupported register access (offset: 0x{:x}, size: {})",
                req.addr,
                req.size()
            )));
        }

        if req.is_write {
            let value = req.value_u32().unwrap_or(0);
            match req.addr {
                Self::REG_M => self.m = value,
                Self::REG_N => self.n = value,
                Self::REG_SRC => self.src_addr = value,
                Self::REG_DST => self.dst_addr = value,
                Self::REG_ELEM_SIZE => self.elem_size = value,
                offset => {
                    tracing::warn!(component = ctx.name(), offset, "write to invalid register ignored")
                }
            }
            return Ok(IoStatus::Completed(req));
        }

        match req.addr {
            Self::REG_START => {
                if !self.fsm.get().is_idle() {
                    self.denied = true;
                    return Ok(IoStatus::Denied(req));
                }
                if self.m == 0 || self.n == 0 {
                    return Err(ctx.fatal(format!(
                        "INVALID configuration (M-N): {}, {}",
                        self.m, self.n
                    )));
                }
                self.fsm.begin_job();
                self.fsm.set(TransposeState::Start);
                ctx.enqueue(Self::FSM, 1);
                Ok(IoStatus::Completed(req))
            }
            Self::REG_WAIT => {
                if self.fsm.get().is_idle() {
                    return Ok(IoStatus::Completed(req));
                }
                if self.query.is_some() {
                    self.denied = true;
                    return Ok(IoStatus::Denied(req));
                }
                self.query = Some(req);
                if self.fsm.get().is_finished() {
                    ctx.enqueue(Self::FSM, 1);
                }
                Ok(IoStatus::Pending)
            }
            offset => match self.read_register(offset) {
                Some(value) => {
                    req.set_value_u32(value);
                    Ok(IoStatus::Completed(req))
                }
                None => Err(ctx.fatal(format!("read from invalid register 0x{:x}", offset))),
            },
        }
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
        self.step(ctx)
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.fsm.get(),
            "jobs": self.jobs,
            "tiles": self.tiles,
            "rows_moved": self.streamer.blocks_issued_total(),
        })
    }
}
