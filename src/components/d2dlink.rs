//! Credit-controlled die-to-die link.
//!
//! ```text
//! data_in -> [tx_fifo] -> [delay line] -> [rx_fifo] -> data_out
//!                 ^                           |
//!                 +------ [credit line] <-----+
//! ```
//!
//! Flits are accepted into a bounded TX FIFO, leave it at most once per
//! bandwidth interval while the remote side has credits, cross a fixed
//! propagation delay, land in the RX FIFO and are forwarded on `data_out`.
//! Every `fifo_credit_bar` forwarded flits, a batch of credits travels back
//! over the same propagation delay. Each stage re-arms its own event every
//! cycle while it has work.

use std::collections::VecDeque;

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::{EventId, PortId, SimTime, PS_PER_NS};

const PORT_IN: PortId = 0;
const PORT_OUT: PortId = 1;

/// Static parameters of a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkConfig {
    pub link_id: i64,
    /// Capacity of the receiving FIFO, also the initial credit count
    pub fifo_depth_rx: usize,
    /// Capacity of the sending FIFO
    pub fifo_depth_tx: usize,
    /// Forwarded flits per returned credit batch
    pub fifo_credit_bar: usize,
    /// Bytes per flit
    pub flit_granularity_byte: usize,
    /// Propagation delay in nanoseconds
    pub link_latency_ns: u64,
    /// Link bandwidth in GB/s
    pub link_bandwidth_gbps: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            link_id: 0,
            fifo_depth_rx: 64,
            fifo_depth_tx: 64,
            fifo_credit_bar: 10,
            flit_granularity_byte: 64,
            link_latency_ns: 256,
            link_bandwidth_gbps: 256,
        }
    }
}

impl LinkConfig {
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let defaults = Self::default();
        let link = Self {
            link_id: config.get_int_or("link_id", defaults.link_id)?,
            fifo_depth_rx: config.get_usize_or("fifo_depth_rx", defaults.fifo_depth_rx)?,
            fifo_depth_tx: config.get_usize_or("fifo_depth_tx", defaults.fifo_depth_tx)?,
            fifo_credit_bar: config.get_usize_or("fifo_credit_bar", defaults.fifo_credit_bar)?,
            flit_granularity_byte: config
                .get_usize_or("flit_granularity_byte", defaults.flit_granularity_byte)?,
            link_latency_ns: config.get_uint_or("link_latency_ns", defaults.link_latency_ns)?,
            link_bandwidth_gbps: config
                .get_uint_or("link_bandwidth_GBps", defaults.link_bandwidth_gbps)?,
        };
        link.validate()?;
        Ok(link)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let checks = [
            ("fifo_depth_rx", self.fifo_depth_rx as u64),
            ("fifo_depth_tx", self.fifo_depth_tx as u64),
            ("fifo_credit_bar", self.fifo_credit_bar as u64),
            ("flit_granularity_byte", self.flit_granularity_byte as u64),
            ("link_bandwidth_GBps", self.link_bandwidth_gbps),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be non-zero".to_string(),
                });
            }
        }
        if self.fifo_credit_bar > self.fifo_depth_rx {
            return Err(ConfigError::InvalidValue {
                key: "fifo_credit_bar".to_string(),
                reason: format!(
                    "{} exceeds fifo_depth_rx {}, credits would never return",
                    self.fifo_credit_bar, self.fifo_depth_rx
                ),
            });
        }
        Ok(())
    }

    /// Minimum time between two flits leaving the TX FIFO.
    pub fn bandwidth_interval(&self) -> SimTime {
        1000 * self.flit_granularity_byte as u64 / self.link_bandwidth_gbps
    }

    /// Propagation delay in picoseconds.
    pub fn latency_ps(&self) -> SimTime {
        self.link_latency_ns * PS_PER_NS
    }
}

#[derive(Debug)]
struct DelayedFlit {
    flit: Request,
    arrival: SimTime,
}

#[derive(Debug)]
struct DelayedCredit {
    credits: usize,
    arrival: SimTime,
}

/// Die-to-die link with ports `data_in` and `data_out`.
#[derive(Debug)]
pub struct D2DLink {
    config: LinkConfig,
    bw_interval: SimTime,
    tx_fifo: VecDeque<Request>,
    delay_line: VecDeque<DelayedFlit>,
    rx_fifo: VecDeque<Request>,
    credit_line: VecDeque<DelayedCredit>,
    tx_allowed: usize,
    credit_count: usize,
    next_tx: SimTime,
    input_stalled: bool,
    output_stalled: bool,
    /// Flits accepted on `data_in`
    pub flits_accepted: u64,
    /// Flits that left the TX FIFO
    pub flits_sent: u64,
    /// Flits forwarded on `data_out`
    pub flits_delivered: u64,
    /// Requests denied because the TX FIFO was full
    pub denied: u64,
    /// Credit batches sent back
    pub credit_batches: u64,
    /// Highest RX FIFO occupancy observed
    pub max_rx_occupancy: usize,
    /// Time of the last flit forwarded on `data_out`
    pub last_delivery: Option<SimTime>,
}

impl D2DLink {
    pub const TX: EventId = 0;
    pub const RX: EventId = 1;
    pub const OUT: EventId = 2;

    pub fn new(config: LinkConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            bw_interval: config.bandwidth_interval(),
            tx_allowed: config.fifo_depth_rx,
            config,
            tx_fifo: VecDeque::new(),
            delay_line: VecDeque::new(),
            rx_fifo: VecDeque::new(),
            credit_line: VecDeque::new(),
            credit_count: 0,
            next_tx: 0,
            input_stalled: false,
            output_stalled: false,
            flits_accepted: 0,
            flits_sent: 0,
            flits_delivered: 0,
            denied: 0,
            credit_batches: 0,
            max_rx_occupancy: 0,
            last_delivery: None,
        })
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Self::new(LinkConfig::from_config(config)?)
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Credits currently available to the sender.
    pub fn tx_credits(&self) -> usize {
        self.tx_allowed
    }

    pub fn tx_occupancy(&self) -> usize {
        self.tx_fifo.len()
    }

    pub fn rx_occupancy(&self) -> usize {
        self.rx_fifo.len()
    }

    /// Credits held anywhere in the loop: available, in flight as flits,
    /// buffered, counted but not returned, or returning. Always equals
    /// `fifo_depth_rx`.
    pub fn credits_in_loop(&self) -> usize {
        self.tx_allowed
            + self.delay_line.len()
            + self.rx_fifo.len()
            + self.credit_count
            + self.credit_line.iter().map(|c| c.credits).sum::<usize>()
    }

    fn tx_step(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let now = ctx.now();

        if self.credit_line.front().is_some_and(|c| c.arrival <= now) {
            if let Some(credit) = self.credit_line.pop_front() {
                self.tx_allowed += credit.credits;
                tracing::trace!(component = ctx.name(), tx_allowed = self.tx_allowed, "credits received");
            }
        }

        if self.tx_allowed > 0 && self.next_tx <= now {
            if let Some(flit) = self.tx_fifo.pop_front() {
                self.tx_allowed -= 1;
                self.flits_sent += 1;
                self.delay_line.push_back(DelayedFlit {
                    flit,
                    arrival: now + self.config.latency_ps(),
                });
                self.next_tx = now + self.bw_interval;
                ctx.enqueue(Self::RX, 1);
                tracing::trace!(
                    component = ctx.name(),
                    tx_fifo = self.tx_fifo.len(),
                    tx_allowed = self.tx_allowed,
                    "flit sent"
                );
            }
        }

        if self.input_stalled && self.tx_fifo.len() < self.config.fifo_depth_tx {
            self.input_stalled = false;
            tracing::trace!(component = ctx.name(), "TX FIFO has room, granting input");
            ctx.grant(PORT_IN)?;
        }

        if !self.tx_fifo.is_empty() || !self.credit_line.is_empty() {
            ctx.enqueue(Self::TX, 1);
        }
        Ok(())
    }

    fn rx_step(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        let now = ctx.now();
        if self.delay_line.front().is_some_and(|d| d.arrival <= now) {
            if self.rx_fifo.len() >= self.config.fifo_depth_rx {
                return Err(ctx.fatal(format!(
                    "credit accounting broken: RX FIFO full ({} flits) on arrival",
                    self.rx_fifo.len()
                )));
            }
            if let Some(delayed) = self.delay_line.pop_front() {
                self.rx_fifo.push_back(delayed.flit);
                self.max_rx_occupancy = self.max_rx_occupancy.max(self.rx_fifo.len());
                ctx.enqueue(Self::OUT, 1);
                tracing::trace!(component = ctx.name(), rx_fifo = self.rx_fifo.len(), "flit received");
            }
        }

        if !self.delay_line.is_empty() {
            ctx.enqueue(Self::RX, 1);
        }
        Ok(())
    }

    fn out_step(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if !self.output_stalled {
            if let Some(flit) = self.rx_fifo.pop_front() {
                match ctx.req(PORT_OUT, flit)? {
                    IoStatus::Denied(flit) => {
                        tracing::debug!(component = ctx.name(), "output stalled");
                        self.output_stalled = true;
                        self.rx_fifo.push_front(flit);
                    }
                    IoStatus::Completed(_) | IoStatus::Pending => self.forwarded(ctx),
                }
            }
        }

        if !self.rx_fifo.is_empty() && !self.output_stalled {
            ctx.enqueue(Self::OUT, 1);
        }
        Ok(())
    }

    fn forwarded(&mut self, ctx: &mut SimContext<'_>) {
        self.flits_delivered += 1;
        self.last_delivery = Some(ctx.now());
        self.credit_count += 1;
        if self.credit_count >= self.config.fifo_credit_bar {
            self.credit_line.push_back(DelayedCredit {
                credits: self.credit_count,
                arrival: ctx.now() + self.config.latency_ps(),
            });
            self.credit_batches += 1;
            tracing::trace!(component = ctx.name(), credits = self.credit_count, "credits returned");
            self.credit_count = 0;
            ctx.enqueue(Self::TX, 1);
        }
    }
}

impl Component for D2DLink {
    fn type_name(&self) -> &'static str {
        "D2DLink"
    }

    fn ports(&self) -> Vec<PortDesc> {
        vec![PortDesc::io_slave("data_in"), PortDesc::io_master("data_out")]
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        _port: PortId,
        req: Request,
    ) -> SimResult<IoStatus> {
        if req.size() != self.config.flit_granularity_byte {
            return Err(ctx.fatal(format!(
                "request size (0x{:x}) is not flit_granularity_byte (0x{:x})",
                req.size(),
                self.config.flit_granularity_byte
            )));
        }
        if !req.is_write {
            return Err(ctx.fatal("read request is not supported"));
        }
        if self.input_stalled {
            return Err(ctx.fatal("new request while a denied one awaits its grant"));
        }

        if self.tx_fifo.len() >= self.config.fifo_depth_tx {
            tracing::trace!(component = ctx.name(), "TX FIFO full, request denied");
            self.input_stalled = true;
            self.denied += 1;
            return Ok(IoStatus::Denied(req));
        }

        self.tx_fifo.push_back(req.fork());
        self.flits_accepted += 1;
        ctx.enqueue(Self::TX, 1);
        Ok(IoStatus::Completed(req))
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, event: EventId) -> SimResult<()> {
        match event {
            Self::TX => self.tx_step(ctx),
            Self::RX => self.rx_step(ctx),
            Self::OUT => self.out_step(ctx),
            other => Err(ctx.fatal(format!("unknown event {}", other))),
        }
    }

    fn handle_resp(&mut self, ctx: &mut SimContext<'_>, _port: PortId, _req: Request) -> SimResult<()> {
        tracing::trace!(component = ctx.name(), "response from output, flit released");
        Ok(())
    }

    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, _port: PortId) -> SimResult<()> {
        if !self.output_stalled {
            return Err(ctx.fatal("granted while the output is not stalled"));
        }
        self.output_stalled = false;
        tracing::trace!(component = ctx.name(), "output un-stalled");
        ctx.enqueue(Self::OUT, 1);
        Ok(())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "link_id": self.config.link_id,
            "flits_accepted": self.flits_accepted,
            "flits_sent": self.flits_sent,
            "flits_delivered": self.flits_delivered,
            "denied": self.denied,
            "credit_batches": self.credit_batches,
            "max_rx_occupancy": self.max_rx_occupancy,
            "tx_credits": self.tx_allowed,
        })
    }
}
