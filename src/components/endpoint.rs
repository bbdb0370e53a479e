//! Traffic endpoint of a chip-to-chip platform.
//!
//! After its `start` wire fires, an endpoint streams `num_tx_flit` flits on
//! `data_out`, at most one per cycle, and marks the last one. A receiver
//! answers the last flit of a transfer with an acknowledgement; when the
//! sender sees that acknowledgement it reports the achieved bandwidth and
//! raises `barrier_req`.

use std::collections::VecDeque;

use crate::component::{Component, PortDesc};
use crate::components::flit::{self, FlitArg};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::{EventId, PortId, SimTime};

const PORT_DATA_IN: PortId = 0;
const PORT_DATA_OUT: PortId = 1;
const PORT_BARRIER_REQ: PortId = 3;

/// Flit generator and sink.
#[derive(Debug)]
pub struct Endpoint {
    endpoint_id: u64,
    num_tx_flit: u64,
    flit_granularity_byte: usize,
    /// Destination of data flits not covered by `destinations`
    dest_id: u64,
    /// Per-flit destinations
    destinations: Vec<u64>,
    ack_queue: VecDeque<u64>,
    stash: Option<Request>,
    start_time: Option<SimTime>,
    /// Data flits handed to `data_out`
    pub tx_flits: u64,
    /// Flits received, acknowledgements included
    pub rx_flits: u64,
    /// Acknowledgements sent
    pub acks_sent: u64,
    /// Times the output denied a flit
    pub stalls: u64,
    /// Time the acknowledgement of the transfer came back
    pub finish_time: Option<SimTime>,
    /// Measured bandwidth in GB/s, once acknowledged
    pub bandwidth_gbps: Option<f64>,
}

impl Endpoint {
    /// Event sending the next flit.
    pub const TX: EventId = 0;

    pub fn new(endpoint_id: u64, num_tx_flit: u64, flit_granularity_byte: usize) -> Self {
        Self {
            endpoint_id,
            num_tx_flit,
            flit_granularity_byte,
            dest_id: endpoint_id,
            destinations: Vec::new(),
            ack_queue: VecDeque::new(),
            stash: None,
            start_time: None,
            tx_flits: 0,
            rx_flits: 0,
            acks_sent: 0,
            stalls: 0,
            finish_time: None,
            bandwidth_gbps: None,
        }
    }

    /// Sends every data flit to `dest_id` instead of to self.
    pub fn with_destination(mut self, dest_id: u64) -> Self {
        self.dest_id = dest_id;
        self
    }

    /// Sends flit `i` to `destinations[i]`.
    pub fn with_destinations(mut self, destinations: Vec<u64>) -> ConfigResult<Self> {
        if (destinations.len() as u64) < self.num_tx_flit {
            return Err(ConfigError::InvalidValue {
                key: "destinations".to_string(),
                reason: format!(
                    "{} destinations for {} flits",
                    destinations.len(),
                    self.num_tx_flit
                ),
            });
        }
        self.destinations = destinations;
        Ok(self)
    }

    /// Builds an endpoint from `endpoint_id`, `num_tx_flit`,
    /// `flit_granularity_byte` and either a `destinations` list or a single
    /// `dest_id` (default: itself).
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let endpoint_id = config.get_uint("endpoint_id")?;
        let endpoint = Self::new(
            endpoint_id,
            config.get_uint("num_tx_flit")?,
            config.get_usize("flit_granularity_byte")?,
        )
        .with_destination(config.get_uint_or("dest_id", endpoint_id)?);
        if config.contains("destinations") {
            endpoint.with_destinations(config.get_uint_list("destinations")?)
        } else {
            Ok(endpoint)
        }
    }

    pub fn endpoint_id(&self) -> u64 {
        self.endpoint_id
    }

    /// Returns true once every data flit left and no acknowledgement is due.
    pub fn is_idle(&self) -> bool {
        self.tx_flits >= self.num_tx_flit && self.ack_queue.is_empty() && self.stash.is_none()
    }

    fn next_data_flit(&mut self) -> Request {
        let dest = self
            .destinations
            .get(self.tx_flits as usize)
            .copied()
            .unwrap_or(self.dest_id);
        let mut flit = flit::new_flit(self.endpoint_id, dest, self.flit_granularity_byte);
        self.tx_flits += 1;
        if self.tx_flits >= self.num_tx_flit {
            flit::set(&mut flit, FlitArg::IsLast, 1);
        }
        flit
    }

    fn send(&mut self, ctx: &mut SimContext<'_>, flit: Request) -> SimResult<()> {
        let dest = flit::get(&flit, FlitArg::DestId);
        match ctx.req(PORT_DATA_OUT, flit)? {
            IoStatus::Denied(flit) => {
                tracing::trace!(component = ctx.name(), "output stalled");
                self.stalls += 1;
                self.stash = Some(flit);
            }
            IoStatus::Completed(_) | IoStatus::Pending => {
                tracing::trace!(component = ctx.name(), dest, sent = self.tx_flits, "flit sent");
            }
        }
        Ok(())
    }

    fn tx_step(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if self.stash.is_none() {
            if let Some(dest) = self.ack_queue.pop_front() {
                let mut ack = flit::new_flit(self.endpoint_id, dest, self.flit_granularity_byte);
                flit::set(&mut ack, FlitArg::IsAck, 1);
                self.acks_sent += 1;
                self.send(ctx, ack)?;
            } else if self.tx_flits < self.num_tx_flit {
                let flit = self.next_data_flit();
                self.send(ctx, flit)?;
            }
        }
        if self.stash.is_none() && !self.is_idle() {
            ctx.enqueue(Self::TX, 1);
        }
        Ok(())
    }

    fn receive(&mut self, ctx: &mut SimContext<'_>, flit: &Request) -> SimResult<()> {
        self.rx_flits += 1;
        tracing::trace!(component = ctx.name(), received = self.rx_flits, "flit received");

        if flit::get(flit, FlitArg::IsLast) == 1 {
            self.ack_queue.push_back(flit::get(flit, FlitArg::SourId) as u64);
            if self.stash.is_none() {
                ctx.enqueue(Self::TX, 1);
            }
        }

        if flit::get(flit, FlitArg::IsAck) == 1 {
            let now = ctx.now();
            let elapsed_ns = now.saturating_sub(self.start_time.unwrap_or(0)) as f64 / 1000.0;
            let bytes = (self.tx_flits as usize * self.flit_granularity_byte) as f64;
            let bandwidth = if elapsed_ns > 0.0 { bytes / elapsed_ns } else { 0.0 };
            self.finish_time = Some(now);
            self.bandwidth_gbps = Some(bandwidth);
            tracing::debug!(
                component = ctx.name(),
                flits = self.tx_flits,
                total_ns = elapsed_ns,
                bandwidth_gbps = bandwidth,
                "transfer acknowledged"
            );
            if ctx.is_bound(PORT_BARRIER_REQ) {
                ctx.wire(PORT_BARRIER_REQ, 1)?;
            }
        }
        Ok(())
    }
}

impl Component for Endpoint {
    fn type_name(&self) -> &'static str {
        "Endpoint"
    }

    fn ports(&self) -> Vec<PortDesc> {
        vec![
            PortDesc::io_slave("data_in"),
            PortDesc::io_master("data_out"),
            PortDesc::wire_slave("start"),
            PortDesc::wire_master("barrier_req"),
        ]
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
        self.tx_step(ctx)
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: PortId,
        req: Request,
    ) -> SimResult<IoStatus> {
        if port != PORT_DATA_IN {
            return Err(ctx.fatal(format!("request on port {}, which is not data_in", port)));
        }
        self.receive(ctx, &req)?;
        Ok(IoStatus::Completed(req))
    }

    fn handle_resp(&mut self, _ctx: &mut SimContext<'_>, _port: PortId, _req: Request) -> SimResult<()> {
        Ok(())
    }

    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, _port: PortId) -> SimResult<()> {
        let Some(flit) = self.stash.take() else {
            return Err(ctx.fatal("output is not stalled but a grant arrived"));
        };
        tracing::trace!(component = ctx.name(), "output un-stalled");
        self.send(ctx, flit)?;
        if self.stash.is_none() && !self.is_idle() {
            ctx.enqueue(Self::TX, 1);
        }
        Ok(())
    }

    fn handle_wire(&mut self, ctx: &mut SimContext<'_>, _port: PortId, _value: u64) -> SimResult<()> {
        tracing::debug!(component = ctx.name(), "start sending flits");
        self.start_time = Some(ctx.now());
        ctx.enqueue(Self::TX, 1);
        Ok(())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "endpoint_id": self.endpoint_id,
            "tx_flits": self.tx_flits,
            "rx_flits": self.rx_flits,
            "acks_sent": self.acks_sent,
            "stalls": self.stalls,
            "finish_time": self.finish_time,
            "bandwidth_gbps": self.bandwidth_gbps,
        })
    }
}
