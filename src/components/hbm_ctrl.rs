//! HBM band splitter.
//!
//! Spreads the accesses of the clusters over `nb_slaves` HBM channels.
//! Consecutive `2^interleaving_bits`-byte lines go to consecutive channels
//! and the channel-select bits are squeezed out of the address that
//! reaches the channel.
//!
//! Three kinds of slave ports exist:
//! - `input`: plain interleaving of a global offset.
//! - `in_<j>`: offsets local to node `j`, relocated by
//!   `j * node_addr_offset` first. Nodes can share a channel group
//!   (`hbm_node_aliase`), and the channel choice can be scrambled with
//!   xor folding or spread over `nb_slaves - 1` channels.
//! - `ts_in_<j>`: test-and-set view. A read returns the stored word and
//!   leaves it all ones behind.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::PortId;

/// Address bit that selects the test-and-set alias, before the channel
/// bits are removed.
const TS_ALIAS_BIT: u32 = 20;

/// Splitter configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HbmCtrlConfig {
    pub nb_slaves: usize,
    pub nb_masters: usize,
    /// Channel-select bits; 0 derives them from `nb_slaves`
    pub stage_bits: u32,
    pub interleaving_bits: u32,
    /// Size of the address window of one node
    pub node_addr_offset: u64,
    /// Number of nodes sharing one window
    pub hbm_node_aliase: u64,
    pub xor_scrambling: bool,
    pub red_scrambling: bool,
}

impl Default for HbmCtrlConfig {
    fn default() -> Self {
        Self {
            nb_slaves: 1,
            nb_masters: 0,
            stage_bits: 0,
            interleaving_bits: 2,
            node_addr_offset: 0,
            hbm_node_aliase: 1,
            xor_scrambling: false,
            red_scrambling: false,
        }
    }
}

#[derive(Debug)]
pub struct HbmCtrl {
    cfg: HbmCtrlConfig,
    bank_mask: u64,
    /// Input ports denied by each channel, waiting for its grant
    waiting: Vec<Vec<PortId>>,
    /// Requests forwarded to each channel
    pub bank_requests: Vec<u64>,
    /// Test-and-set operations performed
    pub ts_ops: u64,
    /// Requests a channel denied
    pub denied: u64,
}

impl HbmCtrl {
    pub fn new(mut cfg: HbmCtrlConfig) -> ConfigResult<Self> {
        if cfg.nb_slaves == 0 {
            return Err(ConfigError::invalid("nb_slaves", "at least one channel is needed"));
        }
        if cfg.stage_bits == 0 {
            cfg.stage_bits = cfg.nb_slaves.ilog2();
        }
        if cfg.stage_bits >= usize::BITS || (1usize << cfg.stage_bits) > cfg.nb_slaves {
            return Err(ConfigError::invalid(
                "stage_bits",
                format!(
                    "{} select bits address more than {} channels",
                    cfg.stage_bits, cfg.nb_slaves
                ),
            ));
        }
        if cfg.interleaving_bits >= 32 {
            return Err(ConfigError::invalid(
                "interleaving_bits",
                format!("{} is wider than an address", cfg.interleaving_bits),
            ));
        }
        if cfg.red_scrambling && cfg.nb_slaves < 2 {
            return Err(ConfigError::invalid(
                "red_scrambling",
                "spreading over nb_slaves - 1 channels needs two channels",
            ));
        }
        if cfg.stage_bits > TS_ALIAS_BIT {
            return Err(ConfigError::invalid(
                "stage_bits",
                format!("test-and-set ports support at most {} select bits", TS_ALIAS_BIT),
            ));
        }
        Ok(Self {
            bank_mask: (1u64 << cfg.stage_bits) - 1,
            waiting: vec![Vec::new(); cfg.nb_slaves],
            bank_requests: vec![0; cfg.nb_slaves],
            ts_ops: 0,
            denied: 0,
            cfg,
        })
    }

    /// Builds the splitter from `nb_slaves` and the optional keys of
    /// [`HbmCtrlConfig`].
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let defaults = HbmCtrlConfig::default();
        Self::new(HbmCtrlConfig {
            nb_slaves: config.get_usize("nb_slaves")?,
            nb_masters: config.get_usize_or("nb_masters", defaults.nb_masters)?,
            stage_bits: config.get_uint_or("stage_bits", 0)? as u32,
            interleaving_bits: config
                .get_uint_or("interleaving_bits", u64::from(defaults.interleaving_bits))?
                as u32,
            node_addr_offset: config.get_uint_or("node_addr_offset", 0)?,
            hbm_node_aliase: config.get_uint_or("hbm_node_aliase", defaults.hbm_node_aliase)?,
            xor_scrambling: config.get_bool_or("xor_scrambling", false)?,
            red_scrambling: config.get_bool_or("red_scrambling", false)?,
        })
    }

    pub fn config(&self) -> &HbmCtrlConfig {
        &self.cfg
    }

    fn line_mask(&self) -> u64 {
        (1u64 << self.cfg.interleaving_bits) - 1
    }

    /// Offset inside the channel once the select bits are removed.
    fn squeeze(&self, offset: u64) -> u64 {
        let ib = self.cfg.interleaving_bits;
        ((offset >> (self.cfg.stage_bits + ib)) << ib) + (offset & self.line_mask())
    }

    /// Channel and channel offset of a global offset.
    pub fn route(&self, offset: u64) -> (usize, u64) {
        let bank = (offset >> self.cfg.interleaving_bits) & self.bank_mask;
        (bank as usize, self.squeeze(offset))
    }

    /// Channel and channel offset of `offset` issued by node `mux_id`.
    pub fn route_node(&self, offset: u64, mux_id: usize) -> (usize, u64) {
        let (sb, ib) = (self.cfg.stage_bits, self.cfg.interleaving_bits);
        let mut node = mux_id as u64;
        let mut node_size = self.cfg.node_addr_offset;
        if self.cfg.hbm_node_aliase > 1 {
            node /= self.cfg.hbm_node_aliase;
            node_size *= self.cfg.hbm_node_aliase;
        }
        let offset = offset + node * node_size;

        if self.cfg.red_scrambling {
            let spread = self.cfg.nb_slaves as u64 - 1;
            let line = offset >> ib;
            let bank_offset = ((line / spread) << ib) + (offset & self.line_mask());
            return ((line % spread) as usize, bank_offset);
        }

        let mut bank = (offset >> ib) & self.bank_mask;
        if self.cfg.xor_scrambling && sb > 0 {
            let mut upper = offset >> (sb + ib);
            for _ in 0..(31 - ib) / sb {
                bank ^= upper;
                upper >>= sb;
            }
            bank &= self.bank_mask;
        }
        (bank as usize, self.squeeze(offset))
    }

    /// Channel and word offset of a test-and-set access.
    pub fn route_ts(&self, offset: u64) -> (usize, u64) {
        let sb = self.cfg.stage_bits;
        let bank = (offset >> self.cfg.interleaving_bits) & self.bank_mask;
        let word = ((offset >> (sb + 2)) << 2) + (offset & 0x3);
        (bank as usize, word & !(1u64 << (TS_ALIAS_BIT - sb)))
    }

    fn input_port(&self) -> PortId {
        0
    }

    fn out_port(&self, bank: usize) -> PortId {
        1 + bank
    }

    fn node_port(&self, node: usize) -> PortId {
        1 + self.cfg.nb_slaves + node
    }

    fn ts_port(&self, node: usize) -> PortId {
        1 + self.cfg.nb_slaves + self.cfg.nb_masters + node
    }

    /// Sends `req` to channel `bank`, remembering `from` on a denial.
    fn forward(
        &mut self,
        ctx: &mut SimContext<'_>,
        from: PortId,
        bank: usize,
        req: Request,
    ) -> SimResult<IoStatus> {
        self.bank_requests[bank] += 1;
        let status = ctx.req(self.out_port(bank), req)?;
        if status.is_denied() {
            self.denied += 1;
            if !self.waiting[bank].contains(&from) {
                self.waiting[bank].push(from);
            }
        }
        Ok(status)
    }

    fn test_and_set(
        &mut self,
        ctx: &mut SimContext<'_>,
        from: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        let offset = req.addr;
        let (bank, word) = self.route_ts(offset);
        req.addr = word;
        if req.is_write {
            return self.forward(ctx, from, bank, req);
        }

        let status = self.forward(ctx, from, bank, req)?;
        let IoStatus::Completed(read) = status else {
            return Ok(status);
        };
        let set = Request::write(word, vec![0xff; read.size()]);
        match ctx.req(self.out_port(bank), set)? {
            IoStatus::Completed(_) => {
                tracing::trace!(component = ctx.name(), offset, bank, word, "test-and-set");
                self.ts_ops += 1;
                Ok(IoStatus::Completed(read))
            }
            other => Err(ctx.fatal(format!(
                "channel {} answered the set half of a test-and-set with {:?}",
                bank,
                other.kind()
            ))),
        }
    }
}

impl Component for HbmCtrl {
    fn type_name(&self) -> &'static str {
        "HbmCtrl"
    }

    fn ports(&self) -> Vec<PortDesc> {
        let mut ports = vec![PortDesc::io_slave("input")];
        ports.extend((0..self.cfg.nb_slaves).map(|i| PortDesc::io_master(format!("out_{}", i))));
        ports.extend((0..self.cfg.nb_masters).map(|i| PortDesc::io_slave(format!("in_{}", i))));
        ports.extend((0..self.cfg.nb_masters).map(|i| PortDesc::io_slave(format!("ts_in_{}", i))));
        ports
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        let offset = req.addr;
        let (bank, bank_offset) = if port == self.input_port() {
            self.route(offset)
        } else if port < self.node_port(0) {
            return Err(ctx.fatal(format!("request on output port {}", port)));
        } else if port < self.ts_port(0) {
            self.route_node(offset, port - self.node_port(0))
        } else {
            return self.test_and_set(ctx, port, req);
        };
        tracing::trace!(
            component = ctx.name(),
            offset,
            size = req.size(),
            is_write = req.is_write,
            bank,
            bank_offset,
            "forwarding to channel"
        );
        req.addr = bank_offset;
        self.forward(ctx, port, bank, req)
    }

    fn handle_resp(&mut self, ctx: &mut SimContext<'_>, _port: PortId, req: Request) -> SimResult<()> {
        ctx.resp(req)
    }

    fn handle_grant(&mut self, ctx: &mut SimContext<'_>, port: PortId) -> SimResult<()> {
        let Some(bank) = port.checked_sub(self.out_port(0)).filter(|&b| b < self.cfg.nb_slaves)
        else {
            return Err(ctx.fatal(format!("grant on port {}, which is not a channel", port)));
        };
        for from in std::mem::take(&mut self.waiting[bank]) {
            ctx.grant(from)?;
        }
        Ok(())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "nb_slaves": self.cfg.nb_slaves,
            "stage_bits": self.cfg.stage_bits,
            "interleaving_bits": self.cfg.interleaving_bits,
            "bank_requests": self.bank_requests,
            "ts_ops": self.ts_ops,
            "denied": self.denied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::memory::Memory;
    use crate::components::mock::ScriptedMaster;
    use crate::engine::SimulationEngine;
    use crate::request::IoStatusKind;
    use crate::types::EventId;

    fn four_channels() -> HbmCtrlConfig {
        HbmCtrlConfig {
            nb_slaves: 4,
            nb_masters: 2,
            node_addr_offset: 0x100,
            ..HbmCtrlConfig::default()
        }
    }

    #[test]
    fn test_config_validation() {
        let ctrl = HbmCtrl::new(four_channels()).unwrap();
        assert_eq!(ctrl.config().stage_bits, 2);

        assert!(HbmCtrl::new(HbmCtrlConfig { nb_slaves: 0, ..four_channels() }).is_err());
        assert!(HbmCtrl::new(HbmCtrlConfig { stage_bits: 3, ..four_channels() }).is_err());
        assert!(HbmCtrl::new(HbmCtrlConfig {
            nb_slaves: 1,
            red_scrambling: true,
            ..four_channels()
        })
        .is_err());

        let cfg = ComponentConfig::new()
            .with("nb_slaves", 8)
            .with("nb_masters", 4)
            .with("interleaving_bits", 6)
            .with("xor_scrambling", 1);
        let ctrl = HbmCtrl::from_config(&cfg).unwrap();
        assert_eq!(ctrl.config().stage_bits, 3);
        assert!(ctrl.config().xor_scrambling);
        assert_eq!(ctrl.ports().len(), 1 + 8 + 4 + 4);
    }

    #[test]
    fn test_plain_and_node_routes() {
        let ctrl = HbmCtrl::new(four_channels()).unwrap();
        // line 5 -> channel 1, second row of channels
        assert_eq!(ctrl.route(0x14), (1, 0x4));
        assert_eq!(ctrl.route(0x3), (0, 0x3));
        // node 1 starts 0x100 higher
        assert_eq!(ctrl.route_node(0x14, 1), (1, 0x44));
        assert_eq!(ctrl.route_node(0x14, 0), ctrl.route(0x14));

        let aliased = HbmCtrl::new(HbmCtrlConfig { hbm_node_aliase: 2, ..four_channels() }).unwrap();
        // nodes 2 and 3 share the window at 0x200
        assert_eq!(aliased.route_node(0x0, 3), aliased.route(0x200));
        assert_eq!(aliased.route_node(0x0, 2), aliased.route(0x200));
    }

    #[test]
    fn test_scrambled_routes() {
        let xor = HbmCtrl::new(HbmCtrlConfig { xor_scrambling: true, ..four_channels() }).unwrap();
        // line 4 folds the upper bits 0b01 into the select bits 0b00
        assert_eq!(xor.route_node(0x10, 0), (1, 0x4));
        assert_eq!(xor.route(0x10), (0, 0x4));

        let red = HbmCtrl::new(HbmCtrlConfig { red_scrambling: true, ..four_channels() }).unwrap();
        // line 5 over three channels
        assert_eq!(red.route_node(0x14, 0), (2, 0x4));
        assert_eq!(red.route_node(0x16, 0), (2, 0x6));
        for line in 0..32u64 {
            assert!(red.route_node(line << 2, 0).0 < 3);
        }
    }

    #[test]
    fn test_ts_alias_bit_is_cleared() {
        let ctrl = HbmCtrl::new(four_channels()).unwrap();
        assert_eq!(ctrl.route_ts(0x10_0014), (1, 0x4));
        assert_eq!(ctrl.route_ts(0x14), (1, 0x4));
    }

    fn platform(script: ScriptedMaster, port: &str) -> SimulationEngine {
        let mut engine = SimulationEngine::new();
        engine.add_component("cluster", Box::new(script)).unwrap();
        engine
            .add_component("hbm_ctrl", Box::new(HbmCtrl::new(four_channels()).unwrap()))
            .unwrap();
        engine
            .bind_paths("cluster:out", &format!("hbm_ctrl:{}", port))
            .unwrap();
        for ch in 0..4 {
            engine
                .add_component(format!("hbm_{}", ch), Box::new(Memory::new(0x1000, 10)))
                .unwrap();
            engine
                .bind_paths(&format!("hbm_ctrl:out_{}", ch), &format!("hbm_{}:input", ch))
                .unwrap();
        }
        engine
    }

    #[test]
    fn test_node_accesses_reach_their_channel() {
        let script = ScriptedMaster::new()
            .with_request(1, Request::write_u32(0x14, 0xcafe))
            .with_request(2, Request::read_u32(0x14));
        let mut engine = platform(script, "in_1");
        engine.run().unwrap();

        let cluster = engine.component_by_path::<ScriptedMaster>("cluster").unwrap();
        assert_eq!(cluster.completions[1].request.value_u32(), Some(0xcafe));
        assert_eq!(cluster.completions[1].request.latency, 10);
        let hbm = engine.component_by_path::<Memory>("hbm_1").unwrap();
        assert_eq!(hbm.peek(0x44, 4), Some(&0xcafe_u32.to_le_bytes()[..]));
        let ctrl = engine.component_by_path::<HbmCtrl>("hbm_ctrl").unwrap();
        assert_eq!(ctrl.bank_requests, vec![0, 2, 0, 0]);
    }

    #[test]
    fn test_test_and_set_returns_old_value() {
        let script = ScriptedMaster::new()
            .with_request(1, Request::read_u32(0x10_0014))
            .with_request(2, Request::read_u32(0x10_0014));
        let mut engine = platform(script, "ts_in_0");
        engine
            .component_by_path_mut::<Memory>("hbm_1")
            .unwrap()
            .load(0x4, &7u32.to_le_bytes());
        engine.run().unwrap();

        let cluster = engine.component_by_path::<ScriptedMaster>("cluster").unwrap();
        assert_eq!(cluster.completions[0].request.value_u32(), Some(7));
        assert_eq!(cluster.completions[1].request.value_u32(), Some(u32::MAX));
        assert_eq!(engine.component_by_path::<HbmCtrl>("hbm_ctrl").unwrap().ts_ops, 2);
    }

    /// Channel serving one access at a time after `delay` cycles.
    struct BusyChannel {
        delay: u64,
        parked: Option<Request>,
        denied: bool,
    }

    impl Component for BusyChannel {
        fn type_name(&self) -> &'static str {
            "BusyChannel"
        }

        fn ports(&self) -> Vec<PortDesc> {
            vec![PortDesc::io_slave("input")]
        }

        fn handle_req(
            &mut self,
            ctx: &mut SimContext<'_>,
            _port: PortId,
            req: Request,
        ) -> SimResult<IoStatus> {
            if self.parked.is_some() {
                self.denied = true;
                return Ok(IoStatus::Denied(req));
            }
            self.parked = Some(req);
            ctx.enqueue(0, self.delay);
            Ok(IoStatus::Pending)
        }

        fn handle_event(&mut self, ctx: &mut SimContext<'_>, _event: EventId) -> SimResult<()> {
            if let Some(req) = self.parked.take() {
                ctx.resp(req)?;
            }
            if std::mem::take(&mut self.denied) {
                ctx.grant(0)?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_pending_and_denied_pass_through() {
        let script = ScriptedMaster::new()
            .with_request(1, Request::write_u32(0x0, 1))
            .with_request(2, Request::write_u32(0x40, 2));
        let mut engine = SimulationEngine::new();
        engine.add_component("cluster", Box::new(script)).unwrap();
        engine
            .add_component(
                "hbm_ctrl",
                Box::new(HbmCtrl::new(HbmCtrlConfig { nb_slaves: 1, ..HbmCtrlConfig::default() }).unwrap()),
            )
            .unwrap();
        engine
            .add_component(
                "hbm",
                Box::new(BusyChannel {
                    delay: 5,
                    parked: None,
                    denied: false,
                }),
            )
            .unwrap();
        engine.bind_paths("cluster:out", "hbm_ctrl:input").unwrap();
        engine.bind_paths("hbm_ctrl:out_0", "hbm:input").unwrap();
        engine.run().unwrap();

        let cluster = engine.component_by_path::<ScriptedMaster>("cluster").unwrap();
        assert_eq!(cluster.denials, 1);
        assert_eq!(cluster.grants, 1);
        let times: Vec<u64> = cluster.completions.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![6000, 11_000]);
        assert!(cluster.completions.iter().all(|c| c.status == IoStatusKind::Pending));
        assert!(cluster.is_done());

        let ctrl = engine.component_by_path::<HbmCtrl>("hbm_ctrl").unwrap();
        assert_eq!(ctrl.denied, 1);
        assert_eq!(ctrl.bank_requests, vec![3]);
    }
}
