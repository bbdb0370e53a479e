//! Platform assembly.
//!
//! [`build_engine`] turns a declarative [`PlatformConfig`] into a ready
//! [`SimulationEngine`]. [`C2cPlatformConfig`] generates the configuration
//! of a chip-to-chip platform: a controller, one endpoint per chip, and a
//! network of links and routers joining the endpoints.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::components::topology::{EAST, LOCAL, NORTH, SOUTH, WEST};
use crate::config::{ComponentConfig, ConfigError, ConfigResult, PlatformConfig, PlatformConfigBuilder};
use crate::engine::SimulationEngine;
use crate::error::SimResult;
use crate::registry::ComponentRegistry;

/// Instantiates every component of `config`, applies clock overrides and
/// performs every binding.
///
/// A component may carry a `frequency_mhz` attribute overriding the
/// platform default.
pub fn build_engine(config: &PlatformConfig, registry: &ComponentRegistry) -> SimResult<SimulationEngine> {
    config.validate()?;
    let mut engine = SimulationEngine::with_frequency_mhz(config.simulation.frequency_mhz)?;
    engine.set_max_time(config.simulation.max_time);
    if config.simulation.trace_events {
        engine.enable_trace();
    }

    for spec in &config.components {
        let component = registry.create(&spec.component_type, &spec.attrs)?;
        let id = engine.add_component(spec.path.as_str(), component)?;
        if spec.attrs.contains("frequency_mhz") {
            engine.set_frequency_mhz(id, spec.attrs.get_uint("frequency_mhz")?)?;
        }
    }
    for binding in &config.bindings {
        engine.bind_paths(&binding.master, &binding.slave)?;
    }

    info!(
        components = config.components.len(),
        bindings = config.bindings.len(),
        "platform built"
    );
    Ok(engine)
}

/// Network joining the chips of a [`C2cPlatformConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum C2cTopology {
    /// Every chip is linked to itself
    #[serde(rename = "self-link")]
    SelfLink { num_chip: u64 },
    /// Chips on an `num_chip_x` by `num_chip_y` grid, one radix-5 router each
    Mesh2d { num_chip_x: u64, num_chip_y: u64 },
    /// A fat tree of `level` router levels
    Fattree { radix: u64, level: u32 },
}

impl C2cTopology {
    pub fn num_chip(&self) -> u64 {
        match self {
            C2cTopology::SelfLink { num_chip } => *num_chip,
            C2cTopology::Mesh2d { num_chip_x, num_chip_y } => num_chip_x * num_chip_y,
            C2cTopology::Fattree { radix, level } => 2 * (radix / 2).pow(*level),
        }
    }
}

/// Parameters of a chip-to-chip platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct C2cPlatformConfig {
    pub topology: C2cTopology,
    /// Data flits each endpoint sends
    pub num_tx_flit: u64,
    /// Endpoint `i` sends to `(i + traffic_shift) % num_chip`
    pub traffic_shift: u64,
    pub flit_granularity_byte: u64,
    /// Latency of chip-to-chip links
    pub link_latency_ns: u64,
    /// Latency of the links between an endpoint and its router
    pub local_latency_ns: u64,
    #[serde(rename = "link_bandwidth_GBps")]
    pub link_bandwidth_gbps: u64,
    pub link_depth_rx: u64,
    pub link_depth_tx: u64,
    pub link_credit_bar: u64,
    /// Input FIFO depth of every router
    pub router_virtual_ch: u64,
    pub frequency_mhz: u64,
}

impl Default for C2cPlatformConfig {
    fn default() -> Self {
        Self {
            topology: C2cTopology::Mesh2d {
                num_chip_x: 4,
                num_chip_y: 4,
            },
            num_tx_flit: 2000,
            traffic_shift: 0,
            flit_granularity_byte: 512,
            link_latency_ns: 256,
            local_latency_ns: 3,
            link_bandwidth_gbps: 256,
            link_depth_rx: 1024,
            link_depth_tx: 1024,
            link_credit_bar: 10,
            router_virtual_ch: 2,
            frequency_mhz: 1000,
        }
    }
}

impl C2cPlatformConfig {
    /// Generates the platform description.
    pub fn to_platform_config(&self) -> ConfigResult<PlatformConfig> {
        let num_chip = self.topology.num_chip();
        if num_chip == 0 {
            return Err(ConfigError::Validation("platform without chips".to_string()));
        }
        let mut net = NetBuilder::new(self);

        net.add(
            "ctrl",
            "PlatformCtrl",
            ComponentConfig::new().with("num_chip", num_chip),
        );
        for eid in 0..num_chip {
            let path = format!("endpoint_{}", eid);
            net.add(
                &path,
                "Endpoint",
                ComponentConfig::new()
                    .with("endpoint_id", eid)
                    .with("num_tx_flit", self.num_tx_flit)
                    .with("flit_granularity_byte", self.flit_granularity_byte)
                    .with("dest_id", (eid + self.traffic_shift) % num_chip),
            );
            net.bind(&format!("ctrl:start_{}", eid), &format!("{}:start", path));
            net.bind(&format!("{}:barrier_req", path), &format!("ctrl:barrier_ack_{}", eid));
        }

        match &self.topology {
            C2cTopology::SelfLink { num_chip } => {
                for eid in 0..*num_chip {
                    let endpoint = format!("endpoint_{}", eid);
                    let link = net.link(&format!("d2dlink_{}_to_{}", eid, eid), eid, self.link_latency_ns);
                    net.bind(&format!("{}:data_out", endpoint), &format!("{}:data_in", link));
                    net.bind(&format!("{}:data_out", link), &format!("{}:data_in", endpoint));
                }
            }
            C2cTopology::Mesh2d { num_chip_x, num_chip_y } => {
                net.build_mesh(*num_chip_x, *num_chip_y)?;
            }
            C2cTopology::Fattree { radix, level } => {
                net.build_fat_tree(*radix, *level)?;
            }
        }

        debug!(topology = ?self.topology, num_chip, "c2c platform generated");
        net.builder.frequency_mhz(self.frequency_mhz).build()
    }
}

/// Accumulates components and bindings of a generated network.
struct NetBuilder<'a> {
    cfg: &'a C2cPlatformConfig,
    builder: PlatformConfigBuilder,
}

impl<'a> NetBuilder<'a> {
    fn new(cfg: &'a C2cPlatformConfig) -> Self {
        Self {
            cfg,
            builder: PlatformConfigBuilder::new(),
        }
    }

    fn add(&mut self, path: &str, component_type: &str, attrs: ComponentConfig) {
        let builder = std::mem::take(&mut self.builder);
        self.builder = builder.add_component(path, component_type, attrs);
    }

    fn bind(&mut self, master: &str, slave: &str) {
        let builder = std::mem::take(&mut self.builder);
        self.builder = builder.bind(master, slave);
    }

    /// Adds a link and returns its path.
    fn link(&mut self, path: &str, link_id: u64, latency_ns: u64) -> String {
        let cfg = self.cfg;
        self.add(
            path,
            "D2DLink",
            ComponentConfig::new()
                .with("link_id", link_id)
                .with("fifo_depth_rx", cfg.link_depth_rx)
                .with("fifo_depth_tx", cfg.link_depth_tx)
                .with("fifo_credit_bar", cfg.link_credit_bar)
                .with("flit_granularity_byte", cfg.flit_granularity_byte)
                .with("link_latency_ns", latency_ns)
                .with("link_bandwidth_GBps", cfg.link_bandwidth_gbps),
        );
        path.to_string()
    }

    /// Adds a router and its topology manager.
    fn router(&mut self, router: &str, top: &str, radix: u64, topology: ComponentConfig) {
        self.add(
            router,
            "Router",
            ComponentConfig::new()
                .with("radix", radix)
                .with("virtual_ch", self.cfg.router_virtual_ch),
        );
        self.add(top, "TopologyManager", topology);
        self.bind(&format!("{}:top_req", router), &format!("{}:in", top));
    }

    /// Joins output `out_port` of `from` to input `in_port` of `to` with a
    /// link.
    fn connect(&mut self, from: &str, out_port: u64, link: &str, to: &str, in_port: u64) {
        self.bind(&format!("{}:out_{}", from, out_port), &format!("{}:data_in", link));
        self.bind(&format!("{}:data_out", link), &format!("{}:in_{}", to, in_port));
    }

    /// Joins `endpoint` to port `port` of `router` in both directions.
    fn attach_endpoint(&mut self, eid: u64, router: &str, port: u64, link_id: u64) {
        let endpoint = format!("endpoint_{}", eid);
        let latency = self.cfg.local_latency_ns;
        let e2r = self.link(&format!("link_{}_to_{}", endpoint, router), link_id, latency);
        let r2e = self.link(&format!("link_{}_to_{}", router, endpoint), link_id, latency);
        self.bind(&format!("{}:data_out", endpoint), &format!("{}:data_in", e2r));
        self.bind(&format!("{}:data_out", e2r), &format!("{}:in_{}", router, port));
        self.bind(&format!("{}:out_{}", router, port), &format!("{}:data_in", r2e));
        self.bind(&format!("{}:data_out", r2e), &format!("{}:data_in", endpoint));
    }

    fn build_mesh(&mut self, num_x: u64, num_y: u64) -> ConfigResult<()> {
        if num_x == 0 || num_y == 0 {
            return Err(ConfigError::Validation(format!("empty {}x{} mesh", num_x, num_y)));
        }
        let router = |x: u64, y: u64| format!("router_{}_{}", x, y);

        for y in 0..num_y {
            for x in 0..num_x {
                self.router(
                    &router(x, y),
                    &format!("top_{}_{}", x, y),
                    5,
                    ComponentConfig::new()
                        .with("topology", "mesh2d")
                        .with("x_dim", num_x)
                        .with("y_dim", num_y)
                        .with("x_pos", x)
                        .with("y_pos", y),
                );
            }
        }

        let latency = self.cfg.link_latency_ns;
        for y in 0..num_y {
            for x in 0..num_x {
                let eid = y * num_x + x;
                let here = router(x, y);
                self.attach_endpoint(eid, &here, LOCAL as u64, eid);

                let mut neighbours = Vec::new();
                if x > 0 {
                    neighbours.push(("west", WEST, router(x - 1, y), EAST));
                }
                if y > 0 {
                    neighbours.push(("south", SOUTH, router(x, y - 1), NORTH));
                }
                if x + 1 < num_x {
                    neighbours.push(("east", EAST, router(x + 1, y), WEST));
                }
                if y + 1 < num_y {
                    neighbours.push(("north", NORTH, router(x, y + 1), SOUTH));
                }
                for (dir, out_port, there, in_port) in neighbours {
                    let link = self.link(&format!("d2dlink_{}_{}_{}", x, y, dir), eid, latency);
                    self.connect(&here, out_port as u64, &link, &there, in_port as u64);
                }
            }
        }
        Ok(())
    }

    fn build_fat_tree(&mut self, radix: u64, level: u32) -> ConfigResult<()> {
        if radix < 2 || radix % 2 != 0 || level == 0 {
            return Err(ConfigError::Validation(format!(
                "invalid fat tree: radix {} level {}",
                radix, level
            )));
        }
        let half = radix / 2;
        let num_top = half.pow(level - 1);
        let num_lower = 2 * half.pow(level - 1);

        let add_level = |net: &mut Self, lvl: u32, count: u64| -> Vec<String> {
            (0..count)
                .map(|idx| {
                    let name = format!("router_lvl{}_idx{}", lvl, idx);
                    net.router(
                        &name,
                        &format!("top_lvl{}_idx{}", lvl, idx),
                        radix,
                        ComponentConfig::new()
                            .with("topology", "fattree")
                            .with("radix", radix)
                            .with("level", level)
                            .with("pos_idx", idx)
                            .with("pos_lvl", lvl),
                    );
                    name
                })
                .collect()
        };

        if level == 1 {
            let tops = add_level(self, 0, num_top);
            for (rid, router) in tops.iter().enumerate() {
                for port in 0..radix {
                    let eid = rid as u64 * radix + port;
                    self.attach_endpoint(eid, router, port, eid);
                }
            }
            return Ok(());
        }

        let edges = add_level(self, 0, num_lower);
        for (rid, router) in edges.iter().enumerate() {
            for port in 0..half {
                let eid = rid as u64 * half + port;
                self.attach_endpoint(eid, router, port, eid);
            }
        }

        let mut lower = edges;
        for lvl in 1..level {
            let is_top = lvl == level - 1;
            let upper = add_level(self, lvl, if is_top { num_top } else { num_lower });
            // routers sharing the same subtree; the top level joins everything
            let (down_len, group_len) = if is_top {
                (lower.len(), upper.len())
            } else {
                let len = half.pow(lvl) as usize;
                (len, len)
            };
            for (group, (downs, ups)) in lower.chunks(down_len).zip(upper.chunks(group_len)).enumerate() {
                for (drid, down) in downs.iter().enumerate() {
                    for dlid in 0..half as usize {
                        let slot = drid * half as usize + dlid;
                        let up = &ups[slot % group_len];
                        let up_port = (slot / group_len) as u64;
                        let down_port = dlid as u64 + half;
                        let up_link = self.link(
                            &format!("link_{}_to_{}", down, up),
                            group as u64,
                            self.cfg.link_latency_ns,
                        );
                        self.connect(down, down_port, &up_link, up, up_port);
                        let down_link = self.link(
                            &format!("link_{}_to_{}", up, down),
                            group as u64,
                            self.cfg.link_latency_ns,
                        );
                        self.connect(up, up_port, &down_link, down, down_port);
                    }
                }
            }
            lower = upper;
        }
        Ok(())
    }
}
