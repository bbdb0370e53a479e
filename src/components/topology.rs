//! Routing decisions for chip-to-chip networks.
//!
//! A [`TopologyManager`] sits next to each router on its `top_req` port.
//! The router sends it a copy of a flit with [`FlitArg::PortId`] holding the
//! input port; the manager answers synchronously with the output port in the
//! same slot. Each manager only knows the position of its own router.

use std::fmt;

use crate::component::{Component, PortDesc};
use crate::components::flit::{self, FlitArg};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::PortId;

/// A routing function for one router.
pub trait Topology: Send + fmt::Debug {
    /// Short name used in logs and stats.
    fn name(&self) -> &'static str;

    /// Output port for a flit to `dest` that arrived on `in_port`.
    fn route(&self, in_port: usize, dest: u64) -> Result<usize, String>;
}

/// Mesh router port facing the local chip.
pub const LOCAL: usize = 0;
/// Mesh router port towards smaller x.
pub const WEST: usize = 1;
/// Mesh router port towards larger y.
pub const NORTH: usize = 2;
/// Mesh router port towards larger x.
pub const EAST: usize = 3;
/// Mesh router port towards smaller y.
pub const SOUTH: usize = 4;

/// Routing algorithm of a 2D mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshAlgorithm {
    /// Dimension ordered: first along x, then along y
    Xy,
}

impl MeshAlgorithm {
    pub fn from_code(code: i64) -> ConfigResult<Self> {
        match code {
            0 => Ok(MeshAlgorithm::Xy),
            other => Err(ConfigError::InvalidValue {
                key: "ralgo".to_string(),
                reason: format!("unknown mesh routing algorithm {}", other),
            }),
        }
    }
}

/// Position of one router in an `x_dim` by `y_dim` mesh.
///
/// Chip `id` lives at `(id % x_dim, id / x_dim)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mesh2D {
    pub x_dim: u64,
    pub y_dim: u64,
    pub x_pos: u64,
    pub y_pos: u64,
    pub algorithm: MeshAlgorithm,
}

impl Mesh2D {
    pub fn new(x_dim: u64, y_dim: u64, x_pos: u64, y_pos: u64) -> ConfigResult<Self> {
        if x_dim == 0 || y_dim == 0 || x_pos >= x_dim || y_pos >= y_dim {
            return Err(ConfigError::Validation(format!(
                "router ({}, {}) lies outside a {}x{} mesh",
                x_pos, y_pos, x_dim, y_dim
            )));
        }
        Ok(Self {
            x_dim,
            y_dim,
            x_pos,
            y_pos,
            algorithm: MeshAlgorithm::Xy,
        })
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let mut mesh = Self::new(
            config.get_uint("x_dim")?,
            config.get_uint("y_dim")?,
            config.get_uint("x_pos")?,
            config.get_uint("y_pos")?,
        )?;
        mesh.algorithm = MeshAlgorithm::from_code(config.get_int_or("ralgo", 0)?)?;
        Ok(mesh)
    }
}

impl Topology for Mesh2D {
    fn name(&self) -> &'static str {
        "mesh2d"
    }

    fn route(&self, _in_port: usize, dest: u64) -> Result<usize, String> {
        if dest >= self.x_dim * self.y_dim {
            return Err(format!(
                "destination {} outside a {}x{} mesh",
                dest, self.x_dim, self.y_dim
            ));
        }
        let dest_x = dest % self.x_dim;
        let dest_y = dest / self.x_dim;
        let port = match self.algorithm {
            MeshAlgorithm::Xy => {
                if dest_x == self.x_pos && dest_y == self.y_pos {
                    LOCAL
                } else if dest_x == self.x_pos {
                    if dest_y > self.y_pos {
                        NORTH
                    } else {
                        SOUTH
                    }
                } else if dest_x > self.x_pos {
                    EAST
                } else {
                    WEST
                }
            }
        };
        Ok(port)
    }
}

/// Position of one router in a fat tree with `level` router levels.
///
/// Ports `0..radix/2` go down, ports `radix/2..radix` go up. Top-level
/// routers (`pos_lvl == level - 1`) use all their ports to go down. Level 0
/// routers attach `radix/2` chips each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FatTree {
    pub radix: u64,
    pub level: u32,
    pub pos_idx: u64,
    pub pos_lvl: u32,
    half_radix: u64,
}

impl FatTree {
    pub fn new(radix: u64, level: u32, pos_idx: u64, pos_lvl: u32) -> ConfigResult<Self> {
        if radix < 2 || radix % 2 != 0 {
            return Err(ConfigError::InvalidValue {
                key: "radix".to_string(),
                reason: format!("fat tree radix {} must be even and at least 2", radix),
            });
        }
        if level == 0 || pos_lvl >= level {
            return Err(ConfigError::Validation(format!(
                "router level {} does not fit a tree of {} levels",
                pos_lvl, level
            )));
        }
        Ok(Self {
            radix,
            level,
            pos_idx,
            pos_lvl,
            half_radix: radix / 2,
        })
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Self::new(
            config.get_uint("radix")?,
            config.get_uint("level")? as u32,
            config.get_uint_or("pos_idx", 0)?,
            config.get_uint_or("pos_lvl", 0)? as u32,
        )
    }

    pub fn half_radix(&self) -> u64 {
        self.half_radix
    }

    /// Chips attached to the tree.
    pub fn num_chips(&self) -> u64 {
        2 * self.half_radix.pow(self.level)
    }

    /// Routers on level `lvl`.
    pub fn routers_on_level(&self, lvl: u32) -> u64 {
        if lvl + 1 == self.level {
            self.half_radix.pow(self.level - 1)
        } else {
            2 * self.half_radix.pow(self.level - 1)
        }
    }
}

impl Topology for FatTree {
    fn name(&self) -> &'static str {
        "fattree"
    }

    fn route(&self, in_port: usize, dest: u64) -> Result<usize, String> {
        if dest >= self.num_chips() {
            return Err(format!(
                "destination {} outside a fat tree of {} chips",
                dest,
                self.num_chips()
            ));
        }
        let half = self.half_radix;
        // level-0 router the destination hangs off
        let dest_router = dest / half;

        if self.pos_lvl + 1 == self.level {
            let port = if self.level == 1 {
                dest
            } else {
                dest_router / half.pow(self.pos_lvl - 1)
            };
            return Ok(port as usize);
        }

        let group = self.pos_idx / half.pow(self.pos_lvl);
        let dest_group = dest_router / half.pow(self.pos_lvl);
        let port = if group != dest_group {
            in_port as u64 % half + half
        } else if self.pos_lvl == 0 {
            dest % half
        } else {
            (dest_router / half.pow(self.pos_lvl - 1)) % half
        };
        Ok(port as usize)
    }
}

/// Answers routing probes with the output port of a [`Topology`].
#[derive(Debug)]
pub struct TopologyManager {
    topology: Box<dyn Topology>,
    /// Probes answered
    pub probes: u64,
}

impl TopologyManager {
    pub fn new(topology: Box<dyn Topology>) -> Self {
        Self { topology, probes: 0 }
    }

    /// Builds a manager from `topology` (`mesh2d` or `fattree`) and the
    /// keys of the chosen topology.
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let topology: Box<dyn Topology> = match config.get_str("topology")? {
            "mesh2d" => Box::new(Mesh2D::from_config(config)?),
            "fattree" => Box::new(FatTree::from_config(config)?),
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "topology".to_string(),
                    reason: format!("unknown topology '{}'", other),
                })
            }
        };
        Ok(Self::new(topology))
    }

    pub fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }
}

impl Component for TopologyManager {
    fn type_name(&self) -> &'static str {
        "TopologyManager"
    }

    fn ports(&self) -> Vec<PortDesc> {
        vec![PortDesc::io_slave("in")]
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        _port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        let in_port = flit::get(&req, FlitArg::PortId);
        let dest = flit::get(&req, FlitArg::DestId);
        if in_port < 0 || dest < 0 {
            return Err(ctx.fatal(format!(
                "malformed routing probe: port {} destination {}",
                in_port, dest
            )));
        }
        let out = self
            .topology
            .route(in_port as usize, dest as u64)
            .map_err(|msg| ctx.fatal(msg))?;
        self.probes += 1;
        tracing::trace!(
            component = ctx.name(),
            topology = self.topology.name(),
            in_port,
            dest,
            out,
            "routed"
        );
        flit::set(&mut req, FlitArg::PortId, out as i64);
        Ok(IoStatus::Completed(req))
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "topology": self.topology.name(),
            "probes": self.probes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_xy_routing() {
        // router (1, 1) of a 3x3 mesh
        let mesh = Mesh2D::new(3, 3, 1, 1).unwrap();
        assert_eq!(mesh.route(0, 4), Ok(LOCAL));
        assert_eq!(mesh.route(0, 7), Ok(NORTH));
        assert_eq!(mesh.route(0, 1), Ok(SOUTH));
        // x first, even when y differs too
        assert_eq!(mesh.route(0, 8), Ok(EAST));
        assert_eq!(mesh.route(0, 0), Ok(WEST));
        assert!(mesh.route(0, 9).is_err());
        assert!(Mesh2D::new(2, 2, 2, 0).is_err());
    }

    #[test]
    fn test_mesh_unknown_algorithm() {
        let cfg = ComponentConfig::new()
            .with("topology", "mesh2d")
            .with("x_dim", 2)
            .with("y_dim", 2)
            .with("x_pos", 0)
            .with("y_pos", 0)
            .with("ralgo", 3);
        assert!(TopologyManager::from_config(&cfg).is_err());
        let cfg = cfg.with("ralgo", 0);
        assert_eq!(TopologyManager::from_config(&cfg).unwrap().topology().name(), "mesh2d");
        let cfg = cfg.with("topology", "torus");
        assert!(TopologyManager::from_config(&cfg).is_err());
    }

    #[test]
    fn test_fat_tree_single_level() {
        // one router of radix 4 connects 4 chips directly
        let top = FatTree::new(4, 1, 0, 0).unwrap();
        assert_eq!(top.num_chips(), 4);
        assert_eq!(top.routers_on_level(0), 1);
        for dest in 0..4 {
            assert_eq!(top.route(0, dest), Ok(dest as usize));
        }
        assert!(top.route(0, 4).is_err());
    }

    #[test]
    fn test_fat_tree_two_levels() {
        // radix 4, two levels: four leaves with 2 chips each, two spines
        let leaf0 = FatTree::new(4, 2, 0, 0).unwrap();
        assert_eq!(leaf0.num_chips(), 8);
        assert_eq!(leaf0.routers_on_level(0), 4);
        assert_eq!(leaf0.routers_on_level(1), 2);
        assert_eq!(leaf0.route(2, 1), Ok(1));
        assert_eq!(leaf0.route(0, 0), Ok(0));
        // chip 5 hangs off leaf 2, go up on the port paired with the input
        assert_eq!(leaf0.route(0, 5), Ok(2));
        assert_eq!(leaf0.route(1, 5), Ok(3));

        let spine = FatTree::new(4, 2, 0, 1).unwrap();
        assert_eq!(spine.route(0, 1), Ok(0));
        assert_eq!(spine.route(0, 2), Ok(1));
        assert_eq!(spine.route(0, 5), Ok(2));
        assert!(spine.route(0, 8).is_err());
    }

    #[test]
    fn test_fat_tree_three_levels_middle() {
        // radix 4, three levels: middle router 1 covers leaves 0 and 1
        let mid = FatTree::new(4, 3, 1, 1).unwrap();
        assert_eq!(mid.num_chips(), 16);
        assert_eq!(mid.route(0, 1), Ok(0));
        assert_eq!(mid.route(0, 3), Ok(1));
        assert_eq!(mid.route(1, 4), Ok(3));

        let top = FatTree::new(4, 3, 0, 2).unwrap();
        assert_eq!(top.route(0, 15), Ok(3));
        assert!(FatTree::new(3, 2, 0, 0).is_err());
        assert!(FatTree::new(4, 2, 0, 2).is_err());
        assert!(FatTree::new(4, 0, 0, 0).is_err());
    }
}
