//! Barrier counters shared by the clusters of a chip.
//!
//! Each cluster owns one [`SyncMem`]; together they form the sync area, a
//! window of `sync_size` bytes per cluster. Firmware never touches a
//! counter directly, it sends requests to the owning `SyncMem`:
//!
//! * below `special_mem_base` a read is a fetch-and-increment and a write
//!   clears the counter;
//! * from `special_mem_base` on, a write of 0 clears, any other write
//!   increments, and a read returns the value unchanged.
//!
//! [`BarrierMap`] turns a barrier of the cluster grid into the cluster and
//! offsets holding its counters.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::PortId;

const WORD: u64 = 4;

/// Word-addressed barrier counters of one cluster.
#[derive(Debug)]
pub struct SyncMem {
    words: Vec<u32>,
    special_mem_base: u64,
    /// Fetch-and-increment reads served
    pub fetch_adds: u64,
    /// Counters cleared
    pub clears: u64,
}

impl SyncMem {
    pub fn new(size: u64, special_mem_base: u64) -> ConfigResult<Self> {
        if size == 0 || size % WORD != 0 {
            return Err(ConfigError::invalid("size", format!("{} is not a non-zero multiple of 4", size)));
        }
        if special_mem_base > size {
            return Err(ConfigError::invalid(
                "special_mem_base",
                format!("0x{:x} beyond a {}-byte sync memory", special_mem_base, size),
            ));
        }
        Ok(Self {
            words: vec![0; (size / WORD) as usize],
            special_mem_base,
            fetch_adds: 0,
            clears: 0,
        })
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let size = config.get_uint("size")?;
        Self::new(size, config.get_uint_or("special_mem_base", size)?)
    }

    /// Current value of the counter at `offset`.
    pub fn counter(&self, offset: u64) -> Option<u32> {
        self.words.get((offset / WORD) as usize).copied()
    }

    fn access(&mut self, offset: u64, is_write: bool, value: u32) -> u32 {
        let index = (offset / WORD) as usize;
        let word = &mut self.words[index];
        let old = *word;
        if offset >= self.special_mem_base {
            if is_write {
                if value == 0 {
                    *word = 0;
                    self.clears += 1;
                } else {
                    *word = word.wrapping_add(1);
                }
            }
        } else if is_write {
            *word = 0;
            self.clears += 1;
        } else {
            *word = word.wrapping_add(1);
            self.fetch_adds += 1;
        }
        old
    }
}

impl Component for SyncMem {
    fn type_name(&self) -> &'static str {
        "SyncMem"
    }

    fn ports(&self) -> Vec<PortDesc> {
        vec![PortDesc::io_slave("input")]
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        _port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        let offset = req.addr;
        let in_range = (offset / WORD) < self.words.len() as u64;
        if req.size() != WORD as usize || offset % WORD != 0 || !in_range {
            return Err(ctx.fatal(format!(
                "invalid barrier access (offset: 0x{:x}, size: 0x{:x})",
                offset,
                req.size()
            )));
        }
        let value = req.value_u32().unwrap_or(0);
        let old = self.access(offset, req.is_write, value);
        tracing::trace!(
            component = ctx.name(),
            offset,
            is_write = req.is_write,
            old,
            "barrier access"
        );
        if !req.is_write {
            req.set_value_u32(old);
        }
        Ok(IoStatus::Completed(req))
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "size": self.words.len() as u64 * WORD,
            "fetch_adds": self.fetch_adds,
            "clears": self.clears,
        })
    }
}

/// A barrier of the cluster grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Barrier {
    /// Every cluster of the chip
    Global,
    /// The clusters of row `y`, gathered at the middle column
    Row { y: u64 },
    /// The row leaders, gathered at the middle cluster
    Column,
    /// A row group led by column `leader_x` on row `y`
    GroupRow { leader_x: u64, y: u64 },
    /// A column group led by cluster (`leader_x`, `leader_y`)
    GroupColumn { leader_x: u64, leader_y: u64 },
}

/// Location of a barrier counter and its iteration counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierSlot {
    /// Cluster whose sync memory holds the counters
    pub cluster: u64,
    /// Offset of the arrival counter inside that sync memory
    pub counter: u64,
    /// Offset of the iteration counter used by polling barriers
    pub iteration: u64,
}

impl BarrierSlot {
    /// Address of the arrival counter in a sync area starting at `base`.
    pub fn counter_address(&self, base: u64, sync_size: u64) -> u64 {
        base + self.cluster * sync_size + self.counter
    }
}

/// Maps barriers of a `num_x` by `num_y` cluster grid onto sync memories.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierMap {
    num_x: u64,
    num_y: u64,
    sync_size: u64,
}

impl BarrierMap {
    pub fn new(num_x: u64, num_y: u64, sync_size: u64) -> ConfigResult<Self> {
        if num_x == 0 || num_y == 0 {
            return Err(ConfigError::Validation(format!(
                "empty cluster grid {}x{}",
                num_x, num_y
            )));
        }
        if sync_size < 40 {
            return Err(ConfigError::invalid(
                "sync_size",
                format!("{} bytes cannot hold every barrier counter", sync_size),
            ));
        }
        Ok(Self { num_x, num_y, sync_size })
    }

    pub fn cluster_index(&self, x: u64, y: u64) -> u64 {
        y * self.num_x + x
    }

    fn check(&self, x: u64, y: u64) -> ConfigResult<()> {
        if x >= self.num_x || y >= self.num_y {
            return Err(ConfigError::Validation(format!(
                "cluster ({}, {}) outside a {}x{} grid",
                x, y, self.num_x, self.num_y
            )));
        }
        Ok(())
    }

    /// Cluster and offsets holding the counters of `barrier`.
    pub fn slot(&self, barrier: Barrier) -> ConfigResult<BarrierSlot> {
        let x_mid = self.num_x / 2;
        let y_mid = self.num_y / 2;
        let (x, y, counter) = match barrier {
            Barrier::Global => (0, 0, 0),
            Barrier::Row { y } => (x_mid, y, 8),
            Barrier::Column => (x_mid, y_mid, 16),
            Barrier::GroupRow { leader_x, y } => (leader_x, y, 24),
            Barrier::GroupColumn { leader_x, leader_y } => (leader_x, leader_y, 32),
        };
        self.check(x, y)?;
        Ok(BarrierSlot {
            cluster: self.cluster_index(x, y),
            counter,
            iteration: counter + 4,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::mock::ScriptedMaster;
    use crate::engine::SimulationEngine;

    #[test]
    fn test_barrier_map() {
        let map = BarrierMap::new(4, 4, 64).unwrap();
        assert_eq!(
            map.slot(Barrier::Global).unwrap(),
            BarrierSlot { cluster: 0, counter: 0, iteration: 4 }
        );
        assert_eq!(
            map.slot(Barrier::Row { y: 3 }).unwrap(),
            BarrierSlot { cluster: 14, counter: 8, iteration: 12 }
        );
        let column = map.slot(Barrier::Column).unwrap();
        assert_eq!(column, BarrierSlot { cluster: 10, counter: 16, iteration: 20 });
        assert_eq!(column.counter_address(0x1000, 64), 0x1000 + 10 * 64 + 16);
        assert_eq!(
            map.slot(Barrier::GroupColumn { leader_x: 1, leader_y: 2 }).unwrap().counter,
            32
        );
        assert!(map.slot(Barrier::Row { y: 4 }).is_err());
        assert!(BarrierMap::new(4, 4, 16).is_err());
    }

    #[test]
    fn test_fetch_add_and_special_region() {
        let script = ScriptedMaster::new()
            .with_request(1, Request::read_u32(8))
            .with_request(2, Request::read_u32(8))
            .with_request(3, Request::read_u32(8))
            .with_request(4, Request::write_u32(8, 5))
            .with_request(5, Request::read_u32(8))
            .with_request(6, Request::write_u32(32, 9))
            .with_request(7, Request::write_u32(32, 9))
            .with_request(8, Request::read_u32(32))
            .with_request(9, Request::write_u32(32, 0))
            .with_request(10, Request::read_u32(32));
        let mut engine = SimulationEngine::new();
        engine.add_component("core", Box::new(script)).unwrap();
        engine
            .add_component("sync", Box::new(SyncMem::new(64, 32).unwrap()))
            .unwrap();
        engine.bind_paths("core:out", "sync:input").unwrap();
        engine.run().unwrap();

        let core = engine.component_by_path::<ScriptedMaster>("core").unwrap();
        let reads: Vec<Option<u32>> = core
            .completions
            .iter()
            .filter(|c| !c.request.is_write)
            .map(|c| c.request.value_u32())
            .collect();
        assert_eq!(reads, vec![Some(0), Some(1), Some(2), Some(0), Some(2), Some(0)]);

        let sync = engine.component_by_path::<SyncMem>("sync").unwrap();
        assert_eq!(sync.counter(8), Some(1));
        assert_eq!(sync.fetch_adds, 4);
    }

    #[test]
    fn test_misaligned_access_is_fatal() {
        let mut engine = SimulationEngine::new();
        engine
            .add_component("core", Box::new(ScriptedMaster::new().with_request(1, Request::read_u32(2))))
            .unwrap();
        engine
            .add_component("sync", Box::new(SyncMem::new(64, 32).unwrap()))
            .unwrap();
        engine.bind_paths("core:out", "sync:input").unwrap();
        assert!(engine.run().unwrap_err().is_fatal_diagnostic());
        assert!(SyncMem::new(64, 128).is_err());
    }
}
