//! Start and completion control of a multi-chip platform.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::types::{PortId, SimTime};

/// Starts every chip when reset is released and ends the run once every
/// chip has reached the final barrier.
///
/// Ports are `barrier_ack_<i>` (wire slave) for `i` in `0..num_chip`,
/// followed by `start_<i>` (wire master).
#[derive(Debug)]
pub struct PlatformCtrl {
    num_chip: usize,
    finished: Vec<bool>,
    /// Time the last chip reached the barrier
    pub execution_period: Option<SimTime>,
}

impl PlatformCtrl {
    pub fn new(num_chip: usize) -> ConfigResult<Self> {
        if num_chip == 0 {
            return Err(ConfigError::invalid("num_chip", "a platform needs at least one chip"));
        }
        Ok(Self {
            num_chip,
            finished: vec![false; num_chip],
            execution_period: None,
        })
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Self::new(config.get_usize("num_chip")?)
    }

    /// Chips that reached the barrier so far.
    pub fn finished_chips(&self) -> usize {
        self.finished.iter().filter(|done| **done).count()
    }

    fn start_port(&self, chip: usize) -> PortId {
        self.num_chip + chip
    }
}

impl Component for PlatformCtrl {
    fn type_name(&self) -> &'static str {
        "PlatformCtrl"
    }

    fn ports(&self) -> Vec<PortDesc> {
        let mut ports: Vec<PortDesc> = (0..self.num_chip)
            .map(|i| PortDesc::wire_slave(format!("barrier_ack_{}", i)))
            .collect();
        ports.extend((0..self.num_chip).map(|i| PortDesc::wire_master(format!("start_{}", i))));
        ports
    }

    fn reset(&mut self, ctx: &mut SimContext<'_>, active: bool) -> SimResult<()> {
        if active {
            self.finished.iter_mut().for_each(|done| *done = false);
            self.execution_period = None;
            return Ok(());
        }
        tracing::info!(component = ctx.name(), chips = self.num_chip, "starting platform");
        for chip in 0..self.num_chip {
            let port = self.start_port(chip);
            if ctx.is_bound(port) {
                ctx.wire(port, 1)?;
            }
        }
        Ok(())
    }

    fn handle_wire(&mut self, ctx: &mut SimContext<'_>, port: PortId, _value: u64) -> SimResult<()> {
        let chip = port;
        if self.finished[chip] {
            return Err(ctx.fatal(format!("repeated ack on chip {}", chip)));
        }
        self.finished[chip] = true;
        tracing::debug!(component = ctx.name(), chip, "chip reached the barrier");

        if self.finished.iter().all(|done| *done) {
            let now = ctx.now();
            self.execution_period = Some(now);
            tracing::info!(
                component = ctx.name(),
                period_ns = now / 1000,
                "execution period"
            );
            ctx.quit(0);
        }
        Ok(())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "num_chip": self.num_chip,
            "finished": self.finished_chips(),
            "execution_period": self.execution_period,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SimulationEngine;

    #[test]
    fn test_quits_once_every_chip_acked() {
        let mut engine = SimulationEngine::new();
        let ctrl = engine
            .add_component("ctrl", Box::new(PlatformCtrl::new(2).unwrap()))
            .unwrap();
        engine.start().unwrap();
        engine.drive_wire(ctrl, "barrier_ack_1", 1).unwrap();
        assert!(!engine.is_quit());
        engine.drive_wire(ctrl, "barrier_ack_0", 1).unwrap();
        assert_eq!(engine.exit_code(), Some(0));
        let ctrl = engine.component::<PlatformCtrl>(ctrl).unwrap();
        assert_eq!(ctrl.finished_chips(), 2);
    }

    #[test]
    fn test_repeated_ack_is_fatal() {
        let mut engine = SimulationEngine::new();
        let ctrl = engine
            .add_component("ctrl", Box::new(PlatformCtrl::new(2).unwrap()))
            .unwrap();
        engine.start().unwrap();
        engine.drive_wire(ctrl, "barrier_ack_0", 1).unwrap();
        let err = engine.drive_wire(ctrl, "barrier_ack_0", 1).unwrap_err();
        assert!(err.is_fatal_diagnostic());
        assert!(PlatformCtrl::new(0).is_err());
    }
}
