//! End-of-computation and host-service registers.
//!
//! Firmware reaches this block with 4-byte writes:
//!
//! | offset | effect                                              |
//! |--------|-----------------------------------------------------|
//! | 0      | end of computation, quits with exit code 0          |
//! | 4      | reserved, ignored                                   |
//! | 8      | starts the performance timer                        |
//! | 12     | reports the timer period in ns and restarts it      |
//! | 16     | prints the low byte as a character                  |
//! | 20     | prints the value                                    |
//! | 40     | stops the run with exit code 1 after `value` cycles |
//!
//! The block also relays the end of the HBM preload to every cluster.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::{Cycles, EventId, PortId, SimTime};

const PORT_INPUT: PortId = 0;
const PORT_PRELOAD_DONE: PortId = 1;
const FIRST_CLUSTER_PORT: PortId = 2;

const REG_EOC: u64 = 0;
const REG_RESERVED: u64 = 4;
const REG_TIMER_START: u64 = 8;
const REG_TIMER_END: u64 = 12;
const REG_PRINT_CHAR: u64 = 16;
const REG_PRINT_VALUE: u64 = 20;
const REG_DEBUG_STOP: u64 = 40;

/// Polling interval of the preload flag.
const PRELOAD_POLL: Cycles = 300;

#[derive(Debug)]
pub struct CtrlRegisters {
    num_cluster: usize,
    preload_done: bool,
    preload_relayed: bool,
    timer_start: SimTime,
    line: String,
    /// Everything printed through the character and value registers
    pub console: String,
    /// Periods reported through the timer, in ns
    pub perf_reports: Vec<u64>,
    /// Value written to the EOC register
    pub eoc_value: Option<u32>,
}

impl CtrlRegisters {
    pub const DEBUG_STOP: EventId = 0;
    pub const PRELOAD_RELAY: EventId = 1;

    pub fn new(num_cluster: usize, has_preload_binary: bool) -> Self {
        Self {
            num_cluster,
            preload_done: !has_preload_binary,
            preload_relayed: false,
            timer_start: 0,
            line: String::new(),
            console: String::new(),
            perf_reports: Vec::new(),
            eoc_value: None,
        }
    }

    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let num_x = config.get_usize_or("num_cluster_x", 1)?;
        let num_y = config.get_usize_or("num_cluster_y", 1)?;
        Ok(Self::new(
            num_x * num_y,
            config.get_bool_or("has_preload_binary", false)?,
        ))
    }

    fn print(&mut self, ctx: &SimContext<'_>, text: &str) {
        self.console.push_str(text);
        for c in text.chars() {
            if c == '\n' {
                tracing::info!(component = ctx.name(), "{}", self.line);
                self.line.clear();
            } else {
                self.line.push(c);
            }
        }
    }

    fn write(&mut self, ctx: &mut SimContext<'_>, offset: u64, value: u32) -> SimResult<()> {
        match offset {
            REG_EOC => {
                tracing::info!(component = ctx.name(), value, "end of computation");
                self.eoc_value = Some(value);
                ctx.quit(0);
            }
            REG_RESERVED => {}
            REG_TIMER_START => self.timer_start = ctx.now(),
            REG_TIMER_END => {
                let period_ns = (ctx.now() - self.timer_start) / 1000;
                tracing::info!(component = ctx.name(), period_ns, "execution period");
                self.perf_reports.push(period_ns);
                self.timer_start = ctx.now();
            }
            REG_PRINT_CHAR => {
                let c = char::from(value as u8);
                self.print(ctx, c.encode_utf8(&mut [0; 4]));
            }
            REG_PRINT_VALUE => self.print(ctx, &value.to_string()),
            REG_DEBUG_STOP => {
                tracing::debug!(component = ctx.name(), cycles = value, "debug stop armed");
                ctx.enqueue(Self::DEBUG_STOP, Cycles::from(value));
            }
            other => {
                tracing::warn!(component = ctx.name(), offset = other, "write to unmapped register");
            }
        }
        Ok(())
    }

    fn relay_preload(&mut self, ctx: &mut SimContext<'_>) -> SimResult<()> {
        if !self.preload_done {
            ctx.enqueue(Self::PRELOAD_RELAY, PRELOAD_POLL);
            return Ok(());
        }
        tracing::debug!(component = ctx.name(), "HBM preload done, waking all clusters");
        self.preload_relayed = true;
        for cluster in 0..self.num_cluster {
            let port = FIRST_CLUSTER_PORT + cluster;
            if ctx.is_bound(port) {
                ctx.wire(port, 1)?;
            }
        }
        Ok(())
    }
}

impl Component for CtrlRegisters {
    fn type_name(&self) -> &'static str {
        "CtrlRegisters"
    }

    fn ports(&self) -> Vec<PortDesc> {
        let mut ports = vec![
            PortDesc::io_slave("input"),
            PortDesc::wire_slave("hbm_preload_done"),
        ];
        ports.extend(
            (0..self.num_cluster)
                .map(|i| PortDesc::wire_master(format!("hbm_preload_done_to_cluster_{}", i))),
        );
        ports
    }

    fn reset(&mut self, ctx: &mut SimContext<'_>, active: bool) -> SimResult<()> {
        if !active {
            tracing::debug!(component = ctx.name(), clusters = self.num_cluster, "reset done");
            self.preload_relayed = false;
            ctx.enqueue(Self::PRELOAD_RELAY, PRELOAD_POLL);
        }
        Ok(())
    }

    fn handle_event(&mut self, ctx: &mut SimContext<'_>, event: EventId) -> SimResult<()> {
        match event {
            Self::DEBUG_STOP => {
                tracing::info!(component = ctx.name(), cycle = ctx.cycles(), "debug stop");
                ctx.quit(1);
                Ok(())
            }
            Self::PRELOAD_RELAY => self.relay_preload(ctx),
            other => Err(ctx.fatal(format!("unknown event {}", other))),
        }
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        if port != PORT_INPUT {
            return Err(ctx.fatal(format!("request on port {}, which is not input", port)));
        }
        if !req.is_write {
            req.data_mut().fill(0);
            return Ok(IoStatus::Completed(req));
        }
        if req.size() != 4 {
            return Err(ctx.fatal(format!(
                "{}-byte write at 0x{:x}, registers take 4-byte writes",
                req.size(),
                req.addr
            )));
        }
        let value = req.value_u32().unwrap_or(0);
        self.write(ctx, req.addr, value)?;
        Ok(IoStatus::Completed(req))
    }

    fn handle_wire(&mut self, ctx: &mut SimContext<'_>, port: PortId, _value: u64) -> SimResult<()> {
        if port != PORT_PRELOAD_DONE {
            return Err(ctx.fatal(format!("wire on port {}, which is not hbm_preload_done", port)));
        }
        tracing::debug!(component = ctx.name(), "HBM preloading done");
        self.preload_done = true;
        Ok(())
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "eoc_value": self.eoc_value,
            "perf_reports": self.perf_reports,
            "console_bytes": self.console.len(),
            "preload_relayed": self.preload_relayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::mock::ScriptedMaster;
    use crate::engine::SimulationEngine;

    fn run_script(script: ScriptedMaster) -> SimulationEngine {
        let mut engine = SimulationEngine::new();
        engine.add_component("core", Box::new(script)).unwrap();
        engine
            .add_component("regs", Box::new(CtrlRegisters::new(1, false)))
            .unwrap();
        engine.bind_paths("core:out", "regs:input").unwrap();
        engine
    }

    #[test]
    fn test_print_timer_and_eoc() {
        let script = ScriptedMaster::new()
            .with_request(1, Request::write_u32(REG_TIMER_START, 1))
            .with_request(2, Request::write_u32(REG_PRINT_CHAR, u32::from(b'o')))
            .with_request(3, Request::write_u32(REG_PRINT_CHAR, u32::from(b'k')))
            .with_request(4, Request::write_u32(REG_PRINT_VALUE, 42))
            .with_request(5, Request::write_u32(REG_PRINT_CHAR, u32::from(b'\n')))
            .with_request(11, Request::write_u32(REG_TIMER_END, 1))
            .with_request(12, Request::write_u32(REG_EOC, 7));
        let mut engine = run_script(script);
        assert_eq!(engine.join().unwrap(), Some(0));

        let regs = engine.component_by_path::<CtrlRegisters>("regs").unwrap();
        assert_eq!(regs.console, "ok42\n");
        assert_eq!(regs.perf_reports, vec![10]);
        assert_eq!(regs.eoc_value, Some(7));
    }

    #[test]
    fn test_debug_stop_quits_with_one() {
        let script = ScriptedMaster::new().with_request(1, Request::write_u32(REG_DEBUG_STOP, 50));
        let mut engine = run_script(script);
        assert_eq!(engine.join().unwrap(), Some(1));
        assert_eq!(engine.now(), 51 * 1000);
    }

    #[test]
    fn test_wide_write_is_fatal() {
        let script = ScriptedMaster::new().with_request(1, Request::write(REG_EOC, vec![0; 8]));
        let mut engine = run_script(script);
        assert!(engine.run().unwrap_err().is_fatal_diagnostic());
    }

    #[test]
    fn test_access_on_unexpected_port_is_fatal() {
        let mut engine = SimulationEngine::new();
        let id = engine
            .add_component("regs", Box::new(CtrlRegisters::new(1, false)))
            .unwrap();
        let mut regs = CtrlRegisters::new(1, false);
        let mut ctx = SimContext::new(&mut engine, id);
        assert!(regs
            .handle_req(&mut ctx, PORT_PRELOAD_DONE, Request::write_u32(REG_EOC, 0))
            .unwrap_err()
            .is_fatal_diagnostic());
        assert!(regs.handle_wire(&mut ctx, PORT_INPUT, 1).is_err());
        assert!(!regs.preload_done);
        assert_eq!(regs.eoc_value, None);
    }
}
