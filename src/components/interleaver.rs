//! Bank interleaver in front of a multi-banked scratchpad.
//!
//! An incoming request is cut at bank boundaries. Each piece becomes an
//! independent sub-request with its own copy of the payload, sent to the
//! bank selected by the address bits just above the bank width. The bank
//! offset squeezes the bank-select bits out of the address so every bank
//! sees a dense address space.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::PortId;

/// Address-interleaving splitter with `nb_banks` master ports `out_<i>`.
#[derive(Debug)]
pub struct Interleaver {
    nb_banks: usize,
    bank_width: u64,
    width_bits: u32,
    bank_mask: u64,
    bank_bits: u32,
    /// Requests received
    pub requests: u64,
    /// Sub-requests sent to banks
    pub bank_accesses: u64,
}

/// One bank-sized piece of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BankSlice {
    /// Target bank
    pub bank: usize,
    /// Offset inside the bank
    pub bank_offset: u64,
    /// Offset of the piece inside the original payload
    pub start: usize,
    /// Size of the piece
    pub len: usize,
}

impl Interleaver {
    /// Creates an interleaver over `nb_banks` banks of `bank_width` bytes.
    ///
    /// Both values must be powers of two.
    pub fn new(nb_banks: usize, bank_width: u64) -> ConfigResult<Self> {
        if nb_banks == 0 || !nb_banks.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                key: "nb_banks".to_string(),
                reason: format!("{} is not a power of two", nb_banks),
            });
        }
        if bank_width == 0 || !bank_width.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                key: "bank_width".to_string(),
                reason: format!("{} is not a power of two", bank_width),
            });
        }
        Ok(Self {
            nb_banks,
            bank_width,
            width_bits: bank_width.trailing_zeros(),
            bank_mask: nb_banks as u64 - 1,
            bank_bits: nb_banks.trailing_zeros(),
            requests: 0,
            bank_accesses: 0,
        })
    }

    /// Builds an interleaver from `nb_banks` and `bank_width`.
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        Self::new(config.get_usize("nb_banks")?, config.get_uint("bank_width")?)
    }

    /// Number of banks.
    pub fn nb_banks(&self) -> usize {
        self.nb_banks
    }

    /// Bytes one bank transfers per access.
    pub fn bank_width(&self) -> u64 {
        self.bank_width
    }

    /// Bytes all banks together transfer per cycle.
    pub fn bandwidth(&self) -> u64 {
        self.bank_width * self.nb_banks as u64
    }

    /// Cuts an access of `size` bytes at `addr` into bank slices.
    pub fn split(&self, addr: u64, size: usize) -> Vec<BankSlice> {
        let mut slices = Vec::new();
        let mut offset = addr;
        let mut start = 0;
        let mut remaining = size as u64;
        while remaining > 0 {
            let in_bank = offset & (self.bank_width - 1);
            let len = (self.bank_width - in_bank).min(remaining);
            let bank = ((offset >> self.width_bits) & self.bank_mask) as usize;
            let bank_offset =
                ((offset >> (self.width_bits + self.bank_bits)) << self.width_bits) + in_bank;
            slices.push(BankSlice {
                bank,
                bank_offset,
                start,
                len: len as usize,
            });
            offset += len;
            start += len as usize;
            remaining -= len;
        }
        slices
    }
}

impl Component for Interleaver {
    fn type_name(&self) -> &'static str {
        "Interleaver"
    }

    fn ports(&self) -> Vec<PortDesc> {
        let mut ports: Vec<PortDesc> = (0..self.nb_banks)
            .map(|i| PortDesc::io_master(format!("out_{}", i)))
            .collect();
        ports.push(PortDesc::io_slave("input"));
        ports
    }

    fn handle_req(
        &mut self,
        ctx: &mut SimContext<'_>,
        _port: PortId,
        mut req: Request,
    ) -> SimResult<IoStatus> {
        self.requests += 1;
        let mut max_latency = 0;

        for slice in self.split(req.addr, req.size()) {
            let range = slice.start..slice.start + slice.len;
            let bank_req = if req.is_write {
                Request::write(slice.bank_offset, req.data()[range.clone()].to_vec())
            } else {
                Request::read(slice.bank_offset, slice.len)
            };

            self.bank_accesses += 1;
            match ctx.req(slice.bank, bank_req)? {
                IoStatus::Completed(done) => {
                    max_latency = max_latency.max(done.latency);
                    if !req.is_write {
                        if done.size() != slice.len {
                            return Err(ctx.fatal(format!(
                                "bank {} returned {} bytes for a {}-byte read",
                                slice.bank,
                                done.size(),
                                slice.len
                            )));
                        }
                        req.data_mut()[range].copy_from_slice(done.data());
                    }
                }
                other => {
                    return Err(ctx.fatal(format!(
                        "bank {} answered {:?}, only synchronous banks are supported",
                        slice.bank,
                        other.kind()
                    )));
                }
            }
        }

        if max_latency > 0 {
            tracing::trace!(
                component = ctx.name(),
                max_latency,
                original = req.latency,
                "delayed block access"
            );
        }
        req.inc_latency(max_latency);
        Ok(IoStatus::Completed(req))
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "nb_banks": self.nb_banks,
            "bank_width": self.bank_width,
            "requests": self.requests,
            "bank_accesses": self.bank_accesses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::memory::Memory;
    use crate::components::mock::ScriptedMaster;
    use crate::engine::SimulationEngine;

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(Interleaver::new(3, 4).is_err());
        assert!(Interleaver::new(4, 6).is_err());
        assert!(Interleaver::new(0, 4).is_err());
        let cfg = ComponentConfig::new().with("nb_banks", 4).with("bank_width", 8);
        assert_eq!(Interleaver::from_config(&cfg).unwrap().bandwidth(), 32);
    }

    #[test]
    fn test_split_across_banks() {
        let il = Interleaver::new(4, 4).unwrap();
        let slices = il.split(2, 12);
        assert_eq!(
            slices,
            vec![
                BankSlice { bank: 0, bank_offset: 2, start: 0, len: 2 },
                BankSlice { bank: 1, bank_offset: 0, start: 2, len: 4 },
                BankSlice { bank: 2, bank_offset: 0, start: 6, len: 4 },
                BankSlice { bank: 3, bank_offset: 0, start: 10, len: 2 },
            ]
        );

        // second row of banks compacts to offset 4 inside each bank
        let wrapped = il.split(16 + 4, 4);
        assert_eq!(wrapped, vec![BankSlice { bank: 1, bank_offset: 4, start: 0, len: 4 }]);
        assert!(il.split(0, 0).is_empty());
    }

    fn banked_engine(latencies: &[u64], script: ScriptedMaster) -> (SimulationEngine, Vec<usize>) {
        let mut engine = SimulationEngine::new();
        engine.add_component("dma", Box::new(script)).unwrap();
        engine
            .add_component(
                "il",
                Box::new(Interleaver::new(latencies.len(), 4).unwrap()),
            )
            .unwrap();
        engine.bind_paths("dma:out", "il:input").unwrap();
        let mut banks = Vec::new();
        for (i, &latency) in latencies.iter().enumerate() {
            let path = format!("bank{}", i);
            banks.push(engine.add_component(&path, Box::new(Memory::new(64, latency))).unwrap());
            engine
                .bind_paths(&format!("il:out_{}", i), &format!("{}:input", path))
                .unwrap();
        }
        (engine, banks)
    }

    #[test]
    fn test_write_read_round_trip_across_all_banks() {
        let payload: Vec<u8> = (0..16).collect();
        let script = ScriptedMaster::new()
            .with_request(1, Request::write(0, payload.clone()))
            .with_request(2, Request::read(0, 16));
        let (mut engine, banks) = banked_engine(&[1, 3, 2, 1], script);
        engine.run().unwrap();

        let dma = engine.component_by_path::<ScriptedMaster>("dma").unwrap();
        assert_eq!(dma.completions.len(), 2);
        assert_eq!(dma.completions[1].request.data(), payload.as_slice());
        // max bank latency, not the sum
        assert_eq!(dma.completions[0].request.latency, 3);
        assert_eq!(dma.completions[1].request.latency, 3);

        // bank 2 holds bytes 8..12 at its offset 0
        let bank2 = engine.component::<Memory>(banks[2]).unwrap();
        assert_eq!(bank2.peek(0, 4), Some(&[8u8, 9, 10, 11][..]));
    }

    /// Bank answering every read with a single byte.
    struct ShortBank;

    impl Component for ShortBank {
        fn type_name(&self) -> &'static str {
            "ShortBank"
        }

        fn ports(&self) -> Vec<PortDesc> {
            vec![PortDesc::io_slave("input")]
        }

        fn handle_req(
            &mut self,
            _ctx: &mut SimContext<'_>,
            _port: PortId,
            req: Request,
        ) -> SimResult<IoStatus> {
            Ok(IoStatus::Completed(Request::read(req.addr, 1)))
        }
    }

    #[test]
    fn test_short_bank_answer_is_fatal() {
        let mut engine = SimulationEngine::new();
        engine
            .add_component("dma", Box::new(ScriptedMaster::new().with_request(1, Request::read(0, 4))))
            .unwrap();
        engine.add_component("il", Box::new(Interleaver::new(1, 4).unwrap())).unwrap();
        engine.add_component("bank", Box::new(ShortBank)).unwrap();
        engine.bind_paths("dma:out", "il:input").unwrap();
        engine.bind_paths("il:out_0", "bank:input").unwrap();

        let err = engine.run().unwrap_err();
        assert_eq!(err.component(), Some("il"));
        assert!(err.to_string().contains("returned 1 bytes for a 4-byte read"));
    }
}
