//! Byte-addressable memory with a fixed access latency.

use crate::component::{Component, PortDesc};
use crate::config::{ComponentConfig, ConfigError, ConfigResult};
use crate::context::SimContext;
use crate::error::SimResult;
use crate::request::{IoStatus, Request};
use crate::types::{Cycles, PortId};

/// A memory bank answering every access synchronously.
///
/// Reads copy the stored bytes into the request payload, writes copy the
/// payload into the storage. Both complete immediately with `latency`
/// cycles added to the request. Accesses outside `[0, size)` are fatal.
#[derive(Debug)]
pub struct Memory {
    /// Backing storage
    data: Vec<u8>,
    /// Cycles added to every access
    pub latency: Cycles,
    /// Number of reads served
    pub reads: u64,
    /// Number of writes served
    pub writes: u64,
    /// Bytes transferred in either direction
    pub bytes: u64,
}

impl Memory {
    /// Creates a zero-filled memory of `size` bytes.
    pub fn new(size: usize, latency: Cycles) -> Self {
        Self {
            data: vec![0; size],
            latency,
            reads: 0,
            writes: 0,
            bytes: 0,
        }
    }

    /// Builds a memory from its configuration (`size`, optional `latency`).
    pub fn from_config(config: &ComponentConfig) -> ConfigResult<Self> {
        let size = config.get_usize("size")?;
        if size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "size".to_string(),
                reason: "memory size must be non-zero".to_string(),
            });
        }
        Ok(Self::new(size, config.get_uint_or("latency", 0)?))
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Copies `bytes` into the memory at `offset` from the host side.
    ///
    /// Returns false if the range does not fit.
    pub fn load(&mut self, offset: usize, bytes: &[u8]) -> bool {
        match self.data.get_mut(offset..offset + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Reads `len` bytes at `offset` from the host side.
    pub fn peek(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset + len)
    }
}

impl Component for Memory {
    fn type_name(&self) -> &'static str {
        "Memory"
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
        let size = req.size();
        let start = usize::try_from(req.addr).unwrap_or(usize::MAX);
        let Some(range) = start
            .checked_add(size)
            .filter(|&end| end <= self.data.len())
            .map(|end| start..end)
        else {
            return Err(ctx.fatal(format!(
                "out-of-bound access (offset: 0x{:x}, size: 0x{:x}, mem size: 0x{:x})",
                req.addr,
                size,
                self.data.len()
            )));
        };

        tracing::trace!(
            component = ctx.name(),
            offset = req.addr,
            size,
            is_write = req.is_write,
            "memory access"
        );

        if req.is_write {
            self.data[range].copy_from_slice(req.data());
            self.writes += 1;
        } else {
            req.data_mut().copy_from_slice(&self.data[range]);
            self.reads += 1;
        }
        self.bytes += size as u64;
        req.inc_latency(self.latency);
        Ok(IoStatus::Completed(req))
    }

    fn export_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "size": self.data.len(),
            "latency": self.latency,
            "reads": self.reads,
            "writes": self.writes,
            "bytes": self.bytes,
        })
    }
}
