//! Memory-mapped requests and the synchronous outcome of submitting one.
//!
//! A [`Request`] is owned by exactly one party at any time. Submitting it
//! through a master port moves it into the slave; the slave either hands it
//! back ([`IoStatus::Completed`], [`IoStatus::Denied`]) or keeps it
//! ([`IoStatus::Pending`]) until it calls `resp`. Components that fan a
//! request out to several peers use [`Request::fork`] to give every
//! sub-request its own payload.

use crate::types::{ComponentId, Cycles, PortId};

/// Where a response has to be delivered: the master port that issued the
/// request at one hop of the forwarding chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ResponseSink {
    pub component: ComponentId,
    pub port: PortId,
}

/// An in-flight memory-mapped transaction.
#[derive(Debug)]
pub struct Request {
    /// Target address (an offset inside the slave's window)
    pub addr: u64,
    /// Whether this is a write access
    pub is_write: bool,
    /// Latency accumulated by synchronous responders, in cycles
    pub latency: Cycles,
    /// Owned payload; its length is the access size
    data: Vec<u8>,
    /// Opaque protocol arguments carried alongside the access
    args: Vec<i64>,
    /// One entry per hop that is still waiting for a response
    sinks: Vec<ResponseSink>,
}

impl Request {
    /// Creates a request with a zero-filled payload of `size` bytes.
    pub fn new(addr: u64, size: usize, is_write: bool) -> Self {
        Self {
            addr,
            is_write,
            latency: 0,
            data: vec![0; size],
            args: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Creates a read request of `size` bytes.
    pub fn read(addr: u64, size: usize) -> Self {
        Self::new(addr, size, false)
    }

    /// Creates a write request carrying `data`.
    pub fn write(addr: u64, data: Vec<u8>) -> Self {
        Self {
            addr,
            is_write: true,
            latency: 0,
            data,
            args: Vec::new(),
            sinks: Vec::new(),
        }
    }

    /// Creates a 4-byte register write.
    pub fn write_u32(addr: u64, value: u32) -> Self {
        Self::write(addr, value.to_le_bytes().to_vec())
    }

    /// Creates a 4-byte register read.
    pub fn read_u32(addr: u64) -> Self {
        Self::read(addr, 4)
    }

    /// Allocates `count` zeroed argument slots.
    pub fn with_args(mut self, count: usize) -> Self {
        self.args = vec![0; count];
        self
    }

    /// Returns the access size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Returns the payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the payload for in-place modification.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replaces the payload, changing the access size.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
    }

    /// Consumes the request and returns its payload.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Interprets the first four payload bytes as a little-endian register value.
    ///
    /// Returns `None` if the payload is shorter than four bytes.
    pub fn value_u32(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Stores a little-endian register value into the first four payload bytes.
    pub fn set_value_u32(&mut self, value: u32) {
        if self.data.len() < 4 {
            self.data.resize(4, 0);
        }
        self.data[..4].copy_from_slice(&value.to_le_bytes());
    }

    /// Returns argument slot `index`, or 0 if it was never allocated.
    pub fn arg(&self, index: usize) -> i64 {
        self.args.get(index).copied().unwrap_or(0)
    }

    /// Sets argument slot `index`, growing the argument list if needed.
    pub fn set_arg(&mut self, index: usize, value: i64) {
        if index >= self.args.len() {
            self.args.resize(index + 1, 0);
        }
        self.args[index] = value;
    }

    /// Returns all argument slots.
    pub fn args(&self) -> &[i64] {
        &self.args
    }

    /// Adds `cycles` to the accumulated latency.
    pub fn inc_latency(&mut self, cycles: Cycles) {
        self.latency += cycles;
    }

    /// Creates an independent copy for forwarding.
    ///
    /// The payload and arguments are deep-copied; the copy starts with zero
    /// latency and no pending response sinks, so it can be submitted and
    /// released independently of `self`.
    pub fn fork(&self) -> Request {
        Request {
            addr: self.addr,
            is_write: self.is_write,
            latency: 0,
            data: self.data.clone(),
            args: self.args.clone(),
            sinks: Vec::new(),
        }
    }

    /// Number of hops still waiting for a response.
    pub fn pending_hops(&self) -> usize {
        self.sinks.len()
    }

    pub(crate) fn push_sink(&mut self, sink: ResponseSink) {
        self.sinks.push(sink);
    }

    pub(crate) fn pop_sink(&mut self) -> Option<ResponseSink> {
        self.sinks.pop()
    }
}

/// Synchronous outcome of submitting a request.
#[must_use]
#[derive(Debug)]
pub enum IoStatus {
    /// Fully serviced before returning; ownership is back with the initiator.
    Completed(Request),
    /// The slave kept the request and will answer later through `resp`.
    Pending,
    /// The slave declined; the request comes back unchanged and the
    /// initiator must wait for a grant before resubmitting it.
    Denied(Request),
}

/// Kind of an [`IoStatus`], without the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoStatusKind {
    Completed,
    Pending,
    Denied,
}

impl IoStatus {
    /// Returns the outcome kind.
    pub fn kind(&self) -> IoStatusKind {
        match self {
            IoStatus::Completed(_) => IoStatusKind::Completed,
            IoStatus::Pending => IoStatusKind::Pending,
            IoStatus::Denied(_) => IoStatusKind::Denied,
        }
    }

    /// Returns true if the request was completed synchronously.
    pub fn is_completed(&self) -> bool {
        matches!(self, IoStatus::Completed(_))
    }

    /// Returns true if the slave kept the request.
    pub fn is_pending(&self) -> bool {
        matches!(self, IoStatus::Pending)
    }

    /// Returns true if the request was denied.
    pub fn is_denied(&self) -> bool {
        matches!(self, IoStatus::Denied(_))
    }

    /// Returns the request handed back with a `Completed` or `Denied` outcome.
    pub fn into_request(self) -> Option<Request> {
        match self {
            IoStatus::Completed(req) | IoStatus::Denied(req) => Some(req),
            IoStatus::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_helpers() {
        let req = Request::write_u32(8, 0xdead_beef);
        assert!(req.is_write);
        assert_eq!(req.size(), 4);
        assert_eq!(req.value_u32(), Some(0xdead_beef));

        let mut rd = Request::read_u32(4);
        assert_eq!(rd.value_u32(), Some(0));
        rd.set_value_u32(7);
        assert_eq!(rd.value_u32(), Some(7));

        let short = Request::read(0, 2);
        assert_eq!(short.value_u32(), None);
    }

    #[test]
    fn test_args() {
        let mut req = Request::write(0, vec![0; 8]).with_args(3);
        assert_eq!(req.args(), &[0, 0, 0]);
        req.set_arg(1, 42);
        req.set_arg(5, -1);
        assert_eq!(req.arg(1), 42);
        assert_eq!(req.arg(5), -1);
        assert_eq!(req.arg(9), 0);
        assert_eq!(req.args().len(), 6);
    }

    #[test]
    fn test_fork_is_independent() {
        let mut original = Request::write(0x40, vec![1, 2, 3, 4]).with_args(2);
        original.set_arg(0, 9);
        original.inc_latency(5);
        original.push_sink(ResponseSink { component: 1, port: 0 });

        let mut copy = original.fork();
        copy.data_mut()[0] = 0xff;

        assert_eq!(original.data(), &[1, 2, 3, 4]);
        assert_eq!(copy.data(), &[0xff, 2, 3, 4]);
        assert_eq!(copy.arg(0), 9);
        assert_eq!(copy.latency, 0);
        assert_eq!(copy.pending_hops(), 0);
        assert_eq!(original.pending_hops(), 1);
    }

    #[test]
    fn test_status_accessors() {
        let done = IoStatus::Completed(Request::read(0, 4));
        assert!(done.is_completed());
        assert_eq!(done.kind(), IoStatusKind::Completed);
        assert!(done.into_request().is_some());

        let pending = IoStatus::Pending;
        assert!(pending.is_pending());
        assert!(pending.into_request().is_none());

        let denied = IoStatus::Denied(Request::read(0, 4));
        assert!(denied.is_denied());
        assert_eq!(denied.kind(), IoStatusKind::Denied);
    }
}
