//! Argument layout of chip-to-chip flits.
//!
//! Flits travelling through links, routers and endpoints are ordinary
//! [`Request`]s whose argument slots carry the routing header.

use crate::request::Request;

/// Argument slot of a flit header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlitArg {
    /// Source chip
    SourId,
    /// Destination chip
    DestId,
    /// Non-zero for an acknowledgement flit
    IsAck,
    /// Non-zero on the last flit of a transfer
    IsLast,
    /// Payload size carried by the flit
    Size,
    /// Non-zero for a write transfer
    Write,
    /// Output port chosen by the topology manager
    PortId,
}

impl FlitArg {
    /// Number of argument slots of a flit.
    pub const COUNT: usize = 7;

    /// Slot index of this argument.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Creates a write flit of `size` bytes from `source` to `dest`.
pub fn new_flit(source: u64, dest: u64, size: usize) -> Request {
    let mut flit = Request::write(0, vec![0; size]).with_args(FlitArg::COUNT);
    set(&mut flit, FlitArg::SourId, source as i64);
    set(&mut flit, FlitArg::DestId, dest as i64);
    set(&mut flit, FlitArg::Size, size as i64);
    set(&mut flit, FlitArg::Write, 1);
    flit
}

/// Reads a header field.
pub fn get(flit: &Request, arg: FlitArg) -> i64 {
    flit.arg(arg.index())
}

/// Writes a header field.
pub fn set(flit: &mut Request, arg: FlitArg, value: i64) {
    flit.set_arg(arg.index(), value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flit_header() {
        let mut flit = new_flit(3, 7, 64);
        assert_eq!(flit.size(), 64);
        assert!(flit.is_write);
        assert_eq!(get(&flit, FlitArg::SourId), 3);
        assert_eq!(get(&flit, FlitArg::DestId), 7);
        assert_eq!(get(&flit, FlitArg::IsLast), 0);
        set(&mut flit, FlitArg::IsLast, 1);
        assert_eq!(get(&flit, FlitArg::IsLast), 1);
        assert_eq!(flit.args().len(), FlitArg::COUNT);
        assert_eq!(FlitArg::PortId.index(), 6);
    }
}
