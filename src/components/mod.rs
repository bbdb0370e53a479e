//! Built-in component models.
//!
//! # Available Components
//!
//! ## Memory system
//! - [`Memory`] - Flat memory with a fixed access latency
//! - [`Interleaver`] - Splits accesses across power-of-two banks
//! - [`SyncMem`] - Barrier counters owned by one cluster
//! - [`CtrlRegisters`] - End-of-computation, timer and console registers
//! - [`ClusterRegisters`] - Cluster identity, global barrier and boot handshake
//! - [`HbmCtrl`] - Splits accesses over HBM channels, with test-and-set ports
//!
//! ## Accelerators
//! - [`RedMule`] - Tiled matrix-multiply engine
//! - [`TransposeEngine`] - Tiled matrix transposition engine
//!
//! ## Chip-to-chip network
//! - [`D2DLink`] - Credit-controlled point-to-point link
//! - [`Router`] - Round-robin router asking a [`TopologyManager`] for routes
//! - [`Endpoint`] - Flit generator and sink
//! - [`PlatformCtrl`] - Starts the chips and ends the run at the final barrier
//!
//! ## Test helpers
//! - [`ScriptedMaster`] - Replays a script of requests

pub mod flit;
pub mod memory;
pub mod interleaver;
pub mod redmule;
pub mod transpose;
pub mod d2dlink;
pub mod router;
pub mod topology;
pub mod endpoint;
pub mod platform_ctrl;
pub mod ctrl_regs;
pub mod cluster_regs;
pub mod hbm_ctrl;
pub mod sync_mem;
pub mod mock;

pub use memory::Memory;
pub use interleaver::{BankSlice, Interleaver};
pub use redmule::{RedMule, RedMuleGeometry, RedMuleState, RedMuleTiming};
pub use transpose::{TransposeEngine, TransposeState};
pub use d2dlink::{D2DLink, LinkConfig};
pub use router::Router;
pub use topology::{FatTree, Mesh2D, MeshAlgorithm, Topology, TopologyManager};
pub use endpoint::Endpoint;
pub use platform_ctrl::PlatformCtrl;
pub use ctrl_regs::CtrlRegisters;
pub use cluster_regs::ClusterRegisters;
pub use hbm_ctrl::{HbmCtrl, HbmCtrlConfig};
pub use sync_mem::{Barrier, BarrierMap, BarrierSlot, SyncMem};
pub use mock::{Completion, ScriptedMaster};
