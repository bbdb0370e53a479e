//! # hiersim
//!
//! A discrete-event timing simulator for many-core accelerator fabrics and
//! chip-to-chip networks.
//!
//! ## Design Principles
//!
//! - **One global clock**: every action is an event on a single timeline in
//!   picoseconds. Each component runs in a clock domain and schedules its
//!   own events in cycles of that domain.
//! - **Components and ports**: models communicate only through bound ports.
//!   IO ports carry [`Request`]s, wire ports carry values, clock ports
//!   carry clock control.
//! - **Request/response protocol**: a request is answered `Completed`
//!   (with accumulated latency), `Pending` (a response follows later) or
//!   `Denied` (backpressure, a grant follows once the target has room).
//! - **Deterministic**: single-threaded; events at the same time fire in
//!   scheduling order.
//!
//! ## Features
//!
//! - `parallel` - Run independent sweep configurations on rayon workers
//!
//! ## Quick Start
//!
//! ```rust
//! use hiersim::components::{Memory, ScriptedMaster};
//! use hiersim::{Request, SimulationEngine};
//!
//! let mut engine = SimulationEngine::new();
//! let script = ScriptedMaster::new()
//!     .with_request(1, Request::write_u32(0x10, 42))
//!     .with_request(2, Request::read_u32(0x10));
//! engine.add_component("core", Box::new(script)).unwrap();
//! engine.add_component("mem", Box::new(Memory::new(4096, 2))).unwrap();
//! engine.bind_paths("core:out", "mem:input").unwrap();
//! engine.run().unwrap();
//!
//! let core = engine.component_by_path::<ScriptedMaster>("core").unwrap();
//! assert_eq!(core.completions[1].request.value_u32(), Some(42));
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use hiersim::{build_engine, create_default_registry, PlatformConfig};
//!
//! let config = PlatformConfig::from_yaml_file("platform.yaml")?;
//! let mut engine = build_engine(&config, &create_default_registry())?;
//! let exit_code = engine.join()?;
//! ```

pub mod types;
pub mod error;
pub mod request;
pub mod event;
pub mod component;
pub mod context;
pub mod engine;
pub mod fsm;
pub mod config;
pub mod components;
pub mod registry;
pub mod platform;
pub mod stats;
pub mod sweep;

// Re-export commonly used types
pub use types::{ComponentId, Cycles, EventId, PortId, SimTime};
pub use error::{SimError, SimResult};
pub use request::{IoStatus, IoStatusKind, Request};
pub use event::{EventQueue, TraceAction, TraceRecord};
pub use component::{ClockSignal, Component, ComponentDesc, PortDesc, PortDirection, PortKind};
pub use context::SimContext;
pub use engine::{EngineStats, SimulationEngine};
pub use fsm::{BlockStreamer, StateTracker, TimingState};
pub use config::{ComponentConfig, ConfigError, ConfigResult, PlatformConfig, PlatformConfigBuilder};
pub use registry::{create_default_registry, ComponentRegistry};
pub use platform::{build_engine, C2cPlatformConfig, C2cTopology};
pub use stats::{SimulationStats, StatsCollector, Timer};
pub use sweep::{run_sweep, SweepRun};

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG` overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// hiersim::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
