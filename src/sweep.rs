//! Design-space sweeps.
//!
//! A sweep runs independent platform configurations to completion and
//! reports how each one ended. Every run owns its engine, so with the
//! `parallel` feature the runs are spread over rayon worker threads; a
//! single simulation never is.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::PlatformConfig;
use crate::error::SimResult;
use crate::platform::build_engine;
use crate::registry::ComponentRegistry;
use crate::stats::{SimulationStats, Timer};

/// Outcome of one configuration of a sweep.
#[derive(Debug)]
pub struct SweepRun {
    /// Position of the configuration in the sweep
    pub index: usize,
    /// Code passed to `quit`, if the run quit
    pub exit_code: Option<i32>,
    /// Statistics of the run, unless it failed to build
    pub stats: Option<SimulationStats>,
    /// Diagnostic of a failed build or a fatal simulation error
    pub error: Option<String>,
}

impl SweepRun {
    /// Returns true if the run quit with code 0.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == Some(0)
    }
}

/// Builds and runs one configuration.
///
/// With `collect_stats` and an `output_dir` set, the statistics are also
/// written to `<output_dir>/run_<index>.json`.
pub fn run_one(index: usize, config: &PlatformConfig, registry: &ComponentRegistry) -> SweepRun {
    let timer = Timer::start();
    let mut engine = match build_engine(config, registry) {
        Ok(engine) => engine,
        Err(err) => {
            warn!(run = index, error = %err, "platform build failed");
            return SweepRun {
                index,
                exit_code: None,
                stats: None,
                error: Some(err.to_string()),
            };
        }
    };

    let outcome: SimResult<Option<i32>> = engine.join();
    let mut stats = SimulationStats::from_engine(&engine).with_name(format!("run_{}", index));
    stats.compute_timing(timer.elapsed_ms());

    let mut error = outcome.as_ref().err().map(|err| err.to_string());
    if config.simulation.collect_stats {
        if let Some(dir) = &config.simulation.output_dir {
            let path = std::path::Path::new(dir).join(format!("run_{}.json", index));
            if let Err(err) = stats.to_json_file(&path) {
                warn!(run = index, path = %path.display(), error = %err, "cannot write statistics");
                error.get_or_insert_with(|| err.to_string());
            }
        }
    }

    debug!(
        run = index,
        exit_code = ?engine.exit_code(),
        final_time = engine.now(),
        "sweep run finished"
    );
    SweepRun {
        index,
        exit_code: engine.exit_code(),
        stats: Some(stats),
        error,
    }
}

/// Runs every configuration and returns the outcomes in input order.
pub fn run_sweep(configs: &[PlatformConfig], registry: &ComponentRegistry) -> Vec<SweepRun> {
    let timer = Timer::start();

    #[cfg(feature = "parallel")]
    let runs: Vec<SweepRun> = configs
        .par_iter()
        .enumerate()
        .map(|(index, config)| run_one(index, config, registry))
        .collect();

    #[cfg(not(feature = "parallel"))]
    let runs: Vec<SweepRun> = configs
        .iter()
        .enumerate()
        .map(|(index, config)| run_one(index, config, registry))
        .collect();

    info!(
        runs = runs.len(),
        succeeded = runs.iter().filter(|run| run.is_success()).count(),
        wall_ms = timer.elapsed_ms(),
        "sweep finished"
    );
    runs
}
