//! Statistics collection and export.
//!
//! [`SimulationStats`] gathers the engine counters and the JSON statistics
//! every component exports at the end of a run, and writes them as JSON,
//! CSV or a human-readable summary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::engine::{EngineStats, SimulationEngine};
use crate::types::SimTime;

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    /// Simulation metadata
    pub metadata: SimulationMetadata,

    /// Simulated time when the run stopped, in picoseconds
    pub final_time: SimTime,

    /// Code passed to `quit`, if any
    pub exit_code: Option<i32>,

    /// Engine-level counters
    pub engine: EngineStats,

    /// Exported statistics per component path
    pub components: BTreeMap<String, Value>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Simulation name/description
    pub name: String,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version that produced the statistics
    pub version: String,

    /// Configuration file used (if any)
    pub config_file: Option<String>,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Total wall-clock time in milliseconds
    pub total_wall_time_ms: f64,

    /// Simulated picoseconds per wall-clock second
    pub sim_time_per_second: f64,

    /// Events fired per wall-clock second
    pub events_per_second: f64,
}

impl SimulationStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..SimulationMetadata::default()
            },
            ..Self::default()
        }
    }

    /// Snapshots the counters of `engine` and of every component.
    pub fn from_engine(engine: &SimulationEngine) -> Self {
        let mut stats = Self::new();
        stats.update_from_engine(engine);
        stats
    }

    /// Sets the simulation name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Records the configuration file the platform came from.
    pub fn with_config_file(mut self, path: impl Into<String>) -> Self {
        self.metadata.config_file = Some(path.into());
        self
    }

    /// Records the start time.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(timestamp_now());
    }

    /// Records the end time.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(timestamp_now());
    }

    /// Refreshes engine counters and component statistics.
    pub fn update_from_engine(&mut self, engine: &SimulationEngine) {
        self.final_time = engine.now();
        self.exit_code = engine.exit_code();
        self.engine = engine.stats().clone();

        self.components.clear();
        let exported = engine.export_stats();
        if let Some(components) = exported.get("components").and_then(Value::as_object) {
            for (path, stats) in components {
                self.components.insert(path.clone(), stats.clone());
            }
        }
    }

    /// Statistics exported by the component at `path`.
    pub fn component(&self, path: &str) -> Option<&Value> {
        self.components.get(path)
    }

    /// Updates timing statistics based on wall clock time.
    pub fn compute_timing(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;

        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.sim_time_per_second = self.final_time as f64 / seconds;
            self.timing.events_per_second = self.engine.events_fired as f64 / seconds;
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports statistics to CSV.
    ///
    /// Engine counters come first; component statistics follow as
    /// `path.key` rows. Only scalar component values are written.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");

        csv.push_str(&format!("final_time,{}\n", self.final_time));
        if let Some(code) = self.exit_code {
            csv.push_str(&format!("exit_code,{}\n", code));
        }
        csv.push_str(&format!("events_fired,{}\n", self.engine.events_fired));
        csv.push_str(&format!("requests,{}\n", self.engine.requests));
        csv.push_str(&format!("denied,{}\n", self.engine.denied));
        csv.push_str(&format!("pending,{}\n", self.engine.pending));
        csv.push_str(&format!("responses,{}\n", self.engine.responses));
        csv.push_str(&format!("grants,{}\n", self.engine.grants));
        csv.push_str(&format!("wire_updates,{}\n", self.engine.wire_updates));

        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("sim_time_per_second,{:.2}\n", self.timing.sim_time_per_second));
        csv.push_str(&format!("events_per_second,{:.2}\n", self.timing.events_per_second));

        for (path, stats) in &self.components {
            let Some(fields) = stats.as_object() else {
                continue;
            };
            for (key, value) in fields {
                let cell = match value {
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::String(s) => s.clone(),
                    _ => continue,
                };
                csv.push_str(&format!("{}.{},{}\n", path, key, cell));
            }
        }

        csv
    }

    /// Exports statistics to CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        writeln!(w)?;

        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        if let Some(ref start) = self.metadata.start_time {
            writeln!(w, "Started: {}", start)?;
        }
        if let Some(ref end) = self.metadata.end_time {
            writeln!(w, "Ended: {}", end)?;
        }
        writeln!(w)?;

        writeln!(w, "--- Engine ---")?;
        writeln!(w, "Final simulation time: {} ps", self.final_time)?;
        match self.exit_code {
            Some(code) => writeln!(w, "Exit code: {}", code)?,
            None => writeln!(w, "Exit code: none (queue drained)")?,
        }
        writeln!(w, "Events fired: {}", self.engine.events_fired)?;
        writeln!(
            w,
            "Requests: {} ({} denied, {} pending)",
            self.engine.requests, self.engine.denied, self.engine.pending
        )?;
        writeln!(w, "Responses: {}", self.engine.responses)?;
        writeln!(w, "Grants: {}", self.engine.grants)?;
        writeln!(w, "Wire updates: {}", self.engine.wire_updates)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Sim time/sec: {:.2}", self.timing.sim_time_per_second)?;
        writeln!(w, "Events/sec: {:.2}", self.timing.events_per_second)?;
        writeln!(w)?;

        writeln!(w, "--- Components ---")?;
        for (path, stats) in &self.components {
            let kind = stats.get("type").and_then(Value::as_str).unwrap_or("?");
            writeln!(w, "{} ({}): {}", path, kind, stats)?;
        }

        Ok(())
    }

    /// Returns a summary string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        if self.write_summary(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// A simple timer for measuring wall-clock time.
#[derive(Debug)]
pub struct Timer {
    start: std::time::Instant,
}

impl Timer {
    /// Starts a new timer.
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Returns elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns elapsed time in seconds.
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

/// Seconds since the Unix epoch.
fn timestamp_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

/// Wraps a run with wall-clock timing.
#[derive(Debug)]
pub struct StatsCollector {
    stats: SimulationStats,
    timer: Option<Timer>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            stats: SimulationStats::new(),
            timer: None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.stats.metadata.name = name.into();
    }

    /// Starts timing.
    pub fn start(&mut self) {
        self.timer = Some(Timer::start());
        self.stats.record_start();
    }

    /// Stops timing and snapshots `engine`.
    pub fn stop(&mut self, engine: &SimulationEngine) {
        self.stats.record_end();
        self.stats.update_from_engine(engine);
        if let Some(ref timer) = self.timer {
            self.stats.compute_timing(timer.elapsed_ms());
        }
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn into_stats(self) -> SimulationStats {
        self.stats
    }
}
