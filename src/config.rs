//! Configuration system for the simulator.
//!
//! Two layers live here:
//!
//! * [`ComponentConfig`] is the hierarchical key/value tree a single
//!   component is constructed from. Keys may be nested and are addressed
//!   with dotted paths (`"ce.height"`). A missing required key is a
//!   construction-time error.
//! * [`PlatformConfig`] describes a whole platform declaratively: global
//!   simulation parameters, the component tree and the port bindings.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   frequency_mhz: 1000
//!   log_level: info
//!
//! components:
//!   - path: mem
//!     type: Memory
//!     attrs:
//!       size: 65536
//!       latency: 1
//!   - path: redmule
//!     type: RedMule
//!     attrs:
//!       ce_height: 4
//!       ce_width: 4
//!
//! bindings:
//!   - master: redmule:tcdm
//!     slave: mem:input
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::types::SimTime;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),

    #[error("Missing required configuration key: {0}")]
    MissingKey(String),

    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Hierarchical key/value configuration of one component.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ComponentConfig {
    root: Value,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            root: Value::Object(serde_json::Map::new()),
        }
    }
}

impl ComponentConfig {
    /// Creates an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing JSON value.
    pub fn from_value(root: Value) -> Self {
        Self { root }
    }

    /// Returns the underlying JSON tree.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Sets a top-level key, builder style.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Sets a key, creating intermediate objects along a dotted path.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        if !self.root.is_object() {
            self.root = Value::Object(serde_json::Map::new());
        }
        let mut node = &mut self.root;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let Value::Object(map) = node else {
                return;
            };
            if parts.peek().is_none() {
                map.insert(part.to_string(), value.into());
                return;
            }
            node = map
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !node.is_object() {
                *node = Value::Object(serde_json::Map::new());
            }
        }
    }

    /// Looks up a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, part| node.as_object()?.get(part))
    }

    /// Returns true if the dotted path exists.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Returns a sub-tree as its own configuration (empty if absent).
    pub fn child(&self, path: &str) -> ComponentConfig {
        self.get(path)
            .cloned()
            .map(ComponentConfig::from_value)
            .unwrap_or_default()
    }

    fn require(&self, path: &str) -> ConfigResult<&Value> {
        self.get(path)
            .ok_or_else(|| ConfigError::MissingKey(path.to_string()))
    }

    /// Reads a required signed integer.
    ///
    /// Strings holding decimal or `0x` hexadecimal numbers are accepted,
    /// since platform descriptions often spell addresses that way.
    pub fn get_int(&self, path: &str) -> ConfigResult<i64> {
        let value = self.require(path)?;
        match value {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| ConfigError::invalid(path, format!("{} is not an integer", n))),
            Value::String(s) => parse_int(s)
                .ok_or_else(|| ConfigError::invalid(path, format!("'{}' is not an integer", s))),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(ConfigError::invalid(
                path,
                format!("expected integer, found {}", other),
            )),
        }
    }

    /// Reads a required non-negative integer.
    pub fn get_uint(&self, path: &str) -> ConfigResult<u64> {
        let value = self.get_int(path)?;
        u64::try_from(value)
            .map_err(|_| ConfigError::invalid(path, format!("{} is negative", value)))
    }

    /// Reads a required non-negative integer as `usize`.
    pub fn get_usize(&self, path: &str) -> ConfigResult<usize> {
        let value = self.get_uint(path)?;
        usize::try_from(value)
            .map_err(|_| ConfigError::invalid(path, format!("{} does not fit usize", value)))
    }

    /// Reads a required string.
    pub fn get_str(&self, path: &str) -> ConfigResult<&str> {
        match self.require(path)? {
            Value::String(s) => Ok(s),
            other => Err(ConfigError::invalid(
                path,
                format!("expected string, found {}", other),
            )),
        }
    }

    /// Reads a required boolean.
    pub fn get_bool(&self, path: &str) -> ConfigResult<bool> {
        match self.require(path)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
            other => Err(ConfigError::invalid(
                path,
                format!("expected boolean, found {}", other),
            )),
        }
    }

    /// Reads an optional signed integer.
    pub fn get_int_or(&self, path: &str, default: i64) -> ConfigResult<i64> {
        if self.contains(path) {
            self.get_int(path)
        } else {
            Ok(default)
        }
    }

    /// Reads an optional non-negative integer.
    pub fn get_uint_or(&self, path: &str, default: u64) -> ConfigResult<u64> {
        if self.contains(path) {
            self.get_uint(path)
        } else {
            Ok(default)
        }
    }

    /// Reads an optional non-negative integer as `usize`.
    pub fn get_usize_or(&self, path: &str, default: usize) -> ConfigResult<usize> {
        if self.contains(path) {
            self.get_usize(path)
        } else {
            Ok(default)
        }
    }

    /// Reads an optional string.
    pub fn get_str_or<'a>(&'a self, path: &str, default: &'a str) -> ConfigResult<&'a str> {
        if self.contains(path) {
            self.get_str(path)
        } else {
            Ok(default)
        }
    }

    /// Reads an optional boolean.
    pub fn get_bool_or(&self, path: &str, default: bool) -> ConfigResult<bool> {
        if self.contains(path) {
            self.get_bool(path)
        } else {
            Ok(default)
        }
    }

    /// Reads an optional list of non-negative integers (empty if absent).
    pub fn get_uint_list(&self, path: &str) -> ConfigResult<Vec<u64>> {
        let Some(value) = self.get(path) else {
            return Ok(Vec::new());
        };
        let Value::Array(items) = value else {
            return Err(ConfigError::invalid(path, "expected a list"));
        };
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let key = format!("{}[{}]", path, index);
                match item {
                    Value::Number(n) => n
                        .as_u64()
                        .ok_or_else(|| ConfigError::invalid(&key, "not a non-negative integer")),
                    Value::String(s) => parse_int(s)
                        .and_then(|v| u64::try_from(v).ok())
                        .ok_or_else(|| ConfigError::invalid(&key, "not a non-negative integer")),
                    _ => Err(ConfigError::invalid(&key, "not a non-negative integer")),
                }
            })
            .collect()
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// Global simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Default clock frequency of every component, in MHz
    #[serde(default = "default_frequency_mhz")]
    pub frequency_mhz: u64,

    /// Optional time limit in picoseconds; `run` stops there if set
    #[serde(default)]
    pub max_time: Option<SimTime>,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect per-component statistics at the end of a run
    #[serde(default)]
    pub collect_stats: bool,

    /// Whether to record the (time, component, action) event trace
    #[serde(default)]
    pub trace_events: bool,

    /// Output directory for results
    #[serde(default)]
    pub output_dir: Option<String>,
}

fn default_frequency_mhz() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            frequency_mhz: default_frequency_mhz(),
            max_time: None,
            log_level: default_log_level(),
            collect_stats: false,
            trace_events: false,
            output_dir: None,
        }
    }
}

/// One component instance of a platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Hierarchical path, segments separated by `/`
    pub path: String,

    /// Registered component type name
    #[serde(rename = "type")]
    pub component_type: String,

    /// Construction attributes handed to the factory
    #[serde(default)]
    pub attrs: ComponentConfig,
}

/// A master/slave port binding, each side written `"path:port"`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingConfig {
    pub master: String,
    pub slave: String,
}

/// Splits a `"path:port"` endpoint into its two halves.
pub fn parse_endpoint(endpoint: &str) -> ConfigResult<(&str, &str)> {
    match endpoint.rsplit_once(':') {
        Some((path, port)) if !path.is_empty() && !port.is_empty() => Ok((path, port)),
        _ => Err(ConfigError::Validation(format!(
            "Malformed binding endpoint '{}', expected 'path:port'",
            endpoint
        ))),
    }
}

/// Complete platform configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    /// Global simulation parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Component instances, created in list order
    #[serde(default)]
    pub components: Vec<ComponentSpec>,

    /// Port bindings
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

impl PlatformConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: PlatformConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: PlatformConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.simulation.frequency_mhz == 0 {
            return Err(ConfigError::Validation(
                "simulation.frequency_mhz must be non-zero".to_string(),
            ));
        }

        let mut paths = HashSet::new();
        for component in &self.components {
            if component.path.is_empty()
                || component.path.split('/').any(|segment| segment.is_empty())
            {
                return Err(ConfigError::Validation(format!(
                    "Invalid component path: '{}'",
                    component.path
                )));
            }
            if component.path.contains(':') {
                return Err(ConfigError::Validation(format!(
                    "Component path may not contain ':': '{}'",
                    component.path
                )));
            }
            if !paths.insert(component.path.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate component path: {}",
                    component.path
                )));
            }
        }

        for binding in &self.bindings {
            for endpoint in [&binding.master, &binding.slave] {
                let (path, _) = parse_endpoint(endpoint)?;
                if !paths.contains(path) {
                    return Err(ConfigError::Validation(format!(
                        "Binding references non-existent component: {}",
                        path
                    )));
                }
            }
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Returns the number of components.
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    /// Returns the number of bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Finds a component by path.
    pub fn find_component(&self, path: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.path == path)
    }
}

/// Builder for creating PlatformConfig programmatically.
#[derive(Default)]
pub struct PlatformConfigBuilder {
    config: PlatformConfig,
}

impl PlatformConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default clock frequency.
    pub fn frequency_mhz(mut self, frequency: u64) -> Self {
        self.config.simulation.frequency_mhz = frequency;
        self
    }

    /// Sets a time limit in picoseconds.
    pub fn max_time(mut self, time: SimTime) -> Self {
        self.config.simulation.max_time = Some(time);
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Enables statistics collection.
    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    /// Enables the event trace.
    pub fn trace_events(mut self, enable: bool) -> Self {
        self.config.simulation.trace_events = enable;
        self
    }

    /// Adds a component.
    pub fn add_component(
        mut self,
        path: impl Into<String>,
        component_type: impl Into<String>,
        attrs: ComponentConfig,
    ) -> Self {
        self.config.components.push(ComponentSpec {
            path: path.into(),
            component_type: component_type.into(),
            attrs,
        });
        self
    }

    /// Adds a binding between two `"path:port"` endpoints.
    pub fn bind(mut self, master: impl Into<String>, slave: impl Into<String>) -> Self {
        self.config.bindings.push(BindingConfig {
            master: master.into(),
            slave: slave.into(),
        });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<PlatformConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
