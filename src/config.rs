//! Run configuration
//!
//! A [`RunConfig`] can be built in code, loaded from a TOML file, and
//! overridden by `BENCHTREE_*` environment variables:
//!
//! ```toml
//! pprof = true
//! report_count = 10
//! callgraph = "svg"
//! heap = true
//! result = "target/bench.json"
//! ```
//!
//! | variable                  | field            |
//! |---------------------------|------------------|
//! | `BENCHTREE_NO_GC`         | `no_gc`          |
//! | `BENCHTREE_PPROF`         | `pprof`          |
//! | `BENCHTREE_CPU_PROFILE`   | `cpu_profile`    |
//! | `BENCHTREE_FREQUENCY`     | `frequency`      |
//! | `BENCHTREE_REPORT_COUNT`  | `report_count`   |
//! | `BENCHTREE_CALLGRAPH`     | `callgraph`      |
//! | `BENCHTREE_NO_LEGEND`     | `no_legend`      |
//! | `BENCHTREE_HEAP`          | `heap`           |
//! | `BENCHTREE_RESULT`        | `result`         |
//! | `BENCHTREE_PIN_THREAD`    | `pin_thread`     |

use crate::error::{BenchError, Result};
use crate::report::options::DEFAULT_GRAPH_COUNT;
use crate::report::Callgraph;
use crate::sampler::DEFAULT_FREQUENCY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Rows per CPU report unless configured otherwise
pub const DEFAULT_REPORT_COUNT: usize = 25;

/// Highest accepted sampling frequency in Hz
pub const MAX_FREQUENCY: i32 = 10_000;

/// Options of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Suppress automatic collection while leaves measure
    pub no_gc: bool,
    /// Attach the standard CPU reports to the result
    pub pprof: bool,
    /// Write the raw CPU dump to this path
    pub cpu_profile: Option<PathBuf>,
    /// CPU sampling frequency in Hz
    pub frequency: i32,
    /// Rows per CPU report, 0 for unlimited
    pub report_count: usize,
    /// Attach a call graph in this format to the `top` report
    pub callgraph: Option<Callgraph>,
    /// Node cap of the call graph
    pub callgraph_count: usize,
    pub no_legend: bool,
    /// Attach allocation reports (needs the counting allocator)
    pub heap: bool,
    /// Write the benchmark JSON to this path
    pub result: Option<PathBuf>,
    /// Pin the benchmark thread to its current CPU (Linux only)
    pub pin_thread: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            no_gc: false,
            pprof: false,
            cpu_profile: None,
            frequency: DEFAULT_FREQUENCY,
            report_count: DEFAULT_REPORT_COUNT,
            callgraph: None,
            callgraph_count: DEFAULT_GRAPH_COUNT,
            no_legend: false,
            heap: false,
            result: None,
            pin_thread: true,
        }
    }
}

impl RunConfig {
    /// Configuration with CPU reports enabled
    pub fn profiled() -> Self {
        Self {
            pprof: true,
            ..Self::default()
        }
    }

    /// Whether the CPU sampler has to run
    pub fn samples_cpu(&self) -> bool {
        self.pprof || self.cpu_profile.is_some()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Optional file, then environment overrides, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `BENCHTREE_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BENCHTREE_NO_GC") {
            self.no_gc = parse_bool("BENCHTREE_NO_GC", &v)?;
        }
        if let Some(v) = lookup("BENCHTREE_PPROF") {
            self.pprof = parse_bool("BENCHTREE_PPROF", &v)?;
        }
        if let Some(v) = lookup("BENCHTREE_CPU_PROFILE") {
            self.cpu_profile = non_empty_path(v);
        }
        if let Some(v) = lookup("BENCHTREE_FREQUENCY") {
            self.frequency = parse_number("BENCHTREE_FREQUENCY", &v)?;
        }
        if let Some(v) = lookup("BENCHTREE_REPORT_COUNT") {
            self.report_count = parse_number("BENCHTREE_REPORT_COUNT", &v)?;
        }
        if let Some(v) = lookup("BENCHTREE_CALLGRAPH") {
            self.callgraph = match v.parse::<Callgraph>() {
                Ok(Callgraph::None) => None,
                Ok(graph) => Some(graph),
                Err(e) => return Err(BenchError::Config(format!("BENCHTREE_CALLGRAPH: {}", e))),
            };
        }
        if let Some(v) = lookup("BENCHTREE_NO_LEGEND") {
            self.no_legend = parse_bool("BENCHTREE_NO_LEGEND", &v)?;
        }
        if let Some(v) = lookup("BENCHTREE_HEAP") {
            self.heap = parse_bool("BENCHTREE_HEAP", &v)?;
        }
        if let Some(v) = lookup("BENCHTREE_RESULT") {
            self.result = non_empty_path(v);
        }
        if let Some(v) = lookup("BENCHTREE_PIN_THREAD") {
            self.pin_thread = parse_bool("BENCHTREE_PIN_THREAD", &v)?;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.frequency < 1 || self.frequency > MAX_FREQUENCY {
            return Err(BenchError::Config(format!(
                "frequency must be in [1, {}], got {}",
                MAX_FREQUENCY, self.frequency
            )));
        }
        if self.callgraph.is_some() && !self.pprof {
            return Err(BenchError::Config(
                "callgraph requires pprof reports to be enabled".to_string(),
            ));
        }
        for (name, path) in [("cpu_profile", &self.cpu_profile), ("result", &self.result)] {
            if path.as_deref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(BenchError::Config(format!("{} path must not be empty", name)));
            }
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(BenchError::Config(format!(
            "{}: expected a boolean, got {:?}",
            name, other
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BenchError::Config(format!("{}: expected a number, got {:?}", name, value)))
}

fn non_empty_path(value: String) -> Option<PathBuf> {
    if value.is_empty() {
        None
    } else {
        Some(PathBuf::from(value))
    }
}
