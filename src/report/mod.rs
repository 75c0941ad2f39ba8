//! Report engine
//!
//! Turns a raw profile dump into a ranked table of per-function costs:
//!
//! 1. decode the dump and resolve stacks ([`profile`])
//! 2. select samples and frames ([`filter`])
//! 3. aggregate flat and cumulative cost, rank, truncate ([`aggregate`])
//! 4. convert to the display unit
//! 5. optionally render a call graph ([`callgraph`])
//!
//! Problems with the input never panic and never abort: they are collected in
//! [`Report::errors`] and the report degrades to partial or empty rows.

pub mod aggregate;
pub mod callgraph;
pub mod filter;
pub mod format;
pub mod options;
pub mod profile;

pub use options::{Callgraph, ReportKind, ReportOptions, SampleIndex, RUNTIME_PATTERN};
pub use profile::{ProfileBuilder, ResolvedProfile};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Display unit of report values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "us")]
    Microsecond,
    #[serde(rename = "ms")]
    Millisecond,
    #[serde(rename = "s")]
    Second,
    #[serde(rename = "mb")]
    Megabyte,
    #[serde(rename = "kb")]
    Kilobyte,
    #[serde(rename = "b")]
    Byte,
    /// Raw sample values
    #[default]
    #[serde(rename = "")]
    None,
}

/// Kind of quantity a sample type measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Time,
    Space,
    Count,
}

impl Dimension {
    /// Classify a profile sample unit (`nanoseconds`, `bytes`, `count`, ...)
    pub fn of_sample_unit(unit: &str) -> Dimension {
        match unit {
            "nanoseconds" | "ns" => Dimension::Time,
            "bytes" | "b" => Dimension::Space,
            _ => Dimension::Count,
        }
    }
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Microsecond => "us",
            Unit::Millisecond => "ms",
            Unit::Second => "s",
            Unit::Megabyte => "mb",
            Unit::Kilobyte => "kb",
            Unit::Byte => "b",
            Unit::None => "",
        }
    }

    /// `None` for [`Unit::None`], which fits every dimension
    pub fn dimension(&self) -> Option<Dimension> {
        match self {
            Unit::Microsecond | Unit::Millisecond | Unit::Second => Some(Dimension::Time),
            Unit::Megabyte | Unit::Kilobyte | Unit::Byte => Some(Dimension::Space),
            Unit::None => None,
        }
    }

    /// Divisor from raw nanoseconds or bytes into this unit
    pub fn divisor(&self) -> f64 {
        match self {
            Unit::Microsecond => 1e3,
            Unit::Millisecond => 1e6,
            Unit::Second => 1e9,
            Unit::Megabyte => 1024.0 * 1024.0,
            Unit::Kilobyte => 1024.0,
            Unit::Byte | Unit::None => 1.0,
        }
    }

    pub fn convert(&self, raw: f64) -> f64 {
        raw / self.divisor()
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "us" => Ok(Unit::Microsecond),
            "ms" => Ok(Unit::Millisecond),
            "s" => Ok(Unit::Second),
            "mb" => Ok(Unit::Megabyte),
            "kb" => Ok(Unit::Kilobyte),
            "b" => Ok(Unit::Byte),
            "" | "none" => Ok(Unit::None),
            other => Err(format!("unknown unit {:?}", other)),
        }
    }
}

/// One ranked function cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Row {
    #[serde(with = "crate::json_output::float")]
    pub flat: f64,
    #[serde(rename = "flat%", with = "crate::json_output::float")]
    pub flat_percent: f64,
    #[serde(with = "crate::json_output::float")]
    pub cum: f64,
    #[serde(rename = "cum%", with = "crate::json_output::float")]
    pub cum_percent: f64,
    #[serde(rename = "sum%", with = "crate::json_output::float")]
    pub sum_percent: f64,
    pub function: String,
}

/// Ranked cost table produced from one profile dump
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Report {
    pub label: String,
    pub unit: Unit,
    /// Encoded call-graph rendering
    #[serde(with = "crate::json_output::image")]
    pub image: Option<Vec<u8>>,
    pub rows: Vec<Row>,
    /// Non-fatal diagnostics collected while building the report
    pub errors: Vec<String>,
}

impl Report {
    pub fn new(label: impl Into<String>, unit: Unit) -> Self {
        Self {
            label: label.into(),
            unit,
            ..Default::default()
        }
    }

    /// Report carrying a single error and no rows
    pub fn failed(label: impl Into<String>, error: impl fmt::Display) -> Self {
        let mut report = Self::new(label, Unit::None);
        report.errors.push(error.to_string());
        report
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn row(&self, function: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.function == function)
    }
}

/// Build a ranked report from a raw profile dump
pub fn top(dump: &[u8], label: &str, options: &ReportOptions) -> Report {
    match ResolvedProfile::decode(dump) {
        Ok(profile) => top_resolved(&profile, label, options),
        Err(err) => {
            tracing::warn!(report = label, "failed to decode profile: {}", err);
            Report::failed(label, err)
        }
    }
}

/// Build a ranked report from an already decoded profile
pub fn top_resolved(profile: &ResolvedProfile, label: &str, options: &ReportOptions) -> Report {
    let mut report = Report::new(label, options.unit.unwrap_or_default());

    let value_index = match options.resolve_sample_index(profile) {
        Ok(index) => index,
        Err(err) => {
            report.unit = Unit::None;
            report.errors.push(err);
            return report;
        }
    };

    let sample_unit = profile.sample_types[value_index].unit.as_str();
    let dimension = Dimension::of_sample_unit(sample_unit);
    report.unit = match options.unit {
        Some(unit) => match unit.dimension() {
            Some(d) if d != dimension => {
                report.errors.push(format!(
                    "unit {:?} is incompatible with sample unit {:?}",
                    unit.as_str(),
                    sample_unit
                ));
                Unit::None
            }
            _ => unit,
        },
        None => options::default_unit(dimension),
    };

    let filter = filter::SampleFilter::compile(options, &mut report.errors);
    let selection = filter.select(profile, value_index);
    let table = aggregate::CostTable::build(&selection);
    let ranked = table.rank(profile, options.cum_sort, options.count);

    let total = selection.total as f64;
    let mut sum = 0.0;
    for entry in &ranked {
        let flat_percent = percent(entry.flat, total);
        sum += flat_percent;
        report.rows.push(Row {
            flat: report.unit.convert(entry.flat as f64),
            flat_percent,
            cum: report.unit.convert(entry.cum as f64),
            cum_percent: percent(entry.cum, total),
            sum_percent: sum,
            function: profile.function_name(entry.function).to_string(),
        });
    }

    if options.graph != Callgraph::None {
        let node_count = if options.graph_count > 0 {
            options.graph_count
        } else {
            options.count
        };
        let dot = callgraph::render(profile, &selection, &table, node_count, report.unit, label);
        let dot = if options.no_legend {
            callgraph::strip_legend(&dot)
        } else {
            dot
        };
        match callgraph::layout(&dot, options.graph) {
            Ok(image) => report.image = Some(image),
            Err(err) => {
                tracing::warn!(report = label, "call graph rendering failed: {}", err);
                report.errors.push(err.to_string());
            }
        }
    }

    tracing::debug!(
        report = label,
        rows = report.rows.len(),
        samples = selection.samples.len(),
        errors = report.errors.len(),
        "report built"
    );
    report
}

fn percent(value: i64, total: f64) -> f64 {
    if total == 0.0 {
        0.0
    } else {
        value as f64 / total * 100.0
    }
}
