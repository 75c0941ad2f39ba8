//! CLI argument parsing for benchtree

use crate::report::{Callgraph, ReportOptions, SampleIndex, Unit};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Display unit for report values
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnitArg {
    /// Microseconds
    Us,
    /// Milliseconds
    Ms,
    /// Seconds
    S,
    /// Megabytes
    Mb,
    /// Kilobytes
    Kb,
    /// Bytes
    B,
    /// Raw sample values
    None,
}

impl From<UnitArg> for Unit {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::Us => Unit::Microsecond,
            UnitArg::Ms => Unit::Millisecond,
            UnitArg::S => Unit::Second,
            UnitArg::Mb => Unit::Megabyte,
            UnitArg::Kb => Unit::Kilobyte,
            UnitArg::B => Unit::Byte,
            UnitArg::None => Unit::None,
        }
    }
}

/// Sample value to rank by
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SampleIndexArg {
    Cpu,
    Samples,
    AllocObjects,
    AllocSpace,
    InuseObjects,
    InuseSpace,
}

impl From<SampleIndexArg> for SampleIndex {
    fn from(arg: SampleIndexArg) -> Self {
        match arg {
            SampleIndexArg::Cpu => SampleIndex::Cpu,
            SampleIndexArg::Samples => SampleIndex::Samples,
            SampleIndexArg::AllocObjects => SampleIndex::AllocObjects,
            SampleIndexArg::AllocSpace => SampleIndex::AllocSpace,
            SampleIndexArg::InuseObjects => SampleIndex::InuseObjects,
            SampleIndexArg::InuseSpace => SampleIndex::InuseSpace,
        }
    }
}

/// Call-graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphArg {
    Png,
    Svg,
    Dot,
}

impl From<GraphArg> for Callgraph {
    fn from(arg: GraphArg) -> Self {
        match arg {
            GraphArg::Png => Callgraph::Png,
            GraphArg::Svg => Callgraph::Svg,
            GraphArg::Dot => Callgraph::Dot,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "benchtree")]
#[command(version)]
#[command(about = "Inspect benchmark trees and rank profile dumps by function cost", long_about = None)]
pub struct Cli {
    /// Enable debug tracing output (to stderr)
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the task tree of a saved benchmark result
    Tree(TreeArgs),
    /// Rank the functions of a raw profile dump
    Top(TopArgs),
}

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Benchmark result JSON file
    #[arg(value_name = "RESULT")]
    pub result: PathBuf,

    /// Also print the attached reports
    #[arg(long = "reports")]
    pub reports: bool,

    /// Re-emit the validated document as tab-indented JSON
    #[arg(long = "json", conflicts_with = "reports")]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TopArgs {
    /// Raw profile dump (uncompressed pprof protobuf)
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,

    /// Report label
    #[arg(long = "label", default_value = "top")]
    pub label: String,

    /// Maximum number of rows (0 for all)
    #[arg(short = 'n', long = "count", default_value = "25")]
    pub count: usize,

    /// Rank by cumulative instead of flat cost
    #[arg(long = "cum")]
    pub cum: bool,

    /// Display unit (derived from the sample type by default)
    #[arg(long = "unit", value_enum)]
    pub unit: Option<UnitArg>,

    /// Sample value to rank by (last sample type by default)
    #[arg(long = "sample-index", value_enum)]
    pub sample_index: Option<SampleIndexArg>,

    /// Keep samples with a frame matching REGEX (repeatable)
    #[arg(long = "focus", value_name = "REGEX")]
    pub focus: Vec<String>,

    /// Drop samples with a frame matching REGEX (repeatable)
    #[arg(long = "ignore", value_name = "REGEX")]
    pub ignore: Vec<String>,

    /// Keep only frames matching REGEX (repeatable)
    #[arg(long = "show", value_name = "REGEX")]
    pub show: Vec<String>,

    /// Remove frames matching REGEX (repeatable, wins over --show)
    #[arg(long = "hide", value_name = "REGEX")]
    pub hide: Vec<String>,

    /// Keep samples with a label matching KEY=REGEX (repeatable)
    #[arg(long = "tag-focus", value_name = "TAG")]
    pub tag_focus: Vec<String>,

    /// Drop samples with a label matching KEY=REGEX (repeatable)
    #[arg(long = "tag-ignore", value_name = "TAG")]
    pub tag_ignore: Vec<String>,

    /// Render a call graph in this format
    #[arg(long = "graph", value_enum)]
    pub graph: Option<GraphArg>,

    /// Node cap of the call graph (0 uses --count)
    #[arg(long = "graph-count", default_value = "80")]
    pub graph_count: usize,

    /// Strip the legend from the call graph
    #[arg(long = "no-legend")]
    pub no_legend: bool,

    /// Write the call graph image to this path
    #[arg(short = 'o', long = "output", value_name = "PATH", requires = "graph")]
    pub output: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long = "json")]
    pub json: bool,
}

impl TopArgs {
    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            unit: self.unit.map(Into::into),
            count: self.count,
            cum_sort: self.cum,
            sample_index: self.sample_index.map(Into::into),
            focus: self.focus.clone(),
            ignore: self.ignore.clone(),
            show: self.show.clone(),
            hide: self.hide.clone(),
            tag_focus: self.tag_focus.clone(),
            tag_ignore: self.tag_ignore.clone(),
            graph: self.graph.map(Into::into).unwrap_or_default(),
            graph_count: self.graph_count,
            no_legend: self.no_legend,
        }
    }
}
