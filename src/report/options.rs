//! Report configuration and the standard report presets

use super::profile::ResolvedProfile;
use super::{Dimension, Unit};
use crate::phase;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Frames belonging to the language runtime rather than user code
pub const RUNTIME_PATTERN: &str = r"^(std|core|alloc)::|^runtime\.";

/// Default node cap for call-graph renderings
pub const DEFAULT_GRAPH_COUNT: usize = 80;

/// Which sample value a report ranks by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleIndex {
    Cpu,
    Samples,
    AllocObjects,
    AllocSpace,
    InuseObjects,
    InuseSpace,
}

impl SampleIndex {
    /// Sample-type name in the profile
    pub fn type_name(&self) -> &'static str {
        match self {
            SampleIndex::Cpu => "cpu",
            SampleIndex::Samples => "samples",
            SampleIndex::AllocObjects => "alloc_objects",
            SampleIndex::AllocSpace => "alloc_space",
            SampleIndex::InuseObjects => "inuse_objects",
            SampleIndex::InuseSpace => "inuse_space",
        }
    }
}

impl fmt::Display for SampleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl FromStr for SampleIndex {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(SampleIndex::Cpu),
            "samples" => Ok(SampleIndex::Samples),
            "alloc_objects" => Ok(SampleIndex::AllocObjects),
            "alloc_space" => Ok(SampleIndex::AllocSpace),
            "inuse_objects" => Ok(SampleIndex::InuseObjects),
            "inuse_space" => Ok(SampleIndex::InuseSpace),
            other => Err(format!("unknown sample index {:?}", other)),
        }
    }
}

/// Call-graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Callgraph {
    #[default]
    None,
    Png,
    Svg,
    Dot,
}

impl Callgraph {
    /// `dot -T` argument, if the format needs a layout pass
    pub fn layout_format(&self) -> Option<&'static str> {
        match self {
            Callgraph::Png => Some("png"),
            Callgraph::Svg => Some("svg"),
            Callgraph::None | Callgraph::Dot => None,
        }
    }
}

impl FromStr for Callgraph {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "" => Ok(Callgraph::None),
            "png" => Ok(Callgraph::Png),
            "svg" => Ok(Callgraph::Svg),
            "dot" => Ok(Callgraph::Dot),
            other => Err(format!("unknown call graph format {:?}", other)),
        }
    }
}

/// Report engine configuration
///
/// Function filters are regular expressions matched against function names.
/// Tag filters are `key=regex`, `key:regex`, or a bare regex matched against
/// every label value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Display unit; derived from the sample type when unset
    pub unit: Option<Unit>,
    /// Maximum number of rows, 0 for unlimited
    pub count: usize,
    pub cum_sort: bool,
    /// Ranked sample value; the profile's default (or last) type when unset
    pub sample_index: Option<SampleIndex>,
    /// Keep samples with at least one matching frame
    pub focus: Vec<String>,
    /// Drop samples with at least one matching frame
    pub ignore: Vec<String>,
    /// Keep only matching frames
    pub show: Vec<String>,
    /// Remove matching frames; wins over `show`
    pub hide: Vec<String>,
    pub tag_focus: Vec<String>,
    pub tag_ignore: Vec<String>,
    pub graph: Callgraph,
    /// Call-graph node cap, falls back to `count` when 0
    pub graph_count: usize,
    pub no_legend: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            unit: None,
            count: 0,
            cum_sort: false,
            sample_index: None,
            focus: Vec::new(),
            ignore: Vec::new(),
            show: Vec::new(),
            hide: Vec::new(),
            tag_focus: Vec::new(),
            tag_ignore: Vec::new(),
            graph: Callgraph::None,
            graph_count: DEFAULT_GRAPH_COUNT,
            no_legend: false,
        }
    }
}

impl ReportOptions {
    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn sample_index(mut self, index: SampleIndex) -> Self {
        self.sample_index = Some(index);
        self
    }

    pub fn callgraph(mut self, graph: Callgraph, graph_count: usize, no_legend: bool) -> Self {
        self.graph = graph;
        self.graph_count = graph_count;
        self.no_legend = no_legend;
        self
    }

    /// Restrict to samples taken inside measuring windows
    pub fn tagged(mut self) -> Self {
        self.tag_focus = vec![phase::ACTIVE_TAG_FILTER.to_string()];
        self
    }

    /// Position of the ranked value within each sample
    pub fn resolve_sample_index(&self, profile: &ResolvedProfile) -> Result<usize, String> {
        if profile.sample_types.is_empty() {
            return Err("profile has no sample types".to_string());
        }
        match self.sample_index {
            Some(index) => profile.sample_type_index(index.type_name()).ok_or_else(|| {
                let available: Vec<_> =
                    profile.sample_types.iter().map(|st| st.name.as_str()).collect();
                format!(
                    "sample index {} not found in profile (available: {})",
                    index,
                    available.join(", ")
                )
            }),
            None => Ok(profile
                .default_sample_type
                .as_deref()
                .and_then(|name| profile.sample_type_index(name))
                .unwrap_or(profile.sample_types.len() - 1)),
        }
    }
}

/// Unit used when a report does not request one
pub fn default_unit(dimension: Dimension) -> Unit {
    match dimension {
        Dimension::Time => Unit::Second,
        Dimension::Space => Unit::Megabyte,
        Dimension::Count => Unit::None,
    }
}

/// Standard CPU report presets attached to every profiled run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Measured samples, ranked by flat cost
    Top,
    /// Measured samples, ranked by cumulative cost
    TopCum,
    /// All samples, ranked by flat cost
    TopAll,
    /// All samples, ranked by cumulative cost
    TopAllCum,
    /// Measured samples, runtime frames only
    TopRuntime,
    /// Measured samples, runtime frames hidden
    TopNoRuntime,
}

impl ReportKind {
    pub const ALL: [ReportKind; 6] = [
        ReportKind::Top,
        ReportKind::TopCum,
        ReportKind::TopAll,
        ReportKind::TopAllCum,
        ReportKind::TopRuntime,
        ReportKind::TopNoRuntime,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Top => "top",
            ReportKind::TopCum => "top-cum",
            ReportKind::TopAll => "top-all",
            ReportKind::TopAllCum => "top-all-cum",
            ReportKind::TopRuntime => "top-rt",
            ReportKind::TopNoRuntime => "top-nort",
        }
    }

    fn is_tagged(&self) -> bool {
        !matches!(self, ReportKind::TopAll | ReportKind::TopAllCum)
    }

    fn sorts_by_cum(&self) -> bool {
        matches!(self, ReportKind::TopCum | ReportKind::TopAllCum)
    }

    /// Report options for this preset, in milliseconds
    pub fn options(&self, count: usize) -> ReportOptions {
        let mut options = ReportOptions::default()
            .count(count)
            .unit(Unit::Millisecond)
            .sample_index(SampleIndex::Cpu);
        options.cum_sort = self.sorts_by_cum();
        if self.is_tagged() {
            options = options.tagged();
        }
        match self {
            ReportKind::TopRuntime => options.show = vec![RUNTIME_PATTERN.to_string()],
            ReportKind::TopNoRuntime => options.hide = vec![RUNTIME_PATTERN.to_string()],
            _ => {}
        }
        options
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::profile::ProfileBuilder;

    fn profile(types: &[(&str, &str)]) -> ResolvedProfile {
        ResolvedProfile::decode(&ProfileBuilder::new(types).encode()).unwrap()
    }

    #[test]
    fn test_default_index_is_last_sample_type() {
        let p = profile(&[("samples", "count"), ("cpu", "nanoseconds")]);
        assert_eq!(ReportOptions::default().resolve_sample_index(&p), Ok(1));
    }

    #[test]
    fn test_explicit_index_by_name() {
        let p = profile(&[("samples", "count"), ("cpu", "nanoseconds")]);
        let opts = ReportOptions::default().sample_index(SampleIndex::Samples);
        assert_eq!(opts.resolve_sample_index(&p), Ok(0));
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let p = profile(&[("samples", "count"), ("cpu", "nanoseconds")]);
        let opts = ReportOptions::default().sample_index(SampleIndex::InuseSpace);
        let err = opts.resolve_sample_index(&p).unwrap_err();
        assert!(err.contains("inuse_space"));
        assert!(err.contains("samples, cpu"));
    }

    #[test]
    fn test_presets() {
        let labels: Vec<_> = ReportKind::ALL.iter().map(|k| k.label()).collect();
        assert_eq!(
            labels,
            ["top", "top-cum", "top-all", "top-all-cum", "top-rt", "top-nort"]
        );

        let top = ReportKind::Top.options(25);
        assert_eq!(top.count, 25);
        assert_eq!(top.unit, Some(Unit::Millisecond));
        assert_eq!(top.tag_focus, ["t=active"]);
        assert!(!top.cum_sort);

        let all_cum = ReportKind::TopAllCum.options(25);
        assert!(all_cum.cum_sort);
        assert!(all_cum.tag_focus.is_empty());

        assert_eq!(ReportKind::TopRuntime.options(5).show, [RUNTIME_PATTERN]);
        assert_eq!(ReportKind::TopNoRuntime.options(5).hide, [RUNTIME_PATTERN]);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("alloc_space".parse::<SampleIndex>(), Ok(SampleIndex::AllocSpace));
        assert_eq!("svg".parse::<Callgraph>(), Ok(Callgraph::Svg));
        assert!("jpeg".parse::<Callgraph>().is_err());
        assert_eq!(Callgraph::Png.layout_format(), Some("png"));
        assert_eq!(Callgraph::Dot.layout_format(), None);
    }
}
