//! Sample and frame selection
//!
//! Sample-level filters decide which samples count towards the total:
//! `tag_focus`, `tag_ignore`, `focus` and `ignore`. Frame-level filters then
//! decide which frames of a surviving sample are visible: `hide` removes
//! frames, `show` keeps only matching frames, and `hide` wins when both match.
//!
//! Patterns that fail to compile are reported and match nothing. A narrowing
//! filter (`focus`, `tag_focus`, `show`) whose patterns are all invalid
//! therefore selects nothing instead of silently selecting everything.

use super::options::ReportOptions;
use super::profile::{ResolvedProfile, ResolvedSample};
use regex::Regex;

/// Compiled list of function-name patterns
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    regexes: Vec<Regex>,
    configured: bool,
}

impl PatternSet {
    pub fn compile(kind: &str, patterns: &[String], errors: &mut Vec<String>) -> Self {
        let regexes = patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(err) => {
                    errors.push(format!("invalid {} pattern {:?}: {}", kind, p, err));
                    None
                }
            })
            .collect();
        Self {
            regexes,
            configured: !patterns.is_empty(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regexes.iter().any(|re| re.is_match(text))
    }
}

/// One tag filter: a value pattern, optionally bound to a label key
#[derive(Debug, Clone)]
pub struct TagPattern {
    key: Option<String>,
    value: Regex,
}

impl TagPattern {
    /// Parse `key=regex`, `key:regex`, or a bare regex
    pub fn parse(expr: &str) -> Result<Self, String> {
        let (key, value) = match expr.find(['=', ':']) {
            Some(pos) if pos > 0 && is_label_key(&expr[..pos]) => {
                (Some(expr[..pos].to_string()), &expr[pos + 1..])
            }
            _ => (None, expr),
        };
        let value = Regex::new(value)
            .map_err(|err| format!("invalid tag pattern {:?}: {}", expr, err))?;
        Ok(Self { key, value })
    }

    pub fn matches(&self, key: &str, value: &str) -> bool {
        self.key.as_deref().map_or(true, |k| k == key) && self.value.is_match(value)
    }
}

fn is_label_key(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Compiled list of tag filters
#[derive(Debug, Clone, Default)]
pub struct TagSet {
    patterns: Vec<TagPattern>,
    configured: bool,
}

impl TagSet {
    pub fn compile(exprs: &[String], errors: &mut Vec<String>) -> Self {
        let patterns = exprs
            .iter()
            .filter_map(|e| match TagPattern::parse(e) {
                Ok(p) => Some(p),
                Err(err) => {
                    errors.push(err);
                    None
                }
            })
            .collect();
        Self {
            patterns,
            configured: !exprs.is_empty(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Whether any label of the sample matches any pattern
    pub fn matches(&self, sample: &ResolvedSample) -> bool {
        sample
            .labels
            .iter()
            .any(|(k, v)| self.patterns.iter().any(|p| p.matches(k, v)))
    }
}

/// A surviving sample with its visible frames
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSample {
    /// Function indices, leaf first
    pub stack: Vec<usize>,
    pub value: i64,
}

/// Samples selected for one report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Samples with at least one visible frame
    pub samples: Vec<SelectedSample>,
    /// Sum of the selected value over every surviving sample
    pub total: i64,
}

/// All filters of a report, compiled
#[derive(Debug, Clone, Default)]
pub struct SampleFilter {
    pub focus: PatternSet,
    pub ignore: PatternSet,
    pub show: PatternSet,
    pub hide: PatternSet,
    pub tag_focus: TagSet,
    pub tag_ignore: TagSet,
}

impl SampleFilter {
    /// Compile every filter, appending one error per invalid pattern
    pub fn compile(options: &ReportOptions, errors: &mut Vec<String>) -> Self {
        Self {
            focus: PatternSet::compile("focus", &options.focus, errors),
            ignore: PatternSet::compile("ignore", &options.ignore, errors),
            show: PatternSet::compile("show", &options.show, errors),
            hide: PatternSet::compile("hide", &options.hide, errors),
            tag_focus: TagSet::compile(&options.tag_focus, errors),
            tag_ignore: TagSet::compile(&options.tag_ignore, errors),
        }
    }

    /// Whether a sample survives the sample-level filters
    fn admits(&self, sample: &ResolvedSample, focus_hit: &[bool], ignore_hit: &[bool]) -> bool {
        if self.tag_focus.is_configured() && !self.tag_focus.matches(sample) {
            return false;
        }
        if self.tag_ignore.is_configured() && self.tag_ignore.matches(sample) {
            return false;
        }
        if self.focus.is_configured() && !sample.stack.iter().any(|&f| focus_hit[f]) {
            return false;
        }
        !sample.stack.iter().any(|&f| ignore_hit[f])
    }

    /// Apply all filters to a profile, ranking by value `value_index`
    pub fn select(&self, profile: &ResolvedProfile, value_index: usize) -> Selection {
        let names = &profile.functions;
        let focus_hit: Vec<bool> = names.iter().map(|n| self.focus.matches(n)).collect();
        let ignore_hit: Vec<bool> = names.iter().map(|n| self.ignore.matches(n)).collect();
        let visible: Vec<bool> = names
            .iter()
            .map(|n| !self.hide.matches(n) && (!self.show.is_configured() || self.show.matches(n)))
            .collect();

        let mut selection = Selection::default();
        for sample in &profile.samples {
            let Some(&value) = sample.values.get(value_index) else {
                continue;
            };
            if !self.admits(sample, &focus_hit, &ignore_hit) {
                continue;
            }
            selection.total = selection.total.saturating_add(value);
            let stack: Vec<usize> = sample.stack.iter().copied().filter(|&f| visible[f]).collect();
            if !stack.is_empty() {
                selection.samples.push(SelectedSample { stack, value });
            }
        }
        selection
    }
}
