//! Flat and cumulative cost aggregation

use super::filter::Selection;
use super::profile::ResolvedProfile;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Cost attributed to one function
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cost {
    /// Samples whose leaf is the function
    pub flat: i64,
    /// Samples whose stack contains the function, once per sample
    pub cum: i64,
}

/// A ranked table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranked {
    pub function: usize,
    pub flat: i64,
    pub cum: i64,
}

/// Per-function costs over a selection
#[derive(Debug, Clone, Default)]
pub struct CostTable {
    costs: HashMap<usize, Cost>,
}

impl CostTable {
    pub fn build(selection: &Selection) -> Self {
        let mut costs: HashMap<usize, Cost> = HashMap::new();
        let mut seen = HashSet::new();
        for sample in &selection.samples {
            if let Some(&leaf) = sample.stack.first() {
                let cost = costs.entry(leaf).or_default();
                cost.flat = cost.flat.saturating_add(sample.value);
            }
            seen.clear();
            for &function in &sample.stack {
                if seen.insert(function) {
                    let cost = costs.entry(function).or_default();
                    cost.cum = cost.cum.saturating_add(sample.value);
                }
            }
        }
        Self { costs }
    }

    pub fn get(&self, function: usize) -> Cost {
        self.costs.get(&function).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.costs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Rank functions and keep at most `count` (0 keeps all)
    ///
    /// Descending by the sort key, then by the other key, then by name
    /// ascending. Functions with no cost at all are dropped.
    pub fn rank(&self, profile: &ResolvedProfile, cum_sort: bool, count: usize) -> Vec<Ranked> {
        let mut ranked: Vec<Ranked> = self
            .costs
            .iter()
            .filter(|(_, cost)| cost.flat != 0 || cost.cum != 0)
            .map(|(&function, cost)| Ranked {
                function,
                flat: cost.flat,
                cum: cost.cum,
            })
            .collect();

        ranked.sort_by(|a, b| {
            let (ka, kb, oa, ob) = if cum_sort {
                (a.cum, b.cum, a.flat, b.flat)
            } else {
                (a.flat, b.flat, a.cum, b.cum)
            };
            kb.cmp(&ka)
                .then(ob.cmp(&oa))
                .then_with(|| compare_names(profile, a.function, b.function))
        });

        if count > 0 {
            ranked.truncate(count);
        }
        ranked
    }
}

fn compare_names(profile: &ResolvedProfile, a: usize, b: usize) -> Ordering {
    profile.function_name(a).cmp(profile.function_name(b))
}
