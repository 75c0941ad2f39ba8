//! Property-based tests over the report engine and the JSON contract
//!
//! Core properties tested:
//! 1. Ranking order and truncation
//! 2. Percent bookkeeping (flat% sums to 100, cum >= flat)
//! 3. Lossless task and row encoding
//! 4. Decoder robustness on arbitrary bytes

use benchtree::json_output::{from_json, to_json};
use benchtree::report::{self, ProfileBuilder, ResolvedProfile};
use benchtree::{ReportOptions, Row, Task, Unit};
use proptest::prelude::*;
use std::time::Duration;

const NAMES: [&str; 6] = ["alpha", "beta", "gamma", "delta", "main", "std::rt"];

fn stack_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(prop::sample::select(NAMES.to_vec()), 1..6)
}

fn samples_strategy() -> impl Strategy<Value = Vec<(Vec<&'static str>, i64)>> {
    prop::collection::vec((stack_strategy(), 1i64..1_000_000), 1..40)
}

fn encode(samples: &[(Vec<&str>, i64)]) -> Vec<u8> {
    let mut b = ProfileBuilder::new(&[("cpu", "nanoseconds")]);
    for (stack, value) in samples {
        b.add_sample(stack, &[*value], &[]);
    }
    b.encode()
}

fn task_strategy() -> impl Strategy<Value = Task> {
    let leaf = ("[a-z.]{1,8}", 0u64..1000, 0u64..u64::from(u32::MAX)).prop_map(|(label, count, ns)| {
        let mut t = Task::new(label);
        t.count = count;
        t.active = Duration::from_nanos(ns);
        t.total = Duration::from_nanos(ns * 2);
        t
    });
    leaf.prop_recursive(3, 24, 4, |inner| {
        ("[a-z]{1,8}", prop::collection::vec(inner, 1..4)).prop_map(|(label, children)| {
            let mut t = Task::new(label);
            t.active = children.iter().map(|c| c.active).sum();
            t.total = t.active + Duration::from_nanos(1);
            t.children = children;
            t
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_flat_percent_sums_to_hundred(samples in samples_strategy()) {
        let report = report::top(&encode(&samples), "p", &ReportOptions::default());
        prop_assert!(report.is_ok());
        let last = report.rows.last().unwrap();
        prop_assert!((last.sum_percent - 100.0).abs() < 1e-6);
        let flat_sum: f64 = report.rows.iter().map(|r| r.flat_percent).sum();
        prop_assert!((flat_sum - 100.0).abs() < 1e-6);
    }

    #[test]
    fn prop_rows_are_ranked_and_bounded(samples in samples_strategy(), count in 0usize..8, cum in any::<bool>()) {
        let options = ReportOptions { cum_sort: cum, ..ReportOptions::default().count(count) };
        let report = report::top(&encode(&samples), "p", &options);
        if count > 0 {
            prop_assert!(report.rows.len() <= count);
        }
        for pair in report.rows.windows(2) {
            let (a, b) = if cum {
                (pair[0].cum, pair[1].cum)
            } else {
                (pair[0].flat, pair[1].flat)
            };
            prop_assert!(a >= b);
            prop_assert!(pair[1].sum_percent >= pair[0].sum_percent);
        }
        for row in &report.rows {
            prop_assert!(row.cum >= row.flat);
            prop_assert!(row.cum_percent <= 100.0 + 1e-9);
        }
    }

    #[test]
    fn prop_hidden_functions_never_appear(samples in samples_strategy()) {
        let options = ReportOptions {
            hide: vec!["^main$".to_string()],
            ..ReportOptions::default()
        };
        let report = report::top(&encode(&samples), "p", &options);
        prop_assert!(report.row("main").is_none());
    }

    #[test]
    fn prop_hide_wins_over_focus_and_show(samples in samples_strategy(), target in prop::sample::select(NAMES.to_vec())) {
        let pattern = format!("^{}$", regex::escape(target));
        let options = ReportOptions {
            focus: vec![pattern.clone()],
            show: vec![pattern.clone(), "^main$".to_string()],
            hide: vec![pattern],
            ..ReportOptions::default()
        };
        let report = report::top(&encode(&samples), "p", &options);
        prop_assert!(report.is_ok());
        prop_assert!(report.row(target).is_none());
        for row in &report.rows {
            prop_assert_eq!(row.function.as_str(), "main");
        }
    }

    #[test]
    fn prop_task_json_round_trip(task in task_strategy()) {
        let text = to_json(&task).unwrap();
        let decoded: Task = from_json(&text).unwrap();
        prop_assert_eq!(decoded, task);
    }

    #[test]
    fn prop_row_values_are_exact(flat in any::<f64>().prop_filter("finite", |v| v.is_finite()), pct in 0.0f64..100.0) {
        let row = Row {
            flat,
            flat_percent: pct,
            cum: flat,
            cum_percent: pct,
            sum_percent: pct,
            function: "f".to_string(),
        };
        let decoded: Row = from_json(&to_json(&row).unwrap()).unwrap();
        prop_assert_eq!(decoded, row);
    }

    #[test]
    fn prop_decoder_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = ResolvedProfile::decode(&bytes);
        let report = report::top(&bytes, "fuzz", &ReportOptions::default().unit(Unit::Millisecond));
        prop_assert_eq!(report.label, "fuzz");
    }
}
