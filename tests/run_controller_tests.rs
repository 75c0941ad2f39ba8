//! Integration tests for the run controller
//!
//! This binary installs the counting allocator so that heap reports have data.

use benchtree::alloc::CountingAllocator;
use benchtree::json_output::read_json;
use benchtree::{Benchmark, ReportKind, RunConfig, Runner, Task};
use serial_test::serial;
use std::hint::black_box;
use std::io::Write;
use std::sync::Arc;

#[global_allocator]
static ALLOC: CountingAllocator = CountingAllocator;

fn quiet() -> RunConfig {
    RunConfig {
        pin_thread: false,
        ..RunConfig::default()
    }
}

fn two_leaves(t: &mut Task) -> benchtree::TaskResult {
    t.run_sub("big", |leaf| {
        leaf.start();
        let buf = black_box(vec![0u8; 4 << 20]);
        drop(buf);
        Ok(())
    })?;
    t.run_sub("small", |leaf| {
        leaf.start();
        let strings: Vec<String> = (0..64).map(|i| i.to_string()).collect();
        black_box(strings);
        Ok(())
    })?;
    Ok(())
}

#[test]
#[serial]
fn test_heap_reports_rank_leaves() {
    let config = RunConfig {
        heap: true,
        ..quiet()
    };
    let bench = Runner::new(config).run("alloc", two_leaves);

    let labels: Vec<_> = bench.heap.iter().map(|r| r.label.as_str()).collect();
    assert_eq!(labels, ["alloc-space", "alloc-objects"]);
    assert!(bench.pprof.is_empty());

    let space = bench.report("alloc-space").unwrap();
    assert!(space.is_ok(), "{:?}", space.errors);
    assert_eq!(space.rows[0].function, "big");
    assert!(space.rows[0].flat >= 4.0, "{:?}", space.rows[0]);

    let objects = bench.report("alloc-objects").unwrap();
    assert_eq!(objects.rows[0].function, "small");
    assert!(objects.rows[0].flat >= 64.0);

    let big = &bench.task.children[0];
    assert!(big.allocations().bytes >= 4 << 20);
}

#[test]
#[serial]
fn test_result_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.json");
    let config = RunConfig {
        heap: true,
        result: Some(path.clone()),
        ..quiet()
    };
    let bench = Runner::new(config).run("persisted", two_leaves);

    let file = std::fs::File::open(&path).unwrap();
    let decoded: Benchmark = read_json(file).unwrap();
    assert_eq!(decoded, bench);
    assert_eq!(decoded.heap.len(), 2);
}

#[test]
#[serial]
fn test_toml_config_drives_run() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "heap = true\nno_gc = true\nreport_count = 1\npin_thread = false").unwrap();
    let config = RunConfig::load(Some(file.path())).unwrap();

    let bench = Runner::new(config).run("from-toml", two_leaves);
    assert!(bench.heap.iter().all(|r| r.rows.len() <= 1));
    assert!(!benchtree::gc::is_suppressed());
}

#[test]
#[serial]
fn test_processor_sees_root_last() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let processor = move |parent: Option<&Task>, mut child: Task| {
        log.lock()
            .push((parent.map(|p| p.label.clone()), child.label.clone()));
        if parent.is_none() {
            child.label = "renamed".to_string();
        }
        Some(child)
    };

    let bench = Runner::new(quiet())
        .with_processor(Arc::new(processor))
        .run("root", two_leaves);

    assert_eq!(bench.task.label, "renamed");
    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], (Some("root".to_string()), "big".to_string()));
    assert_eq!(seen[2], (None, "root".to_string()));
}

#[test]
#[serial]
fn test_failed_leaf_is_kept_in_result() {
    let bench = Runner::new(quiet()).run("suite", |t| {
        let _ = t.run_sub("fails", |leaf| {
            leaf.start();
            Err(anyhow::anyhow!("unexpected eof"))
        });
        t.run_sub("passes", |leaf| {
            leaf.start();
            Ok(())
        })?;
        Ok(())
    });

    assert!(bench.has_failures());
    assert!(bench.task.error.is_none());
    assert_eq!(bench.task.children.len(), 2);
}

#[test]
#[serial]
fn test_cpu_reports_are_labeled() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("cpu.pb");
    let config = RunConfig {
        pprof: true,
        cpu_profile: Some(dump.clone()),
        ..RunConfig::default()
    };
    let bench = Runner::new(config).run("spin", |t| {
        t.run_sub("spin", |leaf| {
            leaf.start();
            let mut acc = 0u64;
            for i in 0..20_000_000u64 {
                acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
            }
            black_box(acc);
            Ok(())
        })?;
        Ok(())
    });

    let labels: Vec<_> = bench.pprof.iter().map(|r| r.label.as_str()).collect();
    let expected: Vec<_> = ReportKind::ALL.iter().map(|k| k.label()).collect();
    assert_eq!(labels, expected);
    assert!(bench.heap.is_empty());
    if bench.pprof.iter().all(|r| r.is_ok()) {
        assert!(dump.exists());
    }
}

#[inline(never)]
fn spin_user_marker(budget: std::time::Duration) -> u64 {
    let deadline = std::time::Instant::now() + budget;
    let mut acc = 0u64;
    while std::time::Instant::now() < deadline {
        for i in 0..100_000u64 {
            acc = black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    acc
}

#[test]
#[serial]
fn test_cpu_flat_cost_lands_on_user_code() {
    let config = RunConfig {
        pprof: true,
        report_count: 100,
        ..quiet()
    };
    let bench = Runner::new(config).run("spin", |t| {
        t.run_sub("marker", |leaf| {
            leaf.start();
            black_box(spin_user_marker(std::time::Duration::from_millis(300)));
            Ok(())
        })?;
        Ok(())
    });

    let top = bench.report("top").unwrap();
    assert!(top.is_ok(), "{:?}", top.errors);
    assert!(!top.rows.is_empty());
    let first = &top.rows[0].function;
    assert!(
        !first.starts_with("backtrace::") && !first.contains("pprof::"),
        "{:?}",
        top.rows[0]
    );
    let marker = top
        .rows
        .iter()
        .find(|r| r.function.ends_with("spin_user_marker"))
        .unwrap_or_else(|| panic!("marker missing from {:?}", top.rows));
    assert!(marker.flat > 0.0, "{:?}", marker);
}

#[test]
#[serial]
#[should_panic(expected = "benchmark runs must not overlap")]
fn test_nested_run_panics() {
    let runner = Runner::new(quiet());
    runner.run("outer", |_| {
        runner.run("inner", |_| Ok(()));
        Ok(())
    });
}
