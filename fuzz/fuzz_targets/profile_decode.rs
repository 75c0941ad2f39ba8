#![no_main]

use benchtree::report::{self, Callgraph, ReportOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding and ranking must never panic, only report errors
    let options = ReportOptions::default()
        .count(10)
        .callgraph(Callgraph::Dot, 20, true);
    let _ = report::top(data, "fuzz", &options);
});
