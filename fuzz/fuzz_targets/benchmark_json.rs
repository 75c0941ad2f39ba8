#![no_main]

use benchtree::json_output::{from_json, to_json};
use benchtree::Benchmark;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Anything that decodes must re-encode to an equal document
        if let Ok(bench) = from_json::<Benchmark>(text) {
            let again = to_json(&bench).expect("decoded benchmark must encode");
            let reparsed: Benchmark = from_json(&again).expect("encoded benchmark must decode");
            assert_eq!(reparsed, bench);
        }
    }
});
