#![no_main]

use libfuzzer_sys::fuzz_target;
use metricpipe_connectors::ExtractionSpec;

fuzz_target!(|data: &[u8]| {
    // Arbitrary JSON_POINTER_EXTRACTORS values: duplicate keys, unknown
    // types, bad pointers and non-identifier names must be errors, never panics.
    let json = String::from_utf8_lossy(data);
    let _ = ExtractionSpec::from_json(&json);
});
