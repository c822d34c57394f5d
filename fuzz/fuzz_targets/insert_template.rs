#![no_main]

use libfuzzer_sys::fuzz_target;
use metricpipe_connectors::InsertTemplate;

fuzz_target!(|data: &[u8]| {
    let statement = String::from_utf8_lossy(data);

    if let Ok(template) = InsertTemplate::parse(&statement) {
        // Every placeholder must have been rewritten to a position.
        for i in 1..=template.parameters().len() {
            assert!(template.sql().contains(&format!("${}", i)));
        }
    }
});
