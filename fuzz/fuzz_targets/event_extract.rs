#![no_main]

use libfuzzer_sys::fuzz_target;
use metricpipe_connectors::ExtractionSpec;

fuzz_target!(|data: &[u8]| {
    // Event bodies come straight off the topic, so anything goes.
    let spec = ExtractionSpec::from_json(
        r#"{
            "count": {"pointer": "/data/count", "type": "int"},
            "load": {"pointer": "/data/load", "type": "float"},
            "up": {"pointer": "/up", "type": "bool"},
            "host": {"pointer": "/meta/host~1name", "type": "string"}
        }"#,
    )
    .unwrap();

    if let Ok(row) = spec.extract(data) {
        assert_eq!(row.len(), spec.len());
    }
});
