//! Fuzz target: worker sample line parser.
//!
//! Worker stdout is untrusted input to the supervisor. Parsing must never
//! panic, and anything accepted must be a valid percentage pair.
#![no_main]

use libfuzzer_sys::fuzz_target;
use nimbus_core::MetricsSample;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(sample) = MetricsSample::from_line(line) {
        assert!((0.0..=100.0).contains(&sample.cpu_percent));
        assert!((0.0..=100.0).contains(&sample.mem_percent));
        assert!(sample.to_line().is_ok());
    }
});
