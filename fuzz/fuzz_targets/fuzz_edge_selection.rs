//! Fuzz target: location hint to edge mapping.
//!
//! Any `i64` hint, including the extremes, must map to a configured edge,
//! and hints one full cycle apart must map to the same edge.
#![no_main]

use libfuzzer_sys::fuzz_target;
use nimbus_storage::EdgeCache;

fuzz_target!(|hint: i64| {
    let cache = EdgeCache::new("unused");
    let edge = cache.select_edge(hint);
    assert!(cache.edges().iter().any(|e| e == edge));

    let cycle = i64::try_from(cache.edges().len()).unwrap_or(i64::MAX);
    if let Some(next) = hint.checked_add(cycle) {
        assert_eq!(edge, cache.select_edge(next));
    }
});
