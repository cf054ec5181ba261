//! Ambient instrumentation (§4.9): a thin layer over the `metrics` crate's
//! counters and gauges. No HTTP exposition here — there's no HTTP surface in
//! a raw wire-protocol proxy to host one from; `proxy-daemon` owns wiring a
//! recorder (or none) for the process.

use metrics::{counter, histogram};
use std::time::Instant;

pub fn record_query(classification: &str, duration_ms: f64, success: bool) {
    let labels = [
        ("classification", classification.to_string()),
        ("status", if success { "ok" } else { "error" }.to_string()),
    ];
    counter!("proxy_queries_total", &labels).increment(1);
    histogram!("proxy_query_duration_ms", &labels).record(duration_ms);
}

pub fn record_cancel() {
    counter!("proxy_cancels_total").increment(1);
}

pub fn record_auth_failure() {
    counter!("proxy_auth_failures_total").increment(1);
}

/// Measures one statement's execution time from construction to [`Self::finish`].
pub struct QueryTimer {
    start: Instant,
    classification: String,
}

impl QueryTimer {
    pub fn start(classification: impl Into<String>) -> Self {
        Self { start: Instant::now(), classification: classification.into() }
    }

    pub fn finish(self, success: bool) {
        let duration_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        record_query(&self.classification, duration_ms, success);
    }
}
