//! Dispatch metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the embedding process installs a recorder;
//! without one every call here is a no-op.

use std::time::Instant;

pub const SAMPLES_SCANNED: &str = "dispatch_samples_scanned_total";
pub const ITEMS_ATTEMPTED: &str = "dispatch_items_attempted_total";
pub const ITEMS_SUCCEEDED: &str = "dispatch_items_succeeded_total";
pub const ITEMS_FAILED: &str = "dispatch_items_failed_total";
pub const CONVERT_DURATION: &str = "dispatch_convert_duration_seconds";

pub fn sample_scanned() {
    ::metrics::counter!(SAMPLES_SCANNED).increment(1);
}

pub fn item_attempted() {
    ::metrics::counter!(ITEMS_ATTEMPTED).increment(1);
}

pub fn item_succeeded() {
    ::metrics::counter!(ITEMS_SUCCEEDED).increment(1);
}

/// `kind` is the failure label, e.g. "invocation" or "execution"
pub fn item_failed(kind: &'static str) {
    ::metrics::counter!(ITEMS_FAILED, "kind" => kind).increment(1);
}

/// A timing guard that records converter wall time when dropped
pub struct ConvertTimer {
    start: Instant,
}

impl ConvertTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Drop for ConvertTimer {
    fn drop(&mut self) {
        ::metrics::histogram!(CONVERT_DURATION).record(self.elapsed_secs());
    }
}
