// Lock metrics
// Counters and histograms recorded by the distributed mutex

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Initialize lock metric descriptions
/// Should be called once at application startup
pub fn describe_lock_metrics() {
    describe_counter!("lock_acquired_total", "Total number of lock acquisitions");
    describe_counter!(
        "lock_acquire_timeouts_total",
        "Total number of acquisitions that timed out"
    );
    describe_counter!("lock_released_total", "Total number of lock releases");
    describe_counter!(
        "lock_session_lost_total",
        "Total number of acquisitions aborted by session loss"
    );
    describe_histogram!(
        "lock_wait_seconds",
        "Time spent waiting for a lock in seconds"
    );
}

pub fn record_acquired(path: &str, waited: Duration) {
    counter!("lock_acquired_total", "path" => path.to_string()).increment(1);
    histogram!("lock_wait_seconds", "path" => path.to_string()).record(waited.as_secs_f64());
}

pub fn record_timeout(path: &str) {
    counter!("lock_acquire_timeouts_total", "path" => path.to_string()).increment(1);
}

pub fn record_released(path: &str) {
    counter!("lock_released_total", "path" => path.to_string()).increment(1);
}

pub fn record_session_lost(path: &str) {
    counter!("lock_session_lost_total", "path" => path.to_string()).increment(1);
}
