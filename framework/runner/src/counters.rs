//! Names of the counters the runner records into the metrics sink.

pub const ITERATIONS_COMPLETED: &str = "iterations_completed";
pub const ITERATIONS_FAILED: &str = "iterations_failed";
pub const ITERATIONS_INTERRUPTED: &str = "iterations_interrupted";
pub const ITERATIONS_PANICKED: &str = "iterations_panicked";

/// Iterations that were due but never started. Always recorded together with one of the reason
/// counters below.
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
pub const DROPPED_QUEUE_FULL: &str = "dropped_iterations.queue_full";
pub const DROPPED_SATURATED: &str = "dropped_iterations.saturated";
/// Still queued when the load profile ended.
pub const DROPPED_EXPIRED: &str = "dropped_iterations.expired";

pub const AGENT_SETUP_FAILED: &str = "agent_setup_failed";
pub const GRACE_EXPIRED: &str = "graceful_stop_expired";
pub const WORKERS_PEAK_BUSY: &str = "workers_peak_busy";
pub const WORKERS_PEAK_ALLOCATED: &str = "workers_peak_allocated";
