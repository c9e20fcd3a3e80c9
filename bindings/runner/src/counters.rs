//! Names of the counters recorded by journey scenarios.

pub const JOURNEYS_COMPLETED: &str = "journeys_completed";
pub const JOURNEYS_ABORTED: &str = "journeys_aborted";

/// Per-step abort counter, `journeys_aborted.<step>`.
pub fn journey_aborted_at(step: &str) -> String {
    format!("{JOURNEYS_ABORTED}.{step}")
}
