use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use inventory_client_instrumented::prelude::{CallError, InventoryState};
use race_tunnel_runner::prelude::{
    deserialize_optional_duration, MetricsSnapshot, Outcome, OutcomeCounts, Verdict,
};
use serde::Deserialize;

use crate::counters::{JOURNEYS_ABORTED, JOURNEYS_COMPLETED};

/// Why an inventory snapshot is missing.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to fetch inventory snapshot: {0}")]
    Fetch(#[source] CallError),
    #[error("inventory snapshot could not be parsed: {0}")]
    Parse(#[source] CallError),
    #[error("inventory snapshot unavailable: {0}")]
    Unavailable(String),
}

impl From<CallError> for SnapshotError {
    fn from(value: CallError) -> Self {
        match value {
            CallError::Parse { .. } => SnapshotError::Parse(value),
            other => SnapshotError::Fetch(other),
        }
    }
}

/// Pass/fail thresholds, read from the `[thresholds]` configuration section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Upper bound on reserved units. Defaults to the total quantity in the opening snapshot.
    pub initial_capacity: Option<i64>,
    /// Reserved units before the run. Replaces the opening snapshot in the delta analysis, so the
    /// delta can be computed when the opening snapshot was taken elsewhere or not at all.
    pub initial_reserved: Option<i64>,
    pub discrepancy_minor: u64,
    pub discrepancy_anomaly: u64,
    pub server_error_rate_pass: f64,
    pub server_error_rate_marginal: f64,
    pub min_success_rate: f64,
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub max_p95_latency: Option<Duration>,
    pub min_journey_success_rate: f64,
    /// The run fails unless more than this many judged calls succeeded.
    pub successes_over: Option<u64>,
    /// The run fails unless fewer than this many judged calls conflicted.
    pub conflicts_under: Option<u64>,
    /// The run fails unless fewer than this many judged calls hit a server error.
    pub server_errors_under: Option<u64>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            initial_capacity: None,
            initial_reserved: None,
            discrepancy_minor: 50,
            discrepancy_anomaly: 500,
            server_error_rate_pass: 0.01,
            server_error_rate_marginal: 0.05,
            min_success_rate: 0.5,
            max_p95_latency: Some(Duration::from_secs(2)),
            min_journey_success_rate: 0.9,
            successes_over: None,
            conflicts_under: None,
            server_errors_under: None,
        }
    }
}

/// How a run's evidence is judged.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    pub thresholds: Thresholds,
    /// Units reserved by one successful reserve call.
    pub units_per_success: i64,
    /// Operation whose outcomes are judged by the error tier and counted as successes for the
    /// delta analysis. All calls are judged when unset.
    pub operation: Option<String>,
    /// Whether the journey tier applies.
    pub journeys: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    Pass(String),
    Fail(String),
    Indeterminate(String),
}

impl CheckResult {
    pub fn verdict(&self) -> Verdict {
        match self {
            CheckResult::Pass(_) => Verdict::Pass,
            CheckResult::Fail(_) => Verdict::Fail,
            CheckResult::Indeterminate(_) => Verdict::Indeterminate,
        }
    }

    fn detail(&self) -> &str {
        match self {
            CheckResult::Pass(detail)
            | CheckResult::Fail(detail)
            | CheckResult::Indeterminate(detail) => detail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiscrepancyLevel {
    Perfect,
    Minor,
    Elevated,
    Anomaly,
}

impl DiscrepancyLevel {
    pub fn classify(discrepancy: u64, thresholds: &Thresholds) -> Self {
        if discrepancy == 0 {
            DiscrepancyLevel::Perfect
        } else if discrepancy < thresholds.discrepancy_minor {
            DiscrepancyLevel::Minor
        } else if discrepancy < thresholds.discrepancy_anomaly {
            DiscrepancyLevel::Elevated
        } else {
            DiscrepancyLevel::Anomaly
        }
    }

    fn describe(self) -> &'static str {
        match self {
            DiscrepancyLevel::Perfect => "PERFECT, client count matches the server delta exactly",
            DiscrepancyLevel::Minor => "MINOR, likely timed out calls that still reserved",
            DiscrepancyLevel::Elevated => {
                "ELEVATED, acceptable with background activity or timeouts"
            }
            DiscrepancyLevel::Anomaly => "ANOMALY, large discrepancy requires investigation",
        }
    }
}

/// Client-observed reservations compared with the server-side change in reserved units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaAnalysis {
    pub initial_reserved: i64,
    pub final_reserved: i64,
    pub net_change: i64,
    pub client_successes: u64,
    pub client_units: i64,
    pub discrepancy: u64,
    pub level: DiscrepancyLevel,
}

impl DeltaAnalysis {
    /// Fails only when the change in reserved units does not fit in an `i64`.
    pub fn compute(
        initial_reserved: i64,
        after: &InventoryState,
        client_successes: u64,
        units_per_success: i64,
        thresholds: &Thresholds,
    ) -> Result<Self, String> {
        let net_change = after
            .reserved_quantity
            .checked_sub(initial_reserved)
            .ok_or_else(|| {
                format!(
                    "change from {initial_reserved} to {} reserved is out of range",
                    after.reserved_quantity
                )
            })?;
        let client_units = i64::try_from(client_successes)
            .unwrap_or(i64::MAX)
            .saturating_mul(units_per_success);
        let discrepancy = client_units.abs_diff(net_change);

        Ok(Self {
            initial_reserved,
            final_reserved: after.reserved_quantity,
            net_change,
            client_successes,
            client_units,
            discrepancy,
            level: DiscrepancyLevel::classify(discrepancy, thresholds),
        })
    }
}

/// Invariant checks over the two inventory snapshots.
#[derive(Debug, Clone)]
pub struct InventoryVerification {
    pub before: Result<InventoryState, String>,
    pub after: Result<InventoryState, String>,
    pub capacity: Option<i64>,
    pub conservation: CheckResult,
    pub non_negativity: CheckResult,
    pub over_allocation: CheckResult,
    pub delta: Result<DeltaAnalysis, String>,
}

impl InventoryVerification {
    pub fn evaluate(
        before: &Result<InventoryState, SnapshotError>,
        after: &Result<InventoryState, SnapshotError>,
        client_successes: u64,
        policy: &VerificationPolicy,
    ) -> Self {
        let before = before.as_ref().cloned().map_err(|e| e.to_string());
        let after = after.as_ref().cloned().map_err(|e| e.to_string());

        let capacity = policy
            .thresholds
            .initial_capacity
            .or_else(|| before.as_ref().ok().map(|state| state.total_quantity));

        let (conservation, non_negativity, over_allocation) = match &after {
            Ok(after) => (
                check_conservation(after),
                check_non_negativity(after),
                check_over_allocation(after, capacity),
            ),
            Err(e) => {
                let missing = CheckResult::Indeterminate(format!("no closing snapshot: {e}"));
                (missing.clone(), missing.clone(), missing)
            }
        };

        let initial_reserved = policy
            .thresholds
            .initial_reserved
            .or_else(|| before.as_ref().ok().map(|state| state.reserved_quantity));

        let delta = match (initial_reserved, &after) {
            (Some(initial_reserved), Ok(after)) => DeltaAnalysis::compute(
                initial_reserved,
                after,
                client_successes,
                policy.units_per_success,
                &policy.thresholds,
            ),
            (None, _) => Err("no opening snapshot and no initial_reserved configured".to_string()),
            (Some(_), Err(_)) => Err("no closing snapshot".to_string()),
        };

        Self {
            before,
            after,
            capacity,
            conservation,
            non_negativity,
            over_allocation,
            delta,
        }
    }

    /// Worst of the three invariants. The delta analysis is advisory and never counts.
    pub fn verdict(&self) -> Verdict {
        self.conservation
            .verdict()
            .worst(self.non_negativity.verdict())
            .worst(self.over_allocation.verdict())
    }
}

fn check_conservation(after: &InventoryState) -> CheckResult {
    let formula = format!(
        "{} = {} - {}",
        after.available_quantity, after.total_quantity, after.reserved_quantity
    );
    let Some(expected) = after.total_quantity.checked_sub(after.reserved_quantity) else {
        return CheckResult::Indeterminate(format!("{formula} is out of range"));
    };
    if after.available_quantity == expected {
        CheckResult::Pass(formula)
    } else {
        CheckResult::Fail(format!(
            "{formula} does not hold, expected {expected} available, got {} (off by {})",
            after.available_quantity,
            after.available_quantity.abs_diff(expected)
        ))
    }
}

fn check_non_negativity(after: &InventoryState) -> CheckResult {
    let negative = [
        ("total", after.total_quantity),
        ("reserved", after.reserved_quantity),
        ("available", after.available_quantity),
    ]
    .into_iter()
    .filter(|(_, value)| *value < 0)
    .map(|(name, value)| format!("{name} = {value}"))
    .collect::<Vec<_>>();

    if negative.is_empty() {
        CheckResult::Pass("all quantities are non-negative".to_string())
    } else {
        CheckResult::Fail(format!("negative quantities: {}", negative.join(", ")))
    }
}

fn check_over_allocation(after: &InventoryState, capacity: Option<i64>) -> CheckResult {
    let Some(capacity) = capacity else {
        return CheckResult::Indeterminate(
            "no capacity configured and no opening snapshot to take it from".to_string(),
        );
    };

    if after.reserved_quantity <= capacity {
        CheckResult::Pass(format!(
            "reserved {} within capacity {capacity}",
            after.reserved_quantity
        ))
    } else {
        CheckResult::Fail(format!(
            "reserved {} exceeds capacity {capacity} by {}",
            after.reserved_quantity,
            after.reserved_quantity.abs_diff(capacity)
        ))
    }
}

/// Journey completion counts and their tier.
#[derive(Debug, Clone, PartialEq)]
pub struct JourneyAssessment {
    pub completed: u64,
    pub aborted: u64,
    pub success_rate: f64,
    pub verdict: Verdict,
}

/// Error, latency and journey tiers computed from the sealed metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadAssessment {
    pub operation: Option<String>,
    pub requests: u64,
    pub successes: u64,
    pub conflicts: u64,
    pub client_errors: u64,
    pub server_errors: u64,
    pub timeouts: u64,
    pub success_rate: f64,
    pub server_error_rate: f64,
    pub p95_ms: f64,
    pub sealed: bool,
    pub error_tier: Verdict,
    pub latency_tier: Verdict,
    pub count_tier: Verdict,
    /// One line per count threshold the run did not meet.
    pub count_breaches: Vec<String>,
    pub journeys: Option<JourneyAssessment>,
}

impl LoadAssessment {
    pub fn evaluate(metrics: &MetricsSnapshot, policy: &VerificationPolicy) -> Self {
        let thresholds = &policy.thresholds;
        let (outcomes, latency) = match &policy.operation {
            Some(operation) => metrics
                .operation(operation)
                .map(|snapshot| (snapshot.outcomes, snapshot.latency))
                .unwrap_or_default(),
            None => (metrics.outcomes, metrics.latency),
        };

        let requests = outcomes.total();
        let success_rate = outcomes.rate(Outcome::Success);
        let server_error_rate = outcomes.rate(Outcome::ServerError);

        let error_tier = if requests == 0 {
            Verdict::Indeterminate
        } else if server_error_rate < thresholds.server_error_rate_pass
            && success_rate > thresholds.min_success_rate
        {
            Verdict::Pass
        } else if server_error_rate < thresholds.server_error_rate_marginal {
            Verdict::Marginal
        } else {
            Verdict::Fail
        };

        let latency_tier = match thresholds.max_p95_latency {
            Some(limit) if latency.count > 0 && latency.p95_ms > limit.as_secs_f64() * 1000.0 => {
                Verdict::Marginal
            }
            _ => Verdict::Pass,
        };

        let count_breaches = count_breaches(&outcomes, thresholds);
        let count_tier = if count_breaches.is_empty() {
            Verdict::Pass
        } else if requests == 0 {
            Verdict::Indeterminate
        } else {
            Verdict::Fail
        };

        let journeys = policy.journeys.then(|| {
            let completed = metrics.counter(JOURNEYS_COMPLETED);
            let aborted = metrics.counter(JOURNEYS_ABORTED);
            let total = completed + aborted;
            let success_rate = match total {
                0 => 0.0,
                total => completed as f64 / total as f64,
            };
            let verdict = if total == 0 {
                Verdict::Indeterminate
            } else if success_rate >= thresholds.min_journey_success_rate {
                Verdict::Pass
            } else {
                Verdict::Fail
            };

            JourneyAssessment {
                completed,
                aborted,
                success_rate,
                verdict,
            }
        });

        Self {
            operation: policy.operation.clone(),
            requests,
            successes: outcomes.get(Outcome::Success),
            conflicts: outcomes.get(Outcome::Conflict),
            client_errors: outcomes.get(Outcome::ClientError),
            server_errors: outcomes.get(Outcome::ServerError),
            timeouts: outcomes.get(Outcome::Timeout),
            success_rate,
            server_error_rate,
            p95_ms: latency.p95_ms,
            sealed: metrics.sealed,
            error_tier,
            latency_tier,
            count_tier,
            count_breaches,
            journeys,
        }
    }

    pub fn verdict(&self) -> Verdict {
        let verdict = self
            .error_tier
            .worst(self.latency_tier)
            .worst(self.count_tier);
        match &self.journeys {
            Some(journeys) => verdict.worst(journeys.verdict),
            None => verdict,
        }
    }
}

fn count_breaches(outcomes: &OutcomeCounts, thresholds: &Thresholds) -> Vec<String> {
    let successes = outcomes.get(Outcome::Success);
    let conflicts = outcomes.get(Outcome::Conflict);
    let server_errors = outcomes.get(Outcome::ServerError);

    let mut breaches = Vec::new();
    if let Some(limit) = thresholds.successes_over {
        if successes <= limit {
            breaches.push(format!("{successes} successes, needed more than {limit}"));
        }
    }
    if let Some(limit) = thresholds.conflicts_under {
        if conflicts >= limit {
            breaches.push(format!("{conflicts} conflicts, needed fewer than {limit}"));
        }
    }
    if let Some(limit) = thresholds.server_errors_under {
        if server_errors >= limit {
            breaches.push(format!("{server_errors} server errors, needed fewer than {limit}"));
        }
    }
    breaches
}

/// Everything the run is judged on, and the resulting verdict.
///
/// The [Display] output is the console report. Its section headers and labels are fixed so that
/// reports from different runs can be diffed.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub run_id: String,
    pub load: LoadAssessment,
    pub inventory: Option<InventoryVerification>,
    pub verdict: Verdict,
}

impl VerificationReport {
    /// Judge a run. Pure, so it can be evaluated again on the same evidence with the same result.
    pub fn evaluate(
        run_id: impl Into<String>,
        snapshots: Option<(
            &Result<InventoryState, SnapshotError>,
            &Result<InventoryState, SnapshotError>,
        )>,
        metrics: &MetricsSnapshot,
        policy: &VerificationPolicy,
    ) -> Self {
        let load = LoadAssessment::evaluate(metrics, policy);
        let inventory = snapshots.map(|(before, after)| {
            InventoryVerification::evaluate(before, after, load.successes, policy)
        });

        let verdict = match &inventory {
            Some(inventory) => load.verdict().worst(inventory.verdict()),
            None => load.verdict(),
        };

        Self {
            run_id: run_id.into(),
            load,
            inventory,
            verdict,
        }
    }

    /// One line per finding that needs a human to look at it, with a likely cause.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines = Vec::new();

        if let Some(inventory) = &self.inventory {
            if let CheckResult::Fail(detail) = &inventory.conservation {
                lines.push(format!(
                    "Conservation violated: {detail}. Reserved and available were not updated together."
                ));
            }
            if let CheckResult::Fail(detail) = &inventory.over_allocation {
                lines.push(format!(
                    "Over-allocation: {detail}. The lock did not cover the check and the reserve."
                ));
            }
            if let CheckResult::Fail(detail) = &inventory.non_negativity {
                lines.push(format!(
                    "Non-negativity violated: {detail}. Stock was handed out after it ran out."
                ));
            }
            if let Ok(delta) = &inventory.delta {
                if delta.level == DiscrepancyLevel::Anomaly {
                    lines.push(format!(
                        "Discrepancy of {} units between client successes and the server delta. \
                         Possible causes: concurrent order confirmations, payment timeouts \
                         releasing reservations, or timed out calls that still reserved.",
                        delta.discrepancy
                    ));
                }
            }
        }

        if self.load.server_errors > 0 {
            lines.push(format!(
                "{} server errors ({:.2}% of calls).",
                self.load.server_errors,
                self.load.server_error_rate * 100.0
            ));
        }
        for breach in &self.load.count_breaches {
            lines.push(format!("Count threshold missed: {breach}."));
        }
        if self.load.latency_tier != Verdict::Pass {
            lines.push(format!(
                "p95 latency of {:.2} ms is above the limit.",
                self.load.p95_ms
            ));
        }
        if !self.load.sealed {
            lines.push("Metrics were not sealed, counts may be incomplete.".to_string());
        }

        lines
    }
}

const RULE: &str = "=====================================================";
const THIN_RULE: &str = "-----------------------------------------------------";

fn percent(part: u64, total: u64) -> f64 {
    match total {
        0 => 0.0,
        total => part as f64 / total as f64 * 100.0,
    }
}

fn write_state(
    f: &mut Formatter<'_>,
    title: &str,
    reserved_label: &str,
    state: &Result<InventoryState, String>,
) -> fmt::Result {
    writeln!(f, "   {title}")?;
    writeln!(f, "{THIN_RULE}")?;
    match state {
        Ok(state) => {
            writeln!(f, "SKU:                   {}", state.sku)?;
            writeln!(f, "Total Quantity:        {}", state.total_quantity)?;
            writeln!(f, "{reserved_label:<23}{}", state.reserved_quantity)?;
            writeln!(f, "Available:             {}", state.available_quantity)?;
        }
        Err(e) => writeln!(f, "Unavailable:           {e}")?,
    }
    writeln!(f, "{THIN_RULE}")
}

fn write_check(f: &mut Formatter<'_>, name: &str, check: &CheckResult) -> fmt::Result {
    writeln!(f, "[{}] {name}: {}", check.verdict(), check.detail())
}

impl Display for VerificationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let load = &self.load;

        writeln!(f, "{RULE}")?;
        writeln!(f, "   RUN RESULTS ({})", self.run_id)?;
        writeln!(f, "{RULE}")?;
        if let Some(operation) = &load.operation {
            writeln!(f, "Operation:             {operation}")?;
        }
        writeln!(f, "Total Requests:        {}", load.requests)?;
        for (label, count) in [
            ("Successful:", load.successes),
            ("Conflicts:", load.conflicts),
            ("Client Errors:", load.client_errors),
            ("Server Errors:", load.server_errors),
            ("Timeouts:", load.timeouts),
        ] {
            writeln!(
                f,
                "{label:<23}{count} ({:.2}%)",
                percent(count, load.requests)
            )?;
        }
        writeln!(f, "Latency p95:           {:.2} ms", load.p95_ms)?;
        writeln!(f, "{THIN_RULE}")?;

        if let Some(inventory) = &self.inventory {
            write_state(f, "INITIAL STATE (BEFORE)", "Reserved (BEFORE):", &inventory.before)?;
            write_state(f, "FINAL STATE (AFTER)", "Reserved (AFTER):", &inventory.after)?;

            writeln!(f, "   DELTA ANALYSIS")?;
            writeln!(f, "{THIN_RULE}")?;
            match &inventory.delta {
                Ok(delta) => {
                    writeln!(f, "Initial Reserved:      {}", delta.initial_reserved)?;
                    writeln!(f, "Final Reserved:        {}", delta.final_reserved)?;
                    writeln!(f, "Net Change:            {:+}", delta.net_change)?;
                    writeln!(f, "Client Successes:      {}", delta.client_successes)?;
                    writeln!(f, "Client Units:          {}", delta.client_units)?;
                    writeln!(f, "Discrepancy:           {}", delta.discrepancy)?;
                    writeln!(f, "Level:                 {}", delta.level.describe())?;
                }
                Err(reason) => writeln!(f, "Unavailable:           {reason}")?,
            }
            writeln!(f, "{THIN_RULE}")?;

            writeln!(f, "   INVARIANTS")?;
            writeln!(f, "{THIN_RULE}")?;
            match inventory.capacity {
                Some(capacity) => writeln!(f, "Capacity:              {capacity}")?,
                None => writeln!(f, "Capacity:              unknown")?,
            }
            write_check(f, "Conservation", &inventory.conservation)?;
            write_check(f, "Non-negativity", &inventory.non_negativity)?;
            write_check(f, "Over-allocation", &inventory.over_allocation)?;
            writeln!(f, "{THIN_RULE}")?;
        }

        if let Some(journeys) = &load.journeys {
            writeln!(f, "   JOURNEYS")?;
            writeln!(f, "{THIN_RULE}")?;
            writeln!(f, "Successful Journeys:   {}", journeys.completed)?;
            writeln!(f, "Failed Journeys:       {}", journeys.aborted)?;
            writeln!(
                f,
                "Success Rate:          {:.2}%",
                journeys.success_rate * 100.0
            )?;
            writeln!(f, "Journey Tier:          {}", journeys.verdict)?;
            writeln!(f, "{THIN_RULE}")?;
        }

        writeln!(f, "Error Tier:            {}", load.error_tier)?;
        writeln!(f, "Latency Tier:          {}", load.latency_tier)?;
        writeln!(f, "Count Tier:            {}", load.count_tier)?;
        if let Some(inventory) = &self.inventory {
            writeln!(f, "Invariant Verdict:     {}", inventory.verdict())?;
        }

        let diagnostics = self.diagnostics();
        if !diagnostics.is_empty() {
            writeln!(f, "{THIN_RULE}")?;
            for line in diagnostics {
                writeln!(f, "! {line}")?;
            }
        }

        writeln!(f, "{RULE}")?;
        writeln!(f, "VERDICT: {}", self.verdict)?;
        writeln!(f, "{RULE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use race_tunnel_runner::prelude::ReportConfig;

    fn state(total: i64, reserved: i64, available: i64) -> InventoryState {
        InventoryState {
            sku: "test".to_string(),
            total_quantity: total,
            reserved_quantity: reserved,
            available_quantity: available,
        }
    }

    fn race_policy() -> VerificationPolicy {
        VerificationPolicy {
            thresholds: Thresholds::default(),
            units_per_success: 1,
            operation: Some("inventory_reserve".to_string()),
            journeys: false,
        }
    }

    fn metrics(successes: u64, conflicts: u64, server_errors: u64) -> MetricsSnapshot {
        let reporter = ReportConfig::default().init();
        let record = |outcome: Outcome, n: u64| {
            for _ in 0..n {
                reporter.add_operation("inventory_reserve", outcome, Duration::from_millis(20));
            }
        };
        record(Outcome::Success, successes);
        record(Outcome::Conflict, conflicts);
        record(Outcome::ServerError, server_errors);
        reporter.seal();
        reporter.snapshot()
    }

    #[test]
    fn consistent_inventory_passes() {
        let before = Ok(state(1000, 0, 1000));
        let after = Ok(state(1000, 1000, 0));

        let report = VerificationReport::evaluate(
            "run-b",
            Some((&before, &after)),
            &metrics(1000, 200, 0),
            &race_policy(),
        );

        let inventory = report.inventory.as_ref().unwrap();
        assert_eq!(Verdict::Pass, inventory.conservation.verdict());
        assert_eq!(Verdict::Pass, inventory.over_allocation.verdict());
        assert_eq!(Verdict::Pass, inventory.non_negativity.verdict());
        assert_eq!(
            DiscrepancyLevel::Perfect,
            inventory.delta.as_ref().unwrap().level
        );
        assert_eq!(Verdict::Pass, report.verdict);
    }

    #[test]
    fn oversold_inventory_fails() {
        let before = Ok(state(1000, 0, 1000));
        let after = Ok(state(1000, 1200, -200));

        let report = VerificationReport::evaluate(
            "run-c",
            Some((&before, &after)),
            &metrics(1200, 0, 0),
            &race_policy(),
        );

        let inventory = report.inventory.as_ref().unwrap();
        assert_eq!(Verdict::Fail, inventory.over_allocation.verdict());
        assert_eq!(Verdict::Fail, inventory.non_negativity.verdict());
        assert_eq!(Verdict::Pass, inventory.conservation.verdict());
        assert_eq!(Verdict::Fail, report.verdict);
        assert_eq!(2, report.diagnostics().len());
    }

    #[test]
    fn missing_closing_snapshot_is_indeterminate() {
        let before = Ok(state(1000, 0, 1000));
        let after = Err(SnapshotError::Unavailable("connection refused".to_string()));

        let report = VerificationReport::evaluate(
            "run",
            Some((&before, &after)),
            &metrics(600, 400, 0),
            &race_policy(),
        );

        let inventory = report.inventory.as_ref().unwrap();
        assert_eq!(Verdict::Indeterminate, inventory.verdict());
        assert!(inventory.delta.is_err());
        assert_eq!(Verdict::Indeterminate, report.verdict);
    }

    #[test]
    fn configured_capacity_is_used_without_opening_snapshot() {
        let before = Err(SnapshotError::Unavailable("timeout".to_string()));
        let after = Ok(state(1000, 900, 100));
        let mut policy = race_policy();
        policy.thresholds.initial_capacity = Some(800);

        let report = VerificationReport::evaluate(
            "run",
            Some((&before, &after)),
            &metrics(900, 100, 0),
            &policy,
        );

        assert_eq!(
            Verdict::Fail,
            report.inventory.as_ref().unwrap().over_allocation.verdict()
        );
    }

    #[test]
    fn configured_initial_reserved_replaces_the_opening_snapshot() {
        let after = Ok(state(1000, 600, 400));
        let mut policy = race_policy();
        policy.thresholds.initial_reserved = Some(100);

        let missing = Err(SnapshotError::Unavailable("timeout".to_string()));
        let verification = InventoryVerification::evaluate(&missing, &after, 500, &policy);
        let delta = verification.delta.unwrap();
        assert_eq!(100, delta.initial_reserved);
        assert_eq!(500, delta.net_change);
        assert_eq!(DiscrepancyLevel::Perfect, delta.level);

        let before = Ok(state(1000, 0, 1000));
        let verification = InventoryVerification::evaluate(&before, &after, 500, &policy);
        assert_eq!(100, verification.delta.unwrap().initial_reserved);
    }

    #[test]
    fn extreme_quantities_are_reported_not_overflowed() {
        let before = Ok(state(i64::MAX, 1, i64::MAX - 1));
        let after = Ok(state(i64::MAX, i64::MIN, 0));

        let report = VerificationReport::evaluate(
            "run",
            Some((&before, &after)),
            &metrics(10, 0, 0),
            &race_policy(),
        );

        let inventory = report.inventory.as_ref().unwrap();
        assert_eq!(Verdict::Indeterminate, inventory.conservation.verdict());
        assert_eq!(Verdict::Fail, inventory.non_negativity.verdict());
        assert!(inventory.delta.is_err());
        assert_eq!(Verdict::Fail, report.verdict);
        assert!(report.to_string().contains("out of range"));

        let mut policy = race_policy();
        policy.thresholds.initial_capacity = Some(i64::MIN);
        let verification = InventoryVerification::evaluate(
            &before,
            &Ok(state(i64::MAX, i64::MAX, 0)),
            0,
            &policy,
        );
        assert_eq!(Verdict::Fail, verification.over_allocation.verdict());

        let verification = InventoryVerification::evaluate(
            &Ok(state(1000, 0, 1000)),
            &Ok(state(1000, 10, 990)),
            u64::MAX,
            &race_policy(),
        );
        let delta = verification.delta.unwrap();
        assert_eq!(i64::MAX, delta.client_units);
        assert_eq!(DiscrepancyLevel::Anomaly, delta.level);
    }

    #[test]
    fn count_thresholds_fail_the_run() {
        let mut policy = race_policy();
        policy.thresholds.successes_over = Some(50);
        policy.thresholds.conflicts_under = Some(5000);
        policy.thresholds.server_errors_under = Some(10);

        let passing = LoadAssessment::evaluate(&metrics(600, 390, 9), &policy);
        assert_eq!(Verdict::Pass, passing.count_tier);
        assert!(passing.count_breaches.is_empty());

        let too_few = LoadAssessment::evaluate(&metrics(50, 10, 0), &policy);
        assert_eq!(Verdict::Fail, too_few.count_tier);
        assert_eq!(
            vec!["50 successes, needed more than 50".to_string()],
            too_few.count_breaches
        );

        // Well under the 1% rate, but over the absolute limit.
        let server_errors = LoadAssessment::evaluate(&metrics(2000, 0, 10), &policy);
        assert_eq!(Verdict::Pass, server_errors.error_tier);
        assert_eq!(Verdict::Fail, server_errors.verdict());

        let empty = LoadAssessment::evaluate(&metrics(0, 0, 0), &policy);
        assert_eq!(Verdict::Indeterminate, empty.count_tier);

        let unconfigured = LoadAssessment::evaluate(&metrics(10, 0, 0), &race_policy());
        assert_eq!(Verdict::Pass, unconfigured.count_tier);
    }

    #[test]
    fn error_tiers() {
        let policy = race_policy();

        // Under 1% server errors with a majority of successes.
        let pass = LoadAssessment::evaluate(&metrics(600, 395, 5), &policy);
        assert_eq!(Verdict::Pass, pass.error_tier);

        // Stock ran out so most calls conflicted.
        let marginal = LoadAssessment::evaluate(&metrics(100, 890, 10), &policy);
        assert_eq!(Verdict::Marginal, marginal.error_tier);

        let fail = LoadAssessment::evaluate(&metrics(500, 400, 100), &policy);
        assert_eq!(Verdict::Fail, fail.error_tier);

        let empty = LoadAssessment::evaluate(&metrics(0, 0, 0), &policy);
        assert_eq!(Verdict::Indeterminate, empty.error_tier);
    }

    #[test]
    fn slow_p95_demotes_to_marginal() {
        let mut policy = race_policy();
        policy.thresholds.max_p95_latency = Some(Duration::from_millis(10));

        let assessment = LoadAssessment::evaluate(&metrics(900, 100, 0), &policy);

        assert_eq!(Verdict::Pass, assessment.error_tier);
        assert_eq!(Verdict::Marginal, assessment.latency_tier);
        assert_eq!(Verdict::Marginal, assessment.verdict());
    }

    #[test]
    fn journey_tier_needs_ninety_percent() {
        let reporter = ReportConfig::default().init();
        for _ in 0..100 {
            reporter.add_operation("auth_register", Outcome::Success, Duration::from_millis(5));
        }
        reporter.add(JOURNEYS_COMPLETED, 89);
        reporter.add(JOURNEYS_ABORTED, 11);
        let policy = VerificationPolicy {
            thresholds: Thresholds::default(),
            units_per_success: 1,
            operation: None,
            journeys: true,
        };

        let failing = LoadAssessment::evaluate(&reporter.snapshot(), &policy);
        assert_eq!(Verdict::Fail, failing.journeys.as_ref().unwrap().verdict);
        assert_eq!(Verdict::Fail, failing.verdict());

        reporter.add(JOURNEYS_COMPLETED, 11);
        let passing = LoadAssessment::evaluate(&reporter.snapshot(), &policy);
        assert_eq!(Verdict::Pass, passing.journeys.as_ref().unwrap().verdict);
    }

    #[test]
    fn report_has_fixed_sections() {
        let before = Ok(state(1000, 0, 1000));
        let after = Ok(state(1000, 1000, 0));

        let report = VerificationReport::evaluate(
            "run-b",
            Some((&before, &after)),
            &metrics(1000, 200, 0),
            &race_policy(),
        )
        .to_string();

        for header in [
            "RUN RESULTS (run-b)",
            "INITIAL STATE (BEFORE)",
            "FINAL STATE (AFTER)",
            "DELTA ANALYSIS",
            "INVARIANTS",
            "[PASS] Conservation: 0 = 1000 - 1000",
            "Discrepancy:           0",
            "VERDICT: PASS",
        ] {
            assert!(report.contains(header), "missing `{header}` in\n{report}");
        }
    }

    #[test]
    fn evaluation_is_repeatable() {
        let before = Ok(state(1000, 10, 990));
        let after = Ok(state(1000, 700, 300));
        let snapshot = metrics(680, 300, 2);

        let first =
            VerificationReport::evaluate("run", Some((&before, &after)), &snapshot, &race_policy());
        let second =
            VerificationReport::evaluate("run", Some((&before, &after)), &snapshot, &race_policy());

        assert_eq!(first.to_string(), second.to_string());
    }

    proptest! {
        #[test]
        fn invariants_fail_exactly_when_violated(
            total in -50i64..2000,
            reserved in -50i64..2000,
            available in -2050i64..2050,
            capacity in 0i64..2000,
        ) {
            let before = Ok(state(capacity, 0, capacity));
            let after = Ok(state(total, reserved, available));

            let verification =
                InventoryVerification::evaluate(&before, &after, 0, &race_policy());

            let violated = reserved > capacity
                || available != total - reserved
                || total < 0
                || reserved < 0
                || available < 0;
            prop_assert_eq!(violated, verification.verdict() == Verdict::Fail);
        }

        #[test]
        fn discrepancy_reflects_background_activity(
            successes in 0u64..10_000,
            background in -5_000i64..5_000,
            initial in 0i64..1_000,
        ) {
            let thresholds = Thresholds::default();
            let net = successes as i64 + background;
            let after = state(20_000, initial + net, 20_000 - initial - net);

            let delta = DeltaAnalysis::compute(initial, &after, successes, 1, &thresholds).unwrap();
            prop_assert_eq!(background.unsigned_abs(), delta.discrepancy);

            let larger = background.signum() * (background.abs() + 100);
            let net = successes as i64 + larger;
            let after = state(20_000, initial + net, 20_000 - initial - net);
            let wider = DeltaAnalysis::compute(initial, &after, successes, 1, &thresholds).unwrap();
            prop_assert!(wider.discrepancy >= delta.discrepancy);
            prop_assert!(wider.level >= delta.level);
        }
    }
}
