mod tables;

use tabled::settings::Style;
use tabled::Table;

use crate::report::summary_report::tables::{CounterRow, OperationRow, OutcomeRow};
use crate::report::ReportCollector;
use crate::sink::MetricsSnapshot;
use crate::Outcome;

/// Prints outcome, operation and counter tables to stdout when the run is finalized.
pub struct SummaryReportCollector;

impl SummaryReportCollector {
    pub fn new() -> Self {
        Self
    }

    fn print_summary_of_outcomes(snapshot: &MetricsSnapshot) {
        println!("\nSummary of outcomes");
        let rows = Outcome::ALL
            .iter()
            .map(|outcome| OutcomeRow {
                outcome: outcome.label().to_string(),
                count: snapshot.outcomes.get(*outcome),
                rate_percent: snapshot.outcomes.rate(*outcome) * 100.0,
            })
            .collect::<Vec<_>>();

        let mut table = Table::new(rows);
        table.with(Style::modern());

        println!("{table}");
    }

    fn print_summary_of_operations(snapshot: &MetricsSnapshot) {
        if snapshot.operations.is_empty() {
            return;
        }

        println!("\nSummary of operations");
        let rows = snapshot
            .operations
            .iter()
            .map(|(operation_id, operation)| OperationRow {
                operation_id: operation_id.clone(),
                total_operations: operation.outcomes.total(),
                success: operation.outcomes.get(Outcome::Success),
                conflict: operation.outcomes.get(Outcome::Conflict),
                client_error: operation.outcomes.get(Outcome::ClientError),
                server_error: operation.outcomes.get(Outcome::ServerError),
                timeout: operation.outcomes.get(Outcome::Timeout),
                avg_time_ms: operation.latency.mean_ms,
                p50_time_ms: operation.latency.p50_ms,
                p95_time_ms: operation.latency.p95_ms,
                p99_time_ms: operation.latency.p99_ms,
                max_time_ms: operation.latency.max_ms,
            })
            .collect::<Vec<_>>();

        let mut table = Table::new(rows);
        table.with(Style::modern());

        println!("{table}");
    }

    fn print_counters(snapshot: &MetricsSnapshot) {
        if snapshot.counters.is_empty() {
            return;
        }

        println!("\nCounters");
        let rows = snapshot
            .counters
            .iter()
            .map(|(name, value)| CounterRow {
                name: name.clone(),
                value: *value,
            })
            .collect::<Vec<_>>();

        let mut table = Table::new(rows);
        table.with(Style::modern());

        println!("{table}");
    }
}

impl Default for SummaryReportCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportCollector for SummaryReportCollector {
    fn finalize(&self, snapshot: &MetricsSnapshot) {
        Self::print_summary_of_outcomes(snapshot);
        Self::print_summary_of_operations(snapshot);
        Self::print_counters(snapshot);
    }
}
