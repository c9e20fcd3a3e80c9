mod outcome;
mod report;
mod sink;

use std::time::Instant;

pub use outcome::{ClassifyOutcome, Outcome};
pub use report::{ReportCollector, ReportConfig, Reporter, SummaryReportCollector};
pub use sink::{
    LatencySummary, MetricsSink, MetricsSnapshot, OperationSnapshot, OutcomeCounts,
};

/// Started timing of a single named operation.
pub struct OperationRecord {
    operation_id: String,
    started: Instant,
}

impl OperationRecord {
    pub fn new(operation_id: String) -> Self {
        Self {
            operation_id,
            started: Instant::now(),
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }
}

/// Finish timing `record` and report the classified `response` against it.
pub fn report_operation<R>(reporter: &Reporter, record: OperationRecord, response: &R)
where
    R: ClassifyOutcome,
{
    let latency = record.started.elapsed();
    reporter.add_operation(&record.operation_id, response.outcome(), latency);
}

pub mod prelude {
    pub use crate::{
        report_operation, ClassifyOutcome, MetricsSnapshot, OperationRecord, Outcome,
        OutcomeCounts, ReportConfig, Reporter,
    };
}
