mod summary_report;

use std::time::Duration;

use crate::outcome::Outcome;
use crate::sink::{MetricsSink, MetricsSnapshot};

pub use summary_report::SummaryReportCollector;

/// Presents the final metrics once the run is over. Everything a collector needs is in the
/// snapshot, so operations are only ever recorded into the sink.
pub trait ReportCollector: Send + Sync {
    fn finalize(&self, snapshot: &MetricsSnapshot);
}

/// Builder for a [Reporter].
///
/// With nothing enabled the reporter still aggregates metrics, it just doesn't print anything when
/// the run is finalized.
#[derive(Default)]
pub struct ReportConfig {
    enable_summary: bool,
}

impl ReportConfig {
    pub fn enable_summary(mut self) -> Self {
        self.enable_summary = true;
        self
    }

    pub fn init(self) -> Reporter {
        let mut collectors: Vec<Box<dyn ReportCollector>> = Vec::new();
        if self.enable_summary {
            collectors.push(Box::new(SummaryReportCollector::new()));
        }

        Reporter {
            sink: MetricsSink::new(),
            collectors,
        }
    }
}

/// The shared handle that instrumented code reports through.
pub struct Reporter {
    sink: MetricsSink,
    collectors: Vec<Box<dyn ReportCollector>>,
}

impl Reporter {
    pub fn add_operation(&self, operation_id: &str, outcome: Outcome, latency: Duration) {
        self.sink.record_operation(operation_id, outcome, latency);
    }

    pub fn increment(&self, name: &str) {
        self.sink.increment(name);
    }

    pub fn add(&self, name: &str, n: u64) {
        self.sink.add(name, n);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.sink.snapshot()
    }

    /// Mark the drain point, see [MetricsSink::seal].
    pub fn seal(&self) {
        self.sink.seal();
    }

    pub fn finalize(&self) {
        let snapshot = self.sink.snapshot();
        for collector in &self.collectors {
            collector.finalize(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingCollector {
        finalized: Arc<AtomicUsize>,
        operations_seen: Arc<AtomicUsize>,
    }

    impl ReportCollector for CountingCollector {
        fn finalize(&self, snapshot: &MetricsSnapshot) {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            self.operations_seen
                .store(snapshot.outcomes.total() as usize, Ordering::SeqCst);
        }
    }

    #[test]
    fn collectors_see_every_operation_in_the_final_snapshot() {
        let finalized = Arc::new(AtomicUsize::new(0));
        let operations_seen = Arc::new(AtomicUsize::new(0));
        let reporter = Arc::new(Reporter {
            sink: MetricsSink::new(),
            collectors: vec![Box::new(CountingCollector {
                finalized: finalized.clone(),
                operations_seen: operations_seen.clone(),
            })],
        });

        let workers = (0..4)
            .map(|_| {
                let reporter = reporter.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        reporter.add_operation(
                            "inventory_reserve",
                            Outcome::Success,
                            Duration::from_millis(1),
                        );
                    }
                })
            })
            .collect::<Vec<_>>();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(0, finalized.load(Ordering::SeqCst));
        reporter.finalize();
        assert_eq!(1, finalized.load(Ordering::SeqCst));
        assert_eq!(1000, operations_seen.load(Ordering::SeqCst));
    }
}
