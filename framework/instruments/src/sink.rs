use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};

use crate::outcome::Outcome;

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new(3).expect("3 sigfigs is always valid")
}

/// Per-outcome call counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    counts: [u64; 5],
}

impl OutcomeCounts {
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.counts[outcome.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Fraction of all calls that ended with `outcome`, `0.0` when nothing was recorded.
    pub fn rate(&self, outcome: Outcome) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.get(outcome) as f64 / total as f64,
        }
    }

    fn bump(&mut self, outcome: Outcome) {
        self.counts[outcome.index()] += 1;
    }
}

/// Latency distribution summary. All values are milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    pub count: u64,
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_histogram(histogram: &Histogram<u64>) -> Self {
        if histogram.is_empty() {
            return Self::default();
        }

        let ms = |micros: u64| micros as f64 / 1000.0;
        Self {
            count: histogram.len(),
            min_ms: ms(histogram.min()),
            mean_ms: histogram.mean() / 1000.0,
            p50_ms: ms(histogram.value_at_quantile(0.50)),
            p90_ms: ms(histogram.value_at_quantile(0.90)),
            p95_ms: ms(histogram.value_at_quantile(0.95)),
            p99_ms: ms(histogram.value_at_quantile(0.99)),
            max_ms: ms(histogram.max()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationSnapshot {
    pub outcomes: OutcomeCounts,
    pub latency: LatencySummary,
}

/// Immutable copy of everything the sink has recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub outcomes: OutcomeCounts,
    pub latency: LatencySummary,
    pub operations: BTreeMap<String, OperationSnapshot>,
    pub counters: BTreeMap<String, u64>,
    /// Set when the snapshot was taken after the run drained. An unsealed snapshot may still be
    /// moving.
    pub sealed: bool,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or_default()
    }

    pub fn operation(&self, operation_id: &str) -> Option<&OperationSnapshot> {
        self.operations.get(operation_id)
    }
}

struct OperationBook {
    outcomes: OutcomeCounts,
    latency: Histogram<u64>,
}

struct LatencyBook {
    overall: Histogram<u64>,
    operations: BTreeMap<String, OperationBook>,
}

/// Thread-safe aggregator for call outcomes, latencies and named counters.
///
/// Outcome totals are plain atomics. Latencies go into HdrHistograms (microsecond resolution)
/// behind a lock that is only held for the duration of a single record. Once [MetricsSink::seal]
/// has been called every further write is ignored, so snapshots taken after the drain point are
/// stable even if a straggling iteration finishes late.
pub struct MetricsSink {
    outcomes: [AtomicU64; 5],
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    latencies: Mutex<LatencyBook>,
    sealed: AtomicBool,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            outcomes: Default::default(),
            counters: RwLock::new(BTreeMap::new()),
            latencies: Mutex::new(LatencyBook {
                overall: new_histogram(),
                operations: BTreeMap::new(),
            }),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn record(&self, outcome: Outcome, latency: Duration) {
        if self.is_sealed() {
            log::trace!("Ignoring {outcome} recorded after the sink was sealed");
            return;
        }

        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);
        self.latencies
            .lock()
            .overall
            .saturating_record(micros(latency));
    }

    /// Record a call against the global buckets and the breakdown for `operation_id`.
    pub fn record_operation(&self, operation_id: &str, outcome: Outcome, latency: Duration) {
        if self.is_sealed() {
            log::trace!("Ignoring {operation_id} ({outcome}) recorded after the sink was sealed");
            return;
        }

        self.outcomes[outcome.index()].fetch_add(1, Ordering::Relaxed);

        let value = micros(latency);
        let mut book = self.latencies.lock();
        book.overall.saturating_record(value);
        let operation = book
            .operations
            .entry(operation_id.to_string())
            .or_insert_with(|| OperationBook {
                outcomes: OutcomeCounts::default(),
                latency: new_histogram(),
            });
        operation.outcomes.bump(outcome);
        operation.latency.saturating_record(value);
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, n: u64) {
        if self.is_sealed() {
            log::trace!("Ignoring counter {name} += {n} after the sink was sealed");
            return;
        }

        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(n, Ordering::Relaxed);
            return;
        }

        self.counters
            .write()
            .entry(name.to_string())
            .or_default()
            .fetch_add(n, Ordering::Relaxed);
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let book = self.latencies.lock();

        let mut outcomes = OutcomeCounts::default();
        for outcome in Outcome::ALL {
            outcomes.counts[outcome.index()] = self.outcomes[outcome.index()].load(Ordering::SeqCst);
        }

        let operations = book
            .operations
            .iter()
            .map(|(operation_id, operation)| {
                (
                    operation_id.clone(),
                    OperationSnapshot {
                        outcomes: operation.outcomes,
                        latency: LatencySummary::from_histogram(&operation.latency),
                    },
                )
            })
            .collect();

        let counters = self
            .counters
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.load(Ordering::SeqCst)))
            .collect();

        MetricsSnapshot {
            outcomes,
            latency: LatencySummary::from_histogram(&book.overall),
            operations,
            counters,
            sealed: self.is_sealed(),
        }
    }
}

fn micros(latency: Duration) -> u64 {
    u64::try_from(latency.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_snapshot() {
        let snapshot = MetricsSink::new().snapshot();

        assert_eq!(0, snapshot.outcomes.total());
        assert_eq!(0.0, snapshot.outcomes.rate(Outcome::Success));
        assert_eq!(LatencySummary::default(), snapshot.latency);
        assert_eq!(0, snapshot.counter("anything"));
        assert!(!snapshot.sealed);
    }

    #[test]
    fn records_outcomes_and_operations() {
        let sink = MetricsSink::new();
        sink.record_operation("inventory_reserve", Outcome::Success, Duration::from_millis(10));
        sink.record_operation("inventory_reserve", Outcome::Conflict, Duration::from_millis(20));
        sink.record_operation("auth_login", Outcome::Timeout, Duration::from_millis(30));
        sink.record(Outcome::ServerError, Duration::from_millis(40));

        let snapshot = sink.snapshot();
        assert_eq!(4, snapshot.outcomes.total());
        assert_eq!(1, snapshot.outcomes.get(Outcome::ServerError));
        assert_eq!(0.25, snapshot.outcomes.rate(Outcome::Conflict));
        assert_eq!(4, snapshot.latency.count);
        assert_eq!(10.0, snapshot.latency.min_ms);

        let reserve = snapshot.operation("inventory_reserve").unwrap();
        assert_eq!(2, reserve.outcomes.total());
        assert_eq!(1, reserve.outcomes.get(Outcome::Success));
        assert_eq!(2, reserve.latency.count);
        assert!(snapshot.operation("shop_create_order").is_none());
    }

    #[test]
    fn latency_percentiles_are_ordered() {
        let sink = MetricsSink::new();
        for ms in 1..=1000 {
            sink.record(Outcome::Success, Duration::from_millis(ms));
        }

        let latency = sink.snapshot().latency;
        assert_eq!(1000, latency.count);
        assert!(latency.min_ms <= latency.p50_ms);
        assert!(latency.p50_ms <= latency.p90_ms);
        assert!(latency.p90_ms <= latency.p95_ms);
        assert!(latency.p95_ms <= latency.p99_ms);
        assert!(latency.p99_ms <= latency.max_ms);
        assert!((latency.p50_ms - 500.0).abs() < 5.0, "{latency:?}");
    }

    #[test]
    fn named_counters() {
        let sink = MetricsSink::new();
        sink.increment("dropped_iterations");
        sink.add("dropped_iterations", 4);
        sink.increment("journeys_completed");

        let snapshot = sink.snapshot();
        assert_eq!(5, snapshot.counter("dropped_iterations"));
        assert_eq!(1, snapshot.counter("journeys_completed"));
    }

    #[test]
    fn concurrent_recording_is_lossless() {
        let sink = MetricsSink::new();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let sink = &sink;
                scope.spawn(move || {
                    for i in 0..1000u64 {
                        let outcome = if (worker + i) % 2 == 0 {
                            Outcome::Success
                        } else {
                            Outcome::Conflict
                        };
                        sink.record_operation("inventory_reserve", outcome, Duration::from_micros(i));
                        sink.increment("iterations_completed");
                    }
                });
            }
        });

        let snapshot = sink.snapshot();
        assert_eq!(8000, snapshot.outcomes.total());
        assert_eq!(4000, snapshot.outcomes.get(Outcome::Success));
        assert_eq!(8000, snapshot.counter("iterations_completed"));
        assert_eq!(
            8000,
            snapshot.operation("inventory_reserve").unwrap().outcomes.total()
        );
    }

    #[test]
    fn sealed_sink_is_stable() {
        let sink = MetricsSink::new();
        sink.record_operation("inventory_reserve", Outcome::Success, Duration::from_millis(5));
        sink.seal();

        let first = sink.snapshot();
        sink.record_operation("inventory_reserve", Outcome::Success, Duration::from_millis(5));
        sink.increment("late");
        let second = sink.snapshot();

        assert!(first.sealed);
        assert_eq!(first, second);
        assert_eq!(1, second.outcomes.total());
    }
}
