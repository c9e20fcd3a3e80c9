use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use race_tunnel_core::prelude::{DelegatedShutdownListener, LoadProfile};
use race_tunnel_instruments::Reporter;
use tokio::time::MissedTickBehavior;

use crate::context::UserValuesConstraint;
use crate::counters::{
    DROPPED_EXPIRED, DROPPED_ITERATIONS, DROPPED_QUEUE_FULL, DROPPED_SATURATED, ITERATIONS_FAILED,
};
use crate::pool::{AcquireError, RunningAgent, ScheduleSaturation, WorkerPool};

/// Turns elapsed time into a number of iteration starts that are due.
///
/// Pure bookkeeping over [LoadProfile::cumulative_at], so a slow tick catches up on the next one
/// instead of losing arrivals, and nothing here depends on how long iterations take.
pub(crate) struct ArrivalTimeline {
    profile: LoadProfile,
    dispatched: u64,
}

impl ArrivalTimeline {
    pub(crate) fn new(profile: LoadProfile) -> Self {
        Self {
            profile,
            dispatched: 0,
        }
    }

    /// Iterations that became due since the previous call.
    pub(crate) fn advance(&mut self, elapsed: Duration) -> u64 {
        let due = self.profile.cumulative_at(elapsed).floor() as u64;
        let new = due.saturating_sub(self.dispatched);
        self.dispatched = self.dispatched.max(due);
        new
    }

    pub(crate) fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub(crate) fn total_duration(&self) -> Duration {
        self.profile.total_duration()
    }
}

/// Timer loop of the arrival-rate executor. Pushes one job per due iteration onto `queue` without
/// ever blocking, and drops the job when the queue is full. Returns once the profile has ended or
/// the run is shut down, closing the queue.
///
/// Elapsed time is measured from `started`, the same instant the dispatch deadline is taken from.
pub(crate) async fn run_arrival_rate(
    profile: LoadProfile,
    tick: Duration,
    started: Instant,
    queue: SyncSender<()>,
    reporter: Arc<Reporter>,
    mut shutdown_listener: DelegatedShutdownListener,
) -> u64 {
    let mut timeline = ArrivalTimeline::new(profile);
    let total = timeline.total_duration();

    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = tokio::time::Instant::from_std(started);
    let mut queue_full_burst = 0u64;
    let mut last_warning = Instant::now();
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown_listener.wait_for_shutdown() => {
                log::info!("Stopping dispatch early, shutdown requested");
                break;
            }
        }

        let elapsed = started.elapsed().min(total);
        let due = timeline.advance(elapsed);
        log::trace!("Tick at {elapsed:?}, {due} iterations due");

        for _ in 0..due {
            match queue.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(())) => {
                    reporter.increment(DROPPED_ITERATIONS);
                    reporter.increment(DROPPED_QUEUE_FULL);
                    queue_full_burst += 1;
                }
                Err(TrySendError::Disconnected(())) => {
                    log::error!("Work queue closed while dispatching");
                    return timeline.dispatched();
                }
            }
        }

        if queue_full_burst > 0 && last_warning.elapsed() >= Duration::from_secs(1) {
            log::warn!(
                "{}: dropped {queue_full_burst} iterations, the harness can't keep up with the target rate",
                ScheduleSaturation::QueueFull
            );
            queue_full_burst = 0;
            last_warning = Instant::now();
        }

        if elapsed >= total {
            break;
        }
    }

    log::info!("Dispatched {} iterations", timeline.dispatched());
    timeline.dispatched()
}

/// Hands queued jobs to worker slots until the queue is closed and empty.
///
/// No iteration starts after `deadline`. Jobs still queued at that point are dropped as expired,
/// and the wait for a free slot is cut short so it never runs past it. Jobs still queued when the
/// run shuts down are discarded.
pub(crate) fn start_dispatcher<RV: UserValuesConstraint, V: UserValuesConstraint>(
    pool: Arc<WorkerPool<RV, V>>,
    queue: Receiver<()>,
    acquire_timeout: Duration,
    deadline: Instant,
    reporter: Arc<Reporter>,
    shutdown_listener: DelegatedShutdownListener,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("dispatcher".to_string())
        .spawn(move || {
            let mut saturated_burst = 0u64;
            let mut last_warning = Instant::now();
            let mut discarded = 0u64;
            let mut expired = 0u64;

            for () in queue.iter() {
                if shutdown_listener.should_shutdown() {
                    discarded += 1;
                    continue;
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    reporter.increment(DROPPED_ITERATIONS);
                    reporter.increment(DROPPED_EXPIRED);
                    expired += 1;
                    continue;
                }

                match pool.acquire(acquire_timeout.min(remaining)) {
                    Ok(slot) => pool.dispatch(slot),
                    Err(AcquireError::Saturated(reason)) => {
                        log::trace!("{reason}");
                        reporter.increment(DROPPED_ITERATIONS);
                        reporter.increment(DROPPED_SATURATED);
                        saturated_burst += 1;
                    }
                    Err(AcquireError::SetupFailed) => {
                        reporter.increment(ITERATIONS_FAILED);
                    }
                    Err(AcquireError::Closed) => {
                        discarded += 1;
                    }
                }

                if saturated_burst > 0 && last_warning.elapsed() >= Duration::from_secs(1) {
                    log::warn!(
                        "Dropped {saturated_burst} iterations waiting for a free worker, consider raising max_workers"
                    );
                    saturated_burst = 0;
                    last_warning = Instant::now();
                }
            }

            if expired > 0 {
                log::warn!("Dropped {expired} iterations still queued when the load profile ended");
            }
            if discarded > 0 {
                log::debug!("Discarded {discarded} queued iterations after shutdown");
            }
        })
}

/// The number of agents the ramping-agents executor should be running at `elapsed`.
pub(crate) fn agent_target(profile: &LoadProfile, elapsed: Duration) -> Option<usize> {
    profile.target_at(elapsed).map(|target| target.round() as usize)
}

/// Controller loop of the ramping-agents executor. Blocks until the profile ends or the run shuts
/// down. Agents are stopped newest first when the target falls, and every agent is asked to stop
/// once the loop exits.
pub(crate) fn run_ramping_agents<RV: UserValuesConstraint, V: UserValuesConstraint>(
    pool: &Arc<WorkerPool<RV, V>>,
    profile: &LoadProfile,
    tick: Duration,
    shutdown_listener: DelegatedShutdownListener,
) {
    let started = Instant::now();
    let mut agents: Vec<RunningAgent> = Vec::new();
    let mut warned_at_limit = false;
    let mut peak = 0;

    while !shutdown_listener.should_shutdown() {
        let Some(target) = agent_target(profile, started.elapsed()) else {
            break;
        };

        agents.retain(|agent| !agent.is_finished());

        while agents.len() < target {
            match pool.spawn_looping_agent() {
                Some(agent) => agents.push(agent),
                None => {
                    if !warned_at_limit {
                        log::warn!(
                            "Agent target {target} is above the worker limit, holding at {}",
                            agents.len()
                        );
                        warned_at_limit = true;
                    }
                    break;
                }
            }
        }

        while agents.len() > target {
            if let Some(agent) = agents.pop() {
                agent.stop();
            }
        }

        peak = peak.max(agents.len());
        std::thread::sleep(tick);
    }

    for agent in agents.iter().rev() {
        agent.stop();
    }

    log::info!("Load profile finished, peak of {peak} concurrent agents");
}
