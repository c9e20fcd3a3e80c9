use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use race_tunnel_core::prelude::{format_duration, ShutdownHandle, Verdict};
use race_tunnel_instruments::{ReportConfig, Reporter};

use crate::cli::ReporterOpt;
use crate::config::ExecutorKind;
use crate::counters::{
    DROPPED_ITERATIONS, GRACE_EXPIRED, ITERATIONS_COMPLETED, ITERATIONS_INTERRUPTED,
    ITERATIONS_PANICKED, WORKERS_PEAK_ALLOCATED, WORKERS_PEAK_BUSY,
};
use crate::monitor::start_monitor;
use crate::pool::{AgentHooks, WorkerPool};
use crate::progress::start_progress;
use crate::scheduler::{run_arrival_rate, run_ramping_agents, start_dispatcher};
use crate::{
    context::{RunnerContext, UserValuesConstraint},
    definition::ScenarioDefinitionBuilder,
    executor::Executor,
    shutdown::start_shutdown_listener,
};

/// How long interrupted iterations get to notice the stop signal once the grace period is over.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);
/// How long agent threads get to run their teardown hooks and exit.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a scenario to completion and return its verdict.
///
/// Setup hook errors abort the run and are returned. Everything after setup is best effort: agent
/// failures are counted, and a failing teardown hook yields [Verdict::Indeterminate].
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<Verdict> {
    let definition = definition.build()?;
    let config = Arc::new(definition.config);

    log::info!("Running scenario: {} (run id {})", definition.name, config.run_id);
    log::info!("Load profile: {}", config.describe_profile());

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime);
    let executor = Arc::new(Executor::new(runtime, shutdown_handle.clone()));
    let reporter = Arc::new(match config.reporter {
        ReporterOpt::Summary => ReportConfig::default().enable_summary().init(),
        ReporterOpt::Noop => ReportConfig::default().init(),
    });
    let mut runner_context = RunnerContext::new(
        executor.clone(),
        reporter.clone(),
        config.clone(),
        shutdown_handle.clone(),
    );

    if let Some(setup_fn) = definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);

    let pool = WorkerPool::new(
        runner_context.clone(),
        AgentHooks {
            setup: definition.setup_agent_fn,
            behaviour: definition.agent_behaviour,
            teardown: definition.teardown_agent_fn,
        },
        shutdown_handle.clone(),
        config.executor.max_workers,
    );

    if config.executor.kind == ExecutorKind::RampingArrivalRate {
        let allocated = pool.preallocate(config.executor.min_workers);
        log::info!(
            "Allocated {allocated} of {} initial worker slots",
            config.executor.min_workers
        );
    }

    let load_started = Instant::now();
    let run_deadline = load_started
        .checked_add(config.run_deadline())
        .context("Run deadline is too far in the future")?;
    // Iterations due on the last tick may still be handed out, none after that.
    let dispatch_deadline = load_started
        .checked_add(config.profile().total_duration().saturating_add(config.executor.tick))
        .context("Load profile is too long to schedule")?;

    if !config.no_progress {
        start_progress(
            config.profile().total_duration(),
            reporter.clone(),
            shutdown_handle.new_listener(),
        );
    }

    // Ready to start load so start the resource monitor to report high usage by the harness,
    // which would distort the arrival rate.
    start_monitor(shutdown_handle.new_listener());

    match config.executor.kind {
        ExecutorKind::RampingArrivalRate => {
            let (queue_tx, queue_rx) = sync_channel(config.executor.queue_capacity);
            let dispatcher = start_dispatcher(
                pool.clone(),
                queue_rx,
                config.executor.acquire_timeout,
                dispatch_deadline,
                reporter.clone(),
                shutdown_handle.new_listener(),
            )
            .context("Failed to start dispatcher thread")?;

            let profile = config.profile().clone();
            let tick = config.executor.tick;
            let scheduler_reporter = reporter.clone();
            let listener = shutdown_handle.new_listener();
            executor.execute_to_completion(async move {
                Ok(run_arrival_rate(
                    profile,
                    tick,
                    load_started,
                    queue_tx,
                    scheduler_reporter,
                    listener,
                )
                .await)
            })?;

            dispatcher
                .join()
                .map_err(|e| anyhow::anyhow!("Dispatcher thread panicked: {:?}", e))?;
        }
        ExecutorKind::RampingAgents => {
            run_ramping_agents(
                &pool,
                config.profile(),
                config.executor.tick,
                shutdown_handle.new_listener(),
            );
        }
    }

    drain(&pool, run_deadline, &reporter, &shutdown_handle);

    let stats = pool.stats();
    reporter.add(WORKERS_PEAK_BUSY, stats.peak_busy as u64);
    reporter.add(WORKERS_PEAK_ALLOCATED, stats.peak_allocated as u64);
    reporter.seal();
    log_run_diagnostics(&reporter);

    let still_running = pool.close(CLOSE_TIMEOUT);
    if still_running > 0 {
        log::warn!("{still_running} agent threads did not stop in time");
    }

    let verdict = match definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting and runner
        // shutdown to happen cleanly, the run just can't be judged.
        Some(teardown_fn) => match teardown_fn(runner_context.clone()) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::error!("Teardown failed: {:?}", e);
                Verdict::Indeterminate
            }
        },
        None if reporter.snapshot().counter(ITERATIONS_COMPLETED) > 0 => Verdict::Pass,
        None => Verdict::Indeterminate,
    };

    shutdown_handle.shutdown();
    reporter.finalize();

    log::info!("Scenario {} finished: {verdict}", definition.name);

    Ok(verdict)
}

/// Wait for in-flight iterations after dispatch has stopped, until `deadline` at the latest. The
/// deadline is the end of the load profile plus the grace period, however long dispatch overran.
/// When it passes the run is shut down, which interrupts whatever is still running.
fn drain<RV: UserValuesConstraint, V: UserValuesConstraint>(
    pool: &Arc<WorkerPool<RV, V>>,
    deadline: Instant,
    reporter: &Reporter,
    shutdown_handle: &ShutdownHandle,
) {
    let in_flight = pool.stats().busy;
    let grace = deadline.saturating_duration_since(Instant::now());
    log::info!(
        "Draining {in_flight} in-flight iterations for at most {}",
        format_duration(grace)
    );

    if pool.wait_idle(grace) {
        return;
    }

    log::warn!(
        "Iterations still running at the run deadline, interrupting {} of them",
        pool.stats().busy
    );
    reporter.increment(GRACE_EXPIRED);
    shutdown_handle.shutdown();

    if !pool.wait_idle(INTERRUPT_GRACE) {
        log::warn!(
            "{} iterations ignored the stop signal, metrics are sealed without them",
            pool.stats().busy
        );
    }
}

fn log_run_diagnostics(reporter: &Reporter) {
    let snapshot = reporter.snapshot();

    let dropped = snapshot.counter(DROPPED_ITERATIONS);
    if dropped > 0 {
        log::warn!("{dropped} iterations were due but never started");
    }

    let interrupted = snapshot.counter(ITERATIONS_INTERRUPTED);
    if interrupted > 0 {
        log::warn!("{interrupted} iterations were interrupted by shutdown");
    }

    let panicked = snapshot.counter(ITERATIONS_PANICKED);
    if panicked > 0 {
        log::warn!("{panicked} iterations panicked");
    }
}
