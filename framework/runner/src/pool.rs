use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, sync_channel, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use race_tunnel_core::prelude::{AgentBailError, ShutdownHandle, ShutdownSignalError};
use race_tunnel_instruments::Reporter;
use tokio_util::sync::CancellationToken;

use crate::context::{AgentContext, RunnerContext, UserValuesConstraint};
use crate::counters::{
    AGENT_SETUP_FAILED, ITERATIONS_COMPLETED, ITERATIONS_FAILED, ITERATIONS_INTERRUPTED,
    ITERATIONS_PANICKED,
};
use crate::definition::AgentHookMut;

/// Why a due iteration could not be started.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleSaturation {
    #[error("the work queue is full")]
    QueueFull,
    #[error("no worker slot became free within {0:?}")]
    NoWorker(Duration),
}

#[derive(Debug)]
pub(crate) enum AcquireError {
    Saturated(ScheduleSaturation),
    SetupFailed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterationEnd {
    Completed,
    Failed,
    Interrupted,
    Bailed,
    Panicked,
}

impl IterationEnd {
    /// The slot's state can't be trusted after a bail or a panic.
    fn retires_slot(self) -> bool {
        matches!(self, IterationEnd::Bailed | IterationEnd::Panicked)
    }
}

pub(crate) struct AgentHooks<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub setup: Option<AgentHookMut<RV, V>>,
    pub behaviour: AgentHookMut<RV, V>,
    pub teardown: Option<AgentHookMut<RV, V>>,
}

/// Run one iteration of `behaviour` and count how it ended. Never panics.
pub(crate) fn run_iteration<RV: UserValuesConstraint, V: UserValuesConstraint>(
    ctx: &mut AgentContext<RV, V>,
    behaviour: AgentHookMut<RV, V>,
    reporter: &Reporter,
) -> IterationEnd {
    match std::panic::catch_unwind(AssertUnwindSafe(|| behaviour(ctx))) {
        Ok(Ok(())) => {
            reporter.increment(ITERATIONS_COMPLETED);
            IterationEnd::Completed
        }
        Ok(Err(e)) if e.is::<ShutdownSignalError>() => {
            reporter.increment(ITERATIONS_INTERRUPTED);
            IterationEnd::Interrupted
        }
        Ok(Err(e)) if e.is::<AgentBailError>() => {
            log::warn!("Agent {} bailed: {:?}", ctx.agent_id(), e);
            reporter.increment(ITERATIONS_FAILED);
            IterationEnd::Bailed
        }
        Ok(Err(e)) => {
            log::debug!("Iteration failed for agent {}: {:?}", ctx.agent_id(), e);
            reporter.increment(ITERATIONS_FAILED);
            IterationEnd::Failed
        }
        Err(_) => {
            log::error!("Iteration panicked for agent {}, retiring it", ctx.agent_id());
            reporter.increment(ITERATIONS_PANICKED);
            IterationEnd::Panicked
        }
    }
}

/// Handle to an idle worker slot. Sending the handle to its own channel hands the slot one
/// iteration to run; the slot puts the handle back into the pool when it is done.
pub(crate) struct Slot {
    jobs: Sender<Slot>,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Slot>,
    allocated: usize,
    busy: usize,
    peak_allocated: usize,
    peak_busy: usize,
    closed: bool,
}

impl PoolState {
    fn mark_allocated(&mut self) {
        self.allocated += 1;
        self.peak_allocated = self.peak_allocated.max(self.allocated);
    }

    fn mark_busy(&mut self) {
        self.busy += 1;
        self.peak_busy = self.peak_busy.max(self.busy);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocated: usize,
    pub busy: usize,
    pub peak_allocated: usize,
    pub peak_busy: usize,
}

/// An agent started by the ramping-agents executor, looping until stopped.
pub(crate) struct RunningAgent {
    token: CancellationToken,
    done: Arc<AtomicBool>,
}

impl RunningAgent {
    /// Ask the agent to stop after its current iteration.
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

/// Elastic set of worker slots, each backed by its own thread and [AgentContext].
pub(crate) struct WorkerPool<RV: UserValuesConstraint, V: UserValuesConstraint> {
    runner_context: Arc<RunnerContext<RV>>,
    reporter: Arc<Reporter>,
    hooks: AgentHooks<RV, V>,
    shutdown_handle: ShutdownHandle,
    max_workers: usize,
    next_agent: AtomicUsize,
    state: Mutex<PoolState>,
    changed: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> WorkerPool<RV, V> {
    pub(crate) fn new(
        runner_context: Arc<RunnerContext<RV>>,
        hooks: AgentHooks<RV, V>,
        shutdown_handle: ShutdownHandle,
        max_workers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            reporter: runner_context.reporter(),
            runner_context,
            hooks,
            shutdown_handle,
            max_workers,
            next_agent: AtomicUsize::new(0),
            state: Mutex::new(PoolState::default()),
            changed: Condvar::new(),
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Allocate up to `count` slots ahead of load, running the agent setup hook for each one in
    /// turn. Returns how many slots are allocated afterwards.
    pub(crate) fn preallocate(self: &Arc<Self>, count: usize) -> usize {
        for _ in 0..count {
            if self.shutdown_handle.is_shutdown() {
                break;
            }

            {
                let mut state = self.state.lock();
                if state.allocated >= self.max_workers {
                    break;
                }
                state.mark_allocated();
            }

            let slot = self.spawn_slot();
            let mut state = self.state.lock();
            match slot {
                Some(slot) => state.idle.push(slot),
                None => state.allocated -= 1,
            }
        }

        self.state.lock().allocated
    }

    /// Take an idle slot, allocating a new one if the pool is below its limit, otherwise waiting
    /// at most `timeout` for one to be released.
    pub(crate) fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<Slot, AcquireError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(AcquireError::Closed);
            }

            if let Some(slot) = state.idle.pop() {
                state.mark_busy();
                return Ok(slot);
            }

            if state.allocated < self.max_workers {
                state.mark_allocated();
                let slot = MutexGuard::unlocked(&mut state, || self.spawn_slot());
                return match slot {
                    Some(slot) => {
                        state.mark_busy();
                        Ok(slot)
                    }
                    None => {
                        state.allocated -= 1;
                        self.changed.notify_all();
                        Err(AcquireError::SetupFailed)
                    }
                };
            }

            if self.changed.wait_until(&mut state, deadline).timed_out() {
                if let Some(slot) = state.idle.pop() {
                    state.mark_busy();
                    return Ok(slot);
                }

                return Err(AcquireError::Saturated(ScheduleSaturation::NoWorker(timeout)));
            }
        }
    }

    /// Start one iteration on an acquired slot. Does not wait for it to finish.
    pub(crate) fn dispatch(&self, slot: Slot) {
        let jobs = slot.jobs.clone();
        if jobs.send(slot).is_err() {
            log::warn!("Worker slot stopped unexpectedly, dropping it from the pool");
            self.retire();
        }
    }

    /// Wait until no slot is busy. Returns false if that did not happen within `timeout`.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.busy > 0 {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return state.busy == 0;
            }
        }

        true
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            allocated: state.allocated,
            busy: state.busy,
            peak_allocated: state.peak_allocated,
            peak_busy: state.peak_busy,
        }
    }

    /// Stop handing out slots, let every slot thread run its teardown hook and exit. Waits up to
    /// `timeout` for the threads and returns how many were still running after that.
    pub(crate) fn close(&self, timeout: Duration) -> usize {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.idle.clear();
            self.changed.notify_all();
        }

        let deadline = Instant::now() + timeout;
        let mut handles = std::mem::take(&mut *self.threads.lock());
        loop {
            let (finished, running): (Vec<_>, Vec<_>) =
                handles.into_iter().partition(|handle| handle.is_finished());
            for handle in finished {
                if handle.join().is_err() {
                    log::warn!("An agent thread panicked while stopping");
                }
            }

            handles = running;
            if handles.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        handles.len()
    }

    /// Start an agent that runs the behaviour in a loop until it is stopped, the run shuts down or
    /// the iteration bails. Returns `None` when the pool is at its limit.
    pub(crate) fn spawn_looping_agent(self: &Arc<Self>) -> Option<RunningAgent> {
        {
            let mut state = self.state.lock();
            if state.closed || state.allocated >= self.max_workers {
                return None;
            }
            state.mark_allocated();
            state.mark_busy();
        }

        let agent_id = self.next_agent_id();
        let token = CancellationToken::new();
        let done = Arc::new(AtomicBool::new(false));

        let pool = self.clone();
        let thread_token = token.clone();
        let thread_done = done.clone();
        let thread_agent_id = agent_id.clone();
        let spawned = std::thread::Builder::new()
            .name(agent_id.clone())
            .spawn(move || {
                pool.looping_agent_main(thread_agent_id, thread_token);
                thread_done.store(true, Ordering::Release);
            });

        match spawned {
            Ok(handle) => {
                self.threads.lock().push(handle);
                Some(RunningAgent { token, done })
            }
            Err(e) => {
                log::error!("Failed to spawn thread for agent {agent_id}: {e}");
                self.retire();
                None
            }
        }
    }

    fn next_agent_id(&self) -> String {
        format!("agent-{}", self.next_agent.fetch_add(1, Ordering::Relaxed))
    }

    fn new_context(&self, agent_id: String) -> AgentContext<RV, V> {
        AgentContext::new(
            agent_id,
            self.runner_context.clone(),
            self.shutdown_handle.new_listener(),
        )
    }

    /// Spawn a slot thread and wait for its setup hook. `None` if the setup failed.
    fn spawn_slot(self: &Arc<Self>) -> Option<Slot> {
        let agent_id = self.next_agent_id();
        let (jobs_tx, jobs_rx) = channel::<Slot>();
        let (ready_tx, ready_rx) = sync_channel::<bool>(1);

        let pool = self.clone();
        let thread_agent_id = agent_id.clone();
        let spawned = std::thread::Builder::new()
            .name(agent_id.clone())
            .spawn(move || pool.slot_main(thread_agent_id, jobs_rx, ready_tx));

        match spawned {
            Ok(handle) => self.threads.lock().push(handle),
            Err(e) => {
                log::error!("Failed to spawn thread for agent {agent_id}: {e}");
                return None;
            }
        }

        // A closed channel means the setup hook panicked.
        match ready_rx.recv() {
            Ok(true) => Some(Slot { jobs: jobs_tx }),
            _ => None,
        }
    }

    fn slot_main(self: Arc<Self>, agent_id: String, jobs: Receiver<Slot>, ready: SyncSender<bool>) {
        let mut ctx = self.new_context(agent_id);
        let ready_to_run = self.setup_agent(&mut ctx);
        let _ = ready.send(ready_to_run);
        if !ready_to_run {
            return;
        }

        while let Ok(slot) = jobs.recv() {
            let end = run_iteration(&mut ctx, self.hooks.behaviour, &self.reporter);
            if end.retires_slot() {
                drop(slot);
                self.retire();
                return;
            }
            self.release(slot);
        }

        self.teardown_agent(&mut ctx);
    }

    fn looping_agent_main(self: Arc<Self>, agent_id: String, token: CancellationToken) {
        let mut ctx = self.new_context(agent_id);
        if !self.setup_agent(&mut ctx) {
            self.retire();
            return;
        }

        let shutdown_listener = self.shutdown_handle.new_listener();
        while !token.is_cancelled() && !shutdown_listener.should_shutdown() {
            let end = run_iteration(&mut ctx, self.hooks.behaviour, &self.reporter);
            if end.retires_slot() {
                self.retire();
                return;
            }
        }

        self.teardown_agent(&mut ctx);
        self.retire();
    }

    fn setup_agent(&self, ctx: &mut AgentContext<RV, V>) -> bool {
        let Some(setup) = self.hooks.setup else {
            return true;
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| setup(ctx))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("Agent setup failed for agent {}: {:?}", ctx.agent_id(), e);
                self.reporter.increment(AGENT_SETUP_FAILED);
                false
            }
            Err(_) => {
                log::error!("Agent setup panicked for agent {}", ctx.agent_id());
                self.reporter.increment(AGENT_SETUP_FAILED);
                false
            }
        }
    }

    fn teardown_agent(&self, ctx: &mut AgentContext<RV, V>) {
        if let Some(teardown) = self.hooks.teardown {
            if let Err(e) = teardown(ctx) {
                log::error!("Agent teardown failed for agent {}: {:?}", ctx.agent_id(), e);
            }
        }
    }

    fn release(&self, slot: Slot) {
        let mut state = self.state.lock();
        state.busy = state.busy.saturating_sub(1);
        if !state.closed {
            state.idle.push(slot);
        }
        self.changed.notify_all();
    }

    fn retire(&self) {
        let mut state = self.state.lock();
        state.busy = state.busy.saturating_sub(1);
        state.allocated = state.allocated.saturating_sub(1);
        self.changed.notify_all();
    }
}
