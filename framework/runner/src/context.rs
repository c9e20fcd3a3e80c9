use std::{fmt::Debug, sync::Arc};

use race_tunnel_core::prelude::{DelegatedShutdownListener, ShutdownHandle};
use race_tunnel_instruments::Reporter;

use crate::config::RunConfig;
use crate::executor::Executor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// Run-wide state, shared read-only with every agent once the setup hook has run.
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    reporter: Arc<Reporter>,
    config: Arc<RunConfig>,
    shutdown_handle: ShutdownHandle,
    value: RV,
}

impl<RV: UserValuesConstraint> Debug for RunnerContext<RV> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerContext")
            .field("run_id", &self.config.run_id)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        reporter: Arc<Reporter>,
        config: Arc<RunConfig>,
        shutdown_handle: ShutdownHandle,
    ) -> Self {
        Self {
            executor,
            reporter,
            config,
            shutdown_handle,
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn reporter(&self) -> Arc<Reporter> {
        self.reporter.clone()
    }

    pub fn config(&self) -> &Arc<RunConfig> {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.config.run_id
    }

    /// Stop dispatching new iterations and interrupt the ones in flight. The run then drains and
    /// goes on to teardown as usual.
    pub fn force_stop_scenario(&self) {
        self.shutdown_handle.shutdown();
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// State owned by one worker slot. The value survives from one iteration to the next on the same
/// slot and is dropped when the slot is retired.
pub struct AgentContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    agent_id: String,
    runner_context: Arc<RunnerContext<RV>>,
    shutdown_listener: DelegatedShutdownListener,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> AgentContext<RV, V> {
    pub(crate) fn new(
        agent_id: String,
        runner_context: Arc<RunnerContext<RV>>,
        shutdown_listener: DelegatedShutdownListener,
    ) -> Self {
        Self {
            agent_id,
            runner_context,
            shutdown_listener,
            value: Default::default(),
        }
    }

    /// A value which uniquely identifies this worker slot for the duration of the run.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    pub fn shutdown_listener(&mut self) -> &mut DelegatedShutdownListener {
        &mut self.shutdown_listener
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}
