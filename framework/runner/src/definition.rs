use std::sync::Arc;

use race_tunnel_core::prelude::Verdict;

use crate::cli::RaceTunnelScenarioCli;
use crate::config::RunConfig;
use crate::context::{AgentContext, RunnerContext, UserValuesConstraint};
use crate::init::init;

pub type HookResult = anyhow::Result<()>;

/// Error type for a scenario `main` and for helpers shared between hooks. Compatible with
/// [HookResult] so errors propagate with `?`.
pub type RaceTunnelResult<T> = anyhow::Result<T>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type AgentHookMut<RV, V> = fn(&mut AgentContext<RV, V>) -> HookResult;
pub type GlobalHookTeardown<RV> = fn(Arc<RunnerContext<RV>>) -> anyhow::Result<Verdict>;

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the scenario that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: RaceTunnelScenarioCli,
    /// The scenario's built-in configuration, see [ScenarioDefinitionBuilder::with_default_config_toml].
    default_config_toml: String,
    /// Global setup hook for this scenario. It will be run once, before any agents are started.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Setup hook for an agent, run once for each worker slot when it is allocated.
    ///
    /// Slots allocated up front (`min_workers`) are all set up before load starts. Slots allocated
    /// on demand run this just before their first iteration.
    setup_agent_fn: Option<AgentHookMut<RV, V>>,
    /// One iteration of the scenario. Called repeatedly on whichever slot the executor picks.
    agent_behaviour: Option<AgentHookMut<RV, V>>,
    /// Teardown hook for an agent, run when its slot is closed at the end of the run.
    teardown_agent_fn: Option<AgentHookMut<RV, V>>,
    /// Global teardown hook, run once after the run has drained and metrics are sealed. Its
    /// result is the verdict of the run.
    teardown_fn: Option<GlobalHookTeardown<RV>>,
}

pub struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub name: String,
    pub config: RunConfig,
    pub setup_fn: Option<GlobalHookMut<RV>>,
    pub setup_agent_fn: Option<AgentHookMut<RV, V>>,
    pub agent_behaviour: AgentHookMut<RV, V>,
    pub teardown_agent_fn: Option<AgentHookMut<RV, V>>,
    pub teardown_fn: Option<GlobalHookTeardown<RV>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    /// See the [ScenarioDefinitionBuilder::name] for more information about the name.
    pub fn new(name: &str, cli: RaceTunnelScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_config_toml: String::new(),
            setup_fn: None,
            setup_agent_fn: None,
            agent_behaviour: None,
            teardown_agent_fn: None,
            teardown_fn: None,
        }
    }

    /// Like [ScenarioDefinitionBuilder::new] but parses the command line and initialises logging.
    /// This is what a scenario binary should use.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, init())
    }

    /// The configuration this scenario runs with when no `--config` file or overrides are given.
    /// Usually `include_str!("../configs/default.toml")`.
    pub fn with_default_config_toml(mut self, toml: &str) -> Self {
        self.default_config_toml = toml.to_string();
        self
    }

    /// Set the global setup hook [ScenarioDefinitionBuilder::setup_fn] for this scenario.
    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    /// Set the agent setup hook [ScenarioDefinitionBuilder::setup_agent_fn] for this scenario.
    pub fn use_agent_setup(mut self, setup_agent_fn: AgentHookMut<RV, V>) -> Self {
        self.setup_agent_fn = Some(setup_agent_fn);
        self
    }

    /// Set the agent behaviour hook [ScenarioDefinitionBuilder::agent_behaviour] for this scenario.
    pub fn use_agent_behaviour(mut self, behaviour: AgentHookMut<RV, V>) -> Self {
        if self.agent_behaviour.is_some() {
            panic!("Agent behaviour is already defined for scenario [{}]", self.name);
        }
        self.agent_behaviour = Some(behaviour);
        self
    }

    /// Set the agent teardown hook [ScenarioDefinitionBuilder::teardown_agent_fn] for this scenario.
    pub fn use_agent_teardown(mut self, teardown_agent_fn: AgentHookMut<RV, V>) -> Self {
        self.teardown_agent_fn = Some(teardown_agent_fn);
        self
    }

    /// Set the global teardown hook [ScenarioDefinitionBuilder::teardown_fn] for this scenario.
    pub fn use_teardown(mut self, teardown_fn: GlobalHookTeardown<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let agent_behaviour = self.agent_behaviour.ok_or_else(|| {
            anyhow::anyhow!("Scenario [{}] has no agent behaviour", self.name)
        })?;

        let config = RunConfig::load(&self.default_config_toml, &self.cli)?;

        Ok(ScenarioDefinition {
            name: self.name,
            config,
            setup_fn: self.setup_fn,
            setup_agent_fn: self.setup_agent_fn,
            agent_behaviour,
            teardown_agent_fn: self.teardown_agent_fn,
            teardown_fn: self.teardown_fn,
        })
    }
}
