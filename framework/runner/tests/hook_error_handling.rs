use std::sync::Arc;

use race_tunnel_runner::counters::{
    AGENT_SETUP_FAILED, ITERATIONS_COMPLETED, ITERATIONS_FAILED, ITERATIONS_PANICKED,
};
use race_tunnel_runner::prelude::{
    run, AgentBailError, AgentContext, HookResult, RaceTunnelScenarioCli, ReporterOpt,
    RunnerContext, ScenarioDefinitionBuilder, UserValuesConstraint, Verdict,
};

const SHORT_RUN: &str = r#"
    [executor]
    min_workers = 2
    max_workers = 4
    graceful_stop = "2s"

    [[executor.stage]]
    target = 20.0
    duration = "1s"
"#;

#[derive(Default, Debug)]
struct RunnerContextValue {}

impl UserValuesConstraint for RunnerContextValue {}

#[derive(Default, Debug)]
struct AgentContextValue {
    value: i32,
}

impl UserValuesConstraint for AgentContextValue {}

fn sample_cli_cfg() -> RaceTunnelScenarioCli {
    RaceTunnelScenarioCli {
        config: None,
        base_url: None,
        token: None,
        sku: None,
        stage: vec![],
        min_workers: None,
        max_workers: None,
        no_progress: true,
        reporter: ReporterOpt::Noop,
        run_id: None,
    }
}

fn scenario(name: &str) -> ScenarioDefinitionBuilder<RunnerContextValue, AgentContextValue> {
    ScenarioDefinitionBuilder::new(name, sample_cli_cfg()).with_default_config_toml(SHORT_RUN)
}

fn noop_behaviour(_ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>) -> HookResult {
    Ok(())
}

#[test]
fn propagate_error_in_setup_hook() {
    fn setup(_ctx: &mut RunnerContext<RunnerContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in setup hook"))
    }

    let scenario = scenario("propagate_error_in_setup_hook")
        .use_setup(setup)
        .use_agent_behaviour(noop_behaviour);

    let result = run(scenario);

    assert!(result.is_err());
    assert_eq!(result.unwrap_err().to_string(), "Error in setup hook");
}

#[test]
fn missing_behaviour_is_an_error() {
    let result = run(scenario("missing_behaviour_is_an_error"));

    assert!(result.is_err());
}

#[test]
fn invalid_config_is_an_error() {
    let scenario = ScenarioDefinitionBuilder::<RunnerContextValue, AgentContextValue>::new(
        "invalid_config_is_an_error",
        sample_cli_cfg(),
    )
    .with_default_config_toml("[executor]\nmin_workers = 10\nmax_workers = 2\n")
    .use_agent_behaviour(noop_behaviour);

    let result = run(scenario);

    assert!(result.is_err());
}

#[test]
fn capture_error_in_agent_setup_and_continue() {
    fn agent_setup(_ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>) -> HookResult {
        Err(anyhow::anyhow!("Error in agent setup hook"))
    }

    fn teardown(ctx: Arc<RunnerContext<RunnerContextValue>>) -> anyhow::Result<Verdict> {
        let snapshot = ctx.reporter().snapshot();
        assert!(snapshot.counter(AGENT_SETUP_FAILED) > 0);
        assert_eq!(0, snapshot.counter(ITERATIONS_COMPLETED));
        Ok(Verdict::Pass)
    }

    let scenario = scenario("capture_error_in_agent_setup_and_continue")
        .use_agent_setup(agent_setup)
        .use_agent_behaviour(noop_behaviour)
        .use_teardown(teardown);

    let result = run(scenario);

    assert_eq!(Verdict::Pass, result.unwrap());
}

#[test]
fn count_errors_in_agent_behaviour() {
    fn agent_behaviour(
        ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        ctx.get_mut().value += 1;
        if ctx.get().value % 2 == 0 {
            return Err(anyhow::anyhow!("Error in agent behaviour hook"));
        }
        Ok(())
    }

    fn teardown(ctx: Arc<RunnerContext<RunnerContextValue>>) -> anyhow::Result<Verdict> {
        let snapshot = ctx.reporter().snapshot();
        assert!(snapshot.counter(ITERATIONS_COMPLETED) > 0);
        assert!(snapshot.counter(ITERATIONS_FAILED) > 0);
        Ok(Verdict::Pass)
    }

    let scenario = scenario("count_errors_in_agent_behaviour")
        .use_agent_behaviour(agent_behaviour)
        .use_teardown(teardown);

    assert_eq!(Verdict::Pass, run(scenario).unwrap());
}

#[test]
fn bail_retires_the_agent() {
    fn agent_behaviour(
        ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        ctx.get_mut().value += 1;
        if ctx.get().value > 1 {
            return Err(AgentBailError::default().into());
        }
        Ok(())
    }

    fn teardown(ctx: Arc<RunnerContext<RunnerContextValue>>) -> anyhow::Result<Verdict> {
        let snapshot = ctx.reporter().snapshot();
        assert!(snapshot.counter(ITERATIONS_COMPLETED) > 0);
        Ok(Verdict::Pass)
    }

    let scenario = scenario("bail_retires_the_agent")
        .use_agent_behaviour(agent_behaviour)
        .use_teardown(teardown);

    assert_eq!(Verdict::Pass, run(scenario).unwrap());
}

#[test]
fn panic_in_agent_behaviour_is_counted() {
    fn agent_behaviour(
        ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        if ctx.agent_id() == "agent-0" {
            panic!("Panic in agent behaviour hook");
        }
        Ok(())
    }

    fn teardown(ctx: Arc<RunnerContext<RunnerContextValue>>) -> anyhow::Result<Verdict> {
        let snapshot = ctx.reporter().snapshot();
        assert!(snapshot.counter(ITERATIONS_PANICKED) > 0);
        Ok(Verdict::Pass)
    }

    let scenario = scenario("panic_in_agent_behaviour_is_counted")
        .use_agent_behaviour(agent_behaviour)
        .use_teardown(teardown);

    assert_eq!(Verdict::Pass, run(scenario).unwrap());
}

#[test]
fn capture_error_in_agent_teardown() {
    fn agent_teardown(
        _ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        Err(anyhow::anyhow!("Error in agent teardown hook"))
    }

    let scenario = scenario("capture_error_in_agent_teardown")
        .use_agent_behaviour(noop_behaviour)
        .use_agent_teardown(agent_teardown);

    assert_eq!(Verdict::Pass, run(scenario).unwrap());
}

#[test]
fn error_in_teardown_is_indeterminate() {
    fn teardown(_ctx: Arc<RunnerContext<RunnerContextValue>>) -> anyhow::Result<Verdict> {
        Err(anyhow::anyhow!("Error in teardown hook"))
    }

    let scenario = scenario("error_in_teardown_is_indeterminate")
        .use_agent_behaviour(noop_behaviour)
        .use_teardown(teardown);

    assert_eq!(Verdict::Indeterminate, run(scenario).unwrap());
}

#[test]
fn force_stop_still_reaches_teardown() {
    fn agent_behaviour(
        ctx: &mut AgentContext<RunnerContextValue, AgentContextValue>,
    ) -> HookResult {
        ctx.get_mut().value += 1;
        if ctx.get().value > 2 {
            ctx.runner_context().force_stop_scenario();
        }
        Ok(())
    }

    fn teardown(_ctx: Arc<RunnerContext<RunnerContextValue>>) -> anyhow::Result<Verdict> {
        Ok(Verdict::Marginal)
    }

    let scenario = scenario("force_stop_still_reaches_teardown")
        .use_agent_behaviour(agent_behaviour)
        .use_teardown(teardown);

    assert_eq!(Verdict::Marginal, run(scenario).unwrap());
}
