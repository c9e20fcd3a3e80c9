use inventory_race_runner::prelude::*;

fn setup(ctx: &mut RunnerContext<InventoryRunnerContext>) -> HookResult {
    configure_client(ctx)?;
    capture_initial_inventory(ctx)?;

    Ok(())
}

fn main() -> RaceTunnelResult<()> {
    let builder =
        ScenarioDefinitionBuilder::<InventoryRunnerContext, InventoryAgentContext>::new_with_init(
            env!("CARGO_PKG_NAME"),
        )
        .with_default_config_toml(include_str!("../configs/default.toml"))
        .use_setup(setup)
        .use_agent_setup(use_agent_client)
        .use_agent_behaviour(reserve_once)
        .use_teardown(verify_inventory);

    let verdict = run(builder)?;

    std::process::exit(verdict.exit_code());
}
