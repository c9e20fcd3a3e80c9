use std::sync::Arc;

use anyhow::Context;
use inventory_client_instrumented::prelude::{ClientOptions, InventoryClient, InventoryState};
use race_tunnel_runner::prelude::{
    format_duration, AgentContext, ClassifyOutcome, HookResult, Outcome, RaceTunnelResult,
    RunnerContext, Verdict,
};

use crate::context::InventoryAgentContext;
use crate::counters::{journey_aborted_at, JOURNEYS_ABORTED, JOURNEYS_COMPLETED};
use crate::journey::{Journey, JourneyConfig};
use crate::runner_context::InventoryRunnerContext;
use crate::verifier::{SnapshotError, Thresholds, VerificationPolicy, VerificationReport};

/// Operation id that reserve calls are reported under.
pub const RESERVE_OPERATION: &str = "inventory_reserve";

/// Build the shared [InventoryClient] from the `[target]` and `[timeouts]` configuration and store
/// it in the [InventoryRunnerContext].
///
/// Call this first in the scenario `setup`, every other hook here needs the client.
pub fn configure_client(ctx: &mut RunnerContext<InventoryRunnerContext>) -> HookResult {
    let config = ctx.config().clone();
    if config.target.token.is_none() {
        log::warn!("No bearer token configured, calls will be sent unauthenticated");
    }

    let client = InventoryClient::new(
        ClientOptions {
            base_url: config.target.base_url.clone(),
            token: config.target.token.clone(),
            call_timeout: config.timeouts.call,
            conflict_statuses: config.target.conflict_statuses.clone(),
        },
        ctx.reporter(),
    )
    .context("Failed to create the inventory client")?;

    log::info!("Targeting {:?}", client);
    ctx.get_mut().client = Some(client);

    Ok(())
}

/// Take the opening inventory snapshot, then give the service `setup_settle` to go quiet before
/// load starts.
///
/// A failed snapshot doesn't stop the run. Checks that need it are reported as indeterminate.
pub fn capture_initial_inventory(ctx: &mut RunnerContext<InventoryRunnerContext>) -> HookResult {
    let config = ctx.config().clone();
    let client = ctx.get().client()?.clone();

    log::info!("Taking initial inventory snapshot of {}", config.target.sku);
    let capture = ctx.executor().execute_in_place(async {
        Ok(client
            .snapshot_inventory(&config.target.sku, config.timeouts.snapshot)
            .await
            .map_err(SnapshotError::from))
    })?;

    match &capture {
        Ok(state) => log_state("Initial", state),
        Err(e) => log::error!("{e}. Checks that need the initial state will be indeterminate"),
    }
    ctx.get_mut().initial_inventory = Some(capture);

    let settle = config.timeouts.setup_settle;
    if !settle.is_zero() {
        log::info!("Waiting {} before starting load", format_duration(settle));
        ctx.executor().execute_in_place(async move {
            tokio::time::sleep(settle).await;
            Ok(())
        })?;
    }

    Ok(())
}

/// Read the `[journey]` configuration section into the [InventoryRunnerContext].
pub fn configure_journey(ctx: &mut RunnerContext<InventoryRunnerContext>) -> HookResult {
    let journey: JourneyConfig = ctx
        .config()
        .section("journey")
        .context("Invalid [journey] configuration")?;
    ctx.get_mut().journey = Some(journey);

    Ok(())
}

/// Agent setup hook giving the agent its own handle on the shared client.
pub fn use_agent_client(
    ctx: &mut AgentContext<InventoryRunnerContext, InventoryAgentContext>,
) -> HookResult {
    let client = ctx.runner_context().get().client()?.clone();
    ctx.get_mut().client = Some(client);

    Ok(())
}

/// Agent behaviour making one reserve call for the configured SKU and quantity.
///
/// A conflict is an expected answer under contention, so only other failures fail the iteration.
pub fn reserve_once(
    ctx: &mut AgentContext<InventoryRunnerContext, InventoryAgentContext>,
) -> HookResult {
    let runner_context = ctx.runner_context().clone();
    let target = &runner_context.config().target;
    let client = ctx.get().client()?;

    let result = runner_context.executor().execute_in_place(async {
        Ok(client.reserve(&target.sku, target.reserve_quantity).await)
    })?;

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.outcome() == Outcome::Conflict => Ok(()),
        Err(e) => Err(anyhow::Error::new(e).context("Reserve call failed")),
    }
}

/// Agent behaviour running one full shopper journey and counting whether it completed.
pub fn run_journey(
    ctx: &mut AgentContext<InventoryRunnerContext, InventoryAgentContext>,
) -> HookResult {
    let runner_context = ctx.runner_context().clone();
    let config = runner_context.get().journey_config()?;
    let sku = &runner_context.config().target.sku;
    let client = ctx.get().client()?;

    let result = runner_context
        .executor()
        .execute_in_place(async { Ok(Journey::new(client, sku, config).run().await) })?;

    let reporter = runner_context.reporter();
    match result {
        Ok(()) => {
            reporter.increment(JOURNEYS_COMPLETED);
            Ok(())
        }
        Err(abort) => {
            reporter.increment(JOURNEYS_ABORTED);
            reporter.increment(&journey_aborted_at(abort.step.label()));
            Err(abort.into())
        }
    }
}

/// Teardown hook for reserve scenarios. Waits for the service to settle, takes the closing
/// snapshot, prints the report and returns its verdict.
pub fn verify_inventory(ctx: Arc<RunnerContext<InventoryRunnerContext>>) -> RaceTunnelResult<Verdict> {
    let config = ctx.config();

    let after = match ctx.get().client() {
        Ok(client) => ctx.executor().execute_to_completion(async {
            let settle = config.timeouts.settle;
            log::info!(
                "Waiting {} before taking the final inventory snapshot",
                format_duration(settle)
            );
            tokio::time::sleep(settle).await;

            Ok(client
                .snapshot_inventory(&config.target.sku, config.timeouts.snapshot)
                .await
                .map_err(SnapshotError::from))
        })?,
        Err(e) => Err(SnapshotError::Unavailable(e.to_string())),
    };
    match &after {
        Ok(state) => log_state("Final", state),
        Err(e) => log::error!("{e}. Inventory invariants can't be checked"),
    }

    let missing = Err(SnapshotError::Unavailable(
        "no initial snapshot was taken".to_string(),
    ));
    let before = ctx.get().initial_inventory().unwrap_or(&missing);

    let policy = VerificationPolicy {
        thresholds: thresholds(&ctx)?,
        units_per_success: i64::from(config.target.reserve_quantity),
        operation: Some(RESERVE_OPERATION.to_string()),
        journeys: false,
    };

    let report = VerificationReport::evaluate(
        ctx.run_id(),
        Some((before, &after)),
        &ctx.reporter().snapshot(),
        &policy,
    );
    print_report(&report);

    Ok(report.verdict)
}

/// Teardown hook for journey scenarios, judged on error rates, latency and journey completion.
pub fn verify_journeys(ctx: Arc<RunnerContext<InventoryRunnerContext>>) -> RaceTunnelResult<Verdict> {
    let policy = VerificationPolicy {
        thresholds: thresholds(&ctx)?,
        units_per_success: i64::from(ctx.config().target.reserve_quantity),
        operation: None,
        journeys: true,
    };

    let report =
        VerificationReport::evaluate(ctx.run_id(), None, &ctx.reporter().snapshot(), &policy);
    print_report(&report);

    Ok(report.verdict)
}

fn thresholds(ctx: &RunnerContext<InventoryRunnerContext>) -> RaceTunnelResult<Thresholds> {
    ctx.config()
        .section("thresholds")
        .context("Invalid [thresholds] configuration")
}

fn log_state(when: &str, state: &InventoryState) {
    log::info!(
        "{when} inventory of {}: total {}, reserved {}, available {}",
        state.sku,
        state.total_quantity,
        state.reserved_quantity,
        state.available_quantity
    );
}

fn print_report(report: &VerificationReport) {
    for line in report.diagnostics() {
        log::warn!("{line}");
    }
    println!("\n{report}");
}
