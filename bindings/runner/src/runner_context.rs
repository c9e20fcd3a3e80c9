use anyhow::Context;
use inventory_client_instrumented::prelude::{InventoryClient, InventoryState};
use race_tunnel_runner::prelude::UserValuesConstraint;

use crate::journey::JourneyConfig;
use crate::verifier::SnapshotError;

/// Run-wide values for inventory scenarios, filled in by the setup hooks in [crate::common].
#[derive(Default, Debug)]
pub struct InventoryRunnerContext {
    pub(crate) client: Option<InventoryClient>,
    pub(crate) initial_inventory: Option<Result<InventoryState, SnapshotError>>,
    pub(crate) journey: Option<JourneyConfig>,
}

impl UserValuesConstraint for InventoryRunnerContext {}

impl InventoryRunnerContext {
    /// The shared client, set up by [crate::common::configure_client].
    pub fn client(&self) -> anyhow::Result<&InventoryClient> {
        self.client
            .as_ref()
            .context("No inventory client, call 'configure_client' in the scenario 'setup'")
    }

    /// The opening snapshot, if [crate::common::capture_initial_inventory] has run.
    pub fn initial_inventory(&self) -> Option<&Result<InventoryState, SnapshotError>> {
        self.initial_inventory.as_ref()
    }

    pub fn journey_config(&self) -> anyhow::Result<&JourneyConfig> {
        self.journey
            .as_ref()
            .context("No journey configuration, call 'configure_journey' in the scenario 'setup'")
    }
}
