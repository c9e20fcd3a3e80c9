use anyhow::Context;
use inventory_client_instrumented::prelude::InventoryClient;
use race_tunnel_runner::prelude::UserValuesConstraint;

#[derive(Default, Debug)]
pub struct InventoryAgentContext {
    pub(crate) client: Option<InventoryClient>,
}

impl UserValuesConstraint for InventoryAgentContext {}

impl InventoryAgentContext {
    /// This agent's client, set up by [crate::common::use_agent_client].
    pub fn client(&self) -> anyhow::Result<&InventoryClient> {
        self.client
            .as_ref()
            .context("No client for this agent, call 'use_agent_client' in the agent setup")
    }
}
