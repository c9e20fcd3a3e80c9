mod common;
mod context;
pub mod counters;
mod journey;
mod runner_context;
mod verifier;

pub mod prelude {
    /// Common hooks for inventory scenarios.
    ///
    /// This is a good place to start if you are getting started writing scenarios.
    pub use crate::common::*;

    pub use crate::context::InventoryAgentContext;
    pub use crate::journey::{Journey, JourneyAbort, JourneyConfig, JourneyStep};
    pub use crate::runner_context::InventoryRunnerContext;
    pub use crate::verifier::{
        CheckResult, DeltaAnalysis, DiscrepancyLevel, InventoryVerification, JourneyAssessment,
        LoadAssessment, SnapshotError, Thresholds, VerificationPolicy, VerificationReport,
    };

    /// Re-export of the `race_tunnel_runner` prelude.
    ///
    /// This is for convenience so that you can depend on a single crate for the runner in your scenarios.
    pub use race_tunnel_runner::prelude::*;

    /// Re-export of the instrumented client for convenience.
    pub use inventory_client_instrumented::prelude::*;
}
