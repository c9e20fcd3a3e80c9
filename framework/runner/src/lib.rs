mod cli;
mod config;
mod context;
pub mod counters;
mod definition;
mod executor;
mod init;
mod monitor;
mod pool;
mod progress;
mod run;
mod scheduler;
mod shutdown;

pub mod prelude {
    pub use crate::cli::{RaceTunnelScenarioCli, ReporterOpt};
    pub use crate::config::{
        ConfigError, ExecutorConfig, ExecutorKind, RunConfig, TargetConfig, TimeoutConfig,
    };
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{AgentContext, RunnerContext};
    pub use crate::definition::{HookResult, RaceTunnelResult, ScenarioDefinitionBuilder};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::pool::{PoolStats, ScheduleSaturation};
    pub use crate::run::run;

    pub use race_tunnel_core::prelude::*;
    pub use race_tunnel_instruments::prelude::*;
}
