use clap::Parser;
use env_logger::Env;

use crate::cli::RaceTunnelScenarioCli;

/// Parse the scenario's command line and start logging.
///
/// Logs at `info` unless `RUST_LOG` says otherwise, so the run lifecycle and the verification
/// diagnostics are visible by default.
pub fn init() -> RaceTunnelScenarioCli {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    RaceTunnelScenarioCli::parse()
}
