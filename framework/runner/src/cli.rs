use std::path::PathBuf;

use clap::Parser;
use race_tunnel_core::prelude::{parse_duration, Stage};

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct RaceTunnelScenarioCli {
    /// A TOML configuration file, layered over the scenario's built-in configuration.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the service under test, for example `https://retail.example.com`.
    #[clap(long, env = "RACE_TUNNEL_BASE_URL")]
    pub base_url: Option<String>,

    /// Bearer token sent with every call that requires authentication.
    #[clap(long, env = "RACE_TUNNEL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// The inventory SKU to put under contention.
    #[clap(long, env = "RACE_TUNNEL_SKU")]
    pub sku: Option<String>,

    /// Replace the configured load profile with these stages, given as `target:duration`.
    /// For example `--stage 50:20s --stage 200:1m --stage 0:20s`.
    ///
    /// For an arrival-rate scenario the target is iterations per second, for a ramping-agents
    /// scenario it is the number of concurrent agents.
    #[clap(long, value_parser = parse_stage)]
    pub stage: Vec<Stage>,

    /// Number of worker slots to allocate before load starts.
    #[clap(long)]
    pub min_workers: Option<usize>,

    /// Upper bound on the number of worker slots.
    #[clap(long)]
    pub max_workers: Option<usize>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// How to report metrics at the end of the run.
    #[arg(long, value_enum, default_value_t = ReporterOpt::Summary)]
    pub reporter: ReporterOpt,

    /// Identifier for this run, shown in logs and in the report. Generated when not set.
    #[clap(long)]
    pub run_id: Option<String>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReporterOpt {
    /// Print outcome, operation and counter tables when the run finishes.
    #[default]
    Summary,
    /// Aggregate metrics for verification but print nothing.
    Noop,
}

fn parse_stage(s: &str) -> anyhow::Result<Stage> {
    let (target, duration) = s
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Stage must be given as `target:duration`, got `{s}`"))?;

    let target = target
        .trim()
        .parse::<f64>()
        .map_err(|e| anyhow::anyhow!("Invalid stage target `{target}`: {e}"))?;
    let duration = parse_duration(duration)?;

    Ok(Stage::new(target, duration))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_stage_flags() {
        assert_eq!(
            Stage::new(50.0, Duration::from_secs(20)),
            parse_stage("50:20s").unwrap()
        );
        assert_eq!(
            Stage::new(0.0, Duration::from_secs(90)),
            parse_stage("0:1m30s").unwrap()
        );
        assert!(parse_stage("50").is_err());
        assert!(parse_stage("fast:20s").is_err());
        assert!(parse_stage("50:soon").is_err());
    }

    #[test]
    fn cli_flags_parse() {
        let cli = RaceTunnelScenarioCli::parse_from([
            "reserve_race",
            "--base-url",
            "http://localhost:9000",
            "--stage",
            "10:5s",
            "--stage",
            "0:5s",
            "--reporter",
            "noop",
            "--no-progress",
        ]);

        assert_eq!(Some("http://localhost:9000".to_string()), cli.base_url);
        assert_eq!(2, cli.stage.len());
        assert_eq!(ReporterOpt::Noop, cli.reporter);
        assert!(cli.no_progress);
    }
}
