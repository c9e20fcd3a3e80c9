use std::path::PathBuf;
use std::time::Duration;

use race_tunnel_core::prelude::{deserialize_duration, format_duration, LoadProfile, Stage};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::cli::{RaceTunnelScenarioCli, ReporterOpt};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub sku: String,
    pub reserve_quantity: u32,
    pub conflict_statuses: Vec<u16>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            sku: "test".to_string(),
            reserve_quantity: 1,
            conflict_statuses: vec![409, 429],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Open model: iterations start at a rate that follows the load profile, whatever their
    /// latency.
    #[default]
    RampingArrivalRate,
    /// Closed model: the load profile is the number of agents looping over the behaviour.
    RampingAgents,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub kind: ExecutorKind,
    pub start_target: f64,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    #[serde(deserialize_with = "deserialize_duration")]
    pub acquire_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub tick: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub graceful_stop: Duration,
    #[serde(rename = "stage")]
    pub stages: Vec<Stage>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            kind: ExecutorKind::default(),
            start_target: 0.0,
            min_workers: 50,
            max_workers: 200,
            queue_capacity: 1000,
            acquire_timeout: Duration::from_millis(50),
            tick: Duration::from_millis(10),
            graceful_stop: Duration::from_secs(30),
            stages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on any single call to the service.
    #[serde(deserialize_with = "deserialize_duration")]
    pub call: Duration,
    /// Upper bound on fetching a verification snapshot.
    #[serde(deserialize_with = "deserialize_duration")]
    pub snapshot: Duration,
    /// Pause after the run drains and before the closing snapshot.
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle: Duration,
    /// Pause after the opening snapshot and before load starts.
    #[serde(deserialize_with = "deserialize_duration")]
    pub setup_settle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call: Duration::from_secs(10),
            snapshot: Duration::from_secs(30),
            settle: Duration::from_secs(3),
            setup_settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRunConfig {
    target: TargetConfig,
    executor: ExecutorConfig,
    timeouts: TimeoutConfig,
}

/// Configuration for one run, fixed before the run starts.
///
/// Built from the scenario's built-in TOML, then the `--config` file, then environment variables
/// and CLI flags, each layer overriding the previous one. Sections the runner doesn't know about
/// are kept and can be read by scenarios with [RunConfig::section].
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    pub target: TargetConfig,
    pub executor: ExecutorConfig,
    pub timeouts: TimeoutConfig,
    pub no_progress: bool,
    pub reporter: ReporterOpt,
    profile: LoadProfile,
    document: toml::Table,
}

impl RunConfig {
    pub fn load(default_toml: &str, cli: &RaceTunnelScenarioCli) -> Result<Self, ConfigError> {
        let mut document: toml::Table = toml::from_str(default_toml)?;

        if let Some(path) = &cli.config {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let overlay: toml::Table = toml::from_str(&content)?;
            merge_tables(&mut document, overlay);
        }

        let raw: RawRunConfig = toml::Value::Table(document.clone()).try_into()?;
        let RawRunConfig {
            mut target,
            mut executor,
            timeouts,
        } = raw;

        if let Some(base_url) = &cli.base_url {
            target.base_url = base_url.clone();
        }
        if let Some(token) = &cli.token {
            target.token = Some(token.clone());
        }
        if let Some(sku) = &cli.sku {
            target.sku = sku.clone();
        }
        if !cli.stage.is_empty() {
            executor.stages = cli.stage.clone();
        }
        if let Some(min_workers) = cli.min_workers {
            executor.min_workers = min_workers;
        }
        if let Some(max_workers) = cli.max_workers {
            executor.max_workers = max_workers;
        }

        let profile = validate(&target, &executor, &timeouts)?;

        Ok(Self {
            run_id: cli
                .run_id
                .clone()
                .unwrap_or_else(|| nanoid::nanoid!(10)),
            target,
            executor,
            timeouts,
            no_progress: cli.no_progress,
            reporter: cli.reporter,
            profile,
            document,
        })
    }

    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    /// Deserialize a scenario specific section, for example `[thresholds]`. A missing section
    /// yields the type's default.
    pub fn section<T>(&self, name: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        match self.document.get(name) {
            Some(value) => Ok(value.clone().try_into()?),
            None => Ok(T::default()),
        }
    }

    /// The longest a run can take: the load profile plus the grace period for in-flight work.
    pub fn run_deadline(&self) -> Duration {
        self.profile
            .total_duration()
            .saturating_add(self.executor.graceful_stop)
    }

    /// One line description of the load profile for logs.
    pub fn describe_profile(&self) -> String {
        let stages = self
            .profile
            .stages()
            .iter()
            .map(|stage| format!("{}:{}", stage.target, format_duration(stage.duration)))
            .collect::<Vec<_>>()
            .join(" -> ");
        format!(
            "{:?} from {} via [{}] peaking at {}, workers {}..{}",
            self.executor.kind,
            self.profile.start_target(),
            stages,
            self.profile.peak_target(),
            self.executor.min_workers,
            self.executor.max_workers
        )
    }
}

fn validate(
    target: &TargetConfig,
    executor: &ExecutorConfig,
    timeouts: &TimeoutConfig,
) -> Result<LoadProfile, ConfigError> {
    url::Url::parse(&target.base_url).map_err(|e| {
        ConfigError::Invalid(format!("target.base_url `{}` is not a URL: {e}", target.base_url))
    })?;
    if target.reserve_quantity == 0 {
        return Err(ConfigError::Invalid(
            "target.reserve_quantity must be at least 1".to_string(),
        ));
    }
    if executor.max_workers == 0 {
        return Err(ConfigError::Invalid(
            "executor.max_workers must be at least 1".to_string(),
        ));
    }
    if executor.min_workers > executor.max_workers {
        return Err(ConfigError::Invalid(format!(
            "executor.min_workers ({}) is greater than executor.max_workers ({})",
            executor.min_workers, executor.max_workers
        )));
    }
    if executor.queue_capacity == 0 {
        return Err(ConfigError::Invalid(
            "executor.queue_capacity must be at least 1".to_string(),
        ));
    }
    if executor.tick.is_zero() {
        return Err(ConfigError::Invalid(
            "executor.tick must be greater than zero".to_string(),
        ));
    }
    if timeouts.call.is_zero() || timeouts.snapshot.is_zero() {
        return Err(ConfigError::Invalid(
            "timeouts.call and timeouts.snapshot must be greater than zero".to_string(),
        ));
    }

    LoadProfile::with_start_target(executor.start_target, executor.stages.clone())
        .map_err(|e| ConfigError::Invalid(format!("executor: {e}")))
}

/// Overlay `overlay` onto `base`. Tables merge key by key, anything else (arrays included) is
/// replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const BUILT_IN: &str = r#"
        [target]
        base_url = "http://localhost:8080"
        sku = "built-in"

        [executor]
        min_workers = 5
        max_workers = 10

        [[executor.stage]]
        target = 50.0
        duration = "20s"

        [[executor.stage]]
        target = 0.0
        duration = "10s"

        [thresholds]
        discrepancy_minor = 50
    "#;

    fn cli(args: &[&str]) -> RaceTunnelScenarioCli {
        let mut argv = vec!["scenario"];
        argv.extend_from_slice(args);
        RaceTunnelScenarioCli::parse_from(argv)
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Thresholds {
        discrepancy_minor: u64,
        discrepancy_anomaly: u64,
    }

    #[test]
    fn built_in_defaults() {
        let config = RunConfig::load(BUILT_IN, &cli(&["--sku", "built-in"])).unwrap();

        assert_eq!("built-in", config.target.sku);
        assert_eq!(vec![409, 429], config.target.conflict_statuses);
        assert_eq!(ExecutorKind::RampingArrivalRate, config.executor.kind);
        assert_eq!(Duration::from_secs(30), config.profile().total_duration());
        assert_eq!(Duration::from_secs(60), config.run_deadline());
        assert_eq!(Duration::from_secs(10), config.timeouts.call);
        assert_eq!(10, config.run_id.len());
    }

    #[test]
    fn file_overrides_built_in_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            [target]
            sku = "from-file"
            conflict_statuses = [409]

            [executor]
            kind = "ramping-agents"
            max_workers = 30

            [[executor.stage]]
            target = 30.0
            duration = "1m"

            [timeouts]
            settle = "500ms"
            "#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = RunConfig::load(
            BUILT_IN,
            &cli(&[
                "--config",
                &path,
                "--sku",
                "from-cli",
                "--min-workers",
                "1",
                "--run-id",
                "run-1",
            ]),
        )
        .unwrap();

        assert_eq!("from-cli", config.target.sku);
        assert_eq!(vec![409], config.target.conflict_statuses);
        assert_eq!(ExecutorKind::RampingAgents, config.executor.kind);
        assert_eq!(1, config.executor.min_workers);
        assert_eq!(30, config.executor.max_workers);
        // Arrays are replaced rather than appended.
        assert_eq!(1, config.profile().stages().len());
        assert_eq!(Duration::from_millis(500), config.timeouts.settle);
        assert_eq!("run-1", config.run_id);
    }

    #[test]
    fn stage_flags_replace_profile() {
        let config = RunConfig::load(BUILT_IN, &cli(&["--stage", "5:2s"])).unwrap();

        assert_eq!(vec![Stage::new(5.0, Duration::from_secs(2))], config.profile().stages());
    }

    #[test]
    fn reads_scenario_sections() {
        let config = RunConfig::load(BUILT_IN, &cli(&[])).unwrap();

        let thresholds: Thresholds = config.section("thresholds").unwrap();
        assert_eq!(
            Thresholds {
                discrepancy_minor: 50,
                discrepancy_anomaly: 0
            },
            thresholds
        );

        let missing: Thresholds = config.section("journey").unwrap();
        assert_eq!(Thresholds::default(), missing);
    }

    #[test]
    fn describes_the_profile() {
        let config = RunConfig::load(BUILT_IN, &cli(&[])).unwrap();

        assert_eq!(
            "RampingArrivalRate from 0 via [50:20s -> 0:10s] peaking at 50, workers 5..10",
            config.describe_profile()
        );
    }

    #[test]
    fn rejects_invalid_configuration() {
        let err = RunConfig::load(BUILT_IN, &cli(&["--min-workers", "11"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

        let err = RunConfig::load(BUILT_IN, &cli(&["--base-url", "not a url"])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{err}");

        let err = RunConfig::load("[executor]\n", &cli(&[])).unwrap_err();
        assert!(err.to_string().contains("at least one stage"), "{err}");

        let err = RunConfig::load(
            "[executor]\ngraceful_stop = \"99999999999999999999h\"\n[[executor.stage]]\ntarget = 1.0\nduration = \"1s\"\n",
            &cli(&[]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("too long"), "{err}");

        let err = RunConfig::load("[executor\n", &cli(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");

        let err = RunConfig::load(BUILT_IN, &cli(&["--config", "/does/not/exist.toml"]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }), "{err}");
    }
}
