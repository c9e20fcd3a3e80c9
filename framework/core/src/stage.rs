use std::time::Duration;

use serde::Deserialize;

use crate::duration::deserialize_duration;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("a load profile needs at least one stage")]
    Empty,
    #[error("stage {index} has target {target}, targets must be finite and non-negative")]
    InvalidTarget { index: usize, target: f64 },
    #[error("start target {0} must be finite and non-negative")]
    InvalidStartTarget(f64),
    #[error("the stage durations add up to more than a duration can hold")]
    TooLong,
}

/// One leg of a load profile. The target is reached at the end of `duration`, ramping linearly
/// from wherever the previous stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Stage {
    pub target: f64,
    #[serde(deserialize_with = "deserialize_duration")]
    pub duration: Duration,
}

impl Stage {
    pub fn new(target: f64, duration: Duration) -> Self {
        Self { target, duration }
    }
}

/// A validated, immutable stage list describing a piecewise-linear target curve over time.
///
/// What the target means is up to the executor reading it: iterations per second for an
/// arrival-rate run, concurrent agents for a ramping-agents run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadProfile {
    start_target: f64,
    stages: Vec<Stage>,
}

fn valid_target(target: f64) -> bool {
    target.is_finite() && target >= 0.0
}

impl LoadProfile {
    /// Build a profile that ramps up from zero.
    pub fn new(stages: Vec<Stage>) -> Result<Self, StageError> {
        Self::with_start_target(0.0, stages)
    }

    pub fn with_start_target(start_target: f64, stages: Vec<Stage>) -> Result<Self, StageError> {
        if !valid_target(start_target) {
            return Err(StageError::InvalidStartTarget(start_target));
        }
        if stages.is_empty() {
            return Err(StageError::Empty);
        }
        if let Some((index, stage)) = stages
            .iter()
            .enumerate()
            .find(|(_, stage)| !valid_target(stage.target))
        {
            return Err(StageError::InvalidTarget {
                index,
                target: stage.target,
            });
        }
        if stages
            .iter()
            .try_fold(Duration::ZERO, |total, stage| total.checked_add(stage.duration))
            .is_none()
        {
            return Err(StageError::TooLong);
        }

        Ok(Self {
            start_target,
            stages,
        })
    }

    pub fn start_target(&self) -> f64 {
        self.start_target
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    pub fn peak_target(&self) -> f64 {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .fold(self.start_target, f64::max)
    }

    /// The target at `elapsed` into the run, or `None` once the last stage has finished.
    ///
    /// A zero-length stage is an instantaneous jump to its target.
    pub fn target_at(&self, elapsed: Duration) -> Option<f64> {
        let mut from = self.start_target;
        let mut offset = Duration::ZERO;
        for stage in &self.stages {
            let end = offset + stage.duration;
            if elapsed < end {
                let fraction = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                return Some(from + (stage.target - from) * fraction);
            }
            from = stage.target;
            offset = end;
        }

        None
    }

    /// Integral of the target curve from the start of the run up to `elapsed`, clamped at the end
    /// of the profile.
    ///
    /// For an arrival-rate profile this is the number of iterations that should have started by
    /// `elapsed`.
    pub fn cumulative_at(&self, elapsed: Duration) -> f64 {
        let mut total = 0.0;
        let mut from = self.start_target;
        let mut offset = Duration::ZERO;
        for stage in &self.stages {
            let end = offset + stage.duration;
            let length = stage.duration.as_secs_f64();
            if elapsed >= end {
                total += (from + stage.target) / 2.0 * length;
            } else {
                let into = (elapsed - offset).as_secs_f64();
                let slope = (stage.target - from) / length;
                total += from * into + slope * into * into / 2.0;
                return total;
            }
            from = stage.target;
            offset = end;
        }

        total
    }
}
