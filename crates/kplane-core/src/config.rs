//! Engine configuration.
//!
//! Supplied as a structured object at engine construction time. The
//! engine never parses configuration itself; `from_file` exists for the
//! binary and for tests that keep fixtures on disk.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlacementError, PlacementResult};
use crate::types::{CombinationAlgorithm, Labels};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub combiner: CombinerConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub overrides: OverrideConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulerAlgorithm {
    RoundRobin,
    #[default]
    LeastLoaded,
    Random,
    LocationAware,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub algorithm: SchedulerAlgorithm,
    /// Base seed for the random algorithm. Each evaluation mixes it with
    /// the workload identifier.
    pub random_seed: u64,
    pub location: LocationConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: SchedulerAlgorithm::LeastLoaded,
            random_seed: 0,
            location: LocationConfig::default(),
        }
    }
}

/// Location distance model shared by the location-aware scheduler and
/// the `distance()` policy built-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Label keys from finest to coarsest topology level. A preference
    /// matching level `i` is at distance `i / levels.len()`; no match is
    /// distance 1.0.
    pub levels: Vec<String>,
    /// Boost lost per position in the preference list.
    pub position_decay: f64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            levels: vec![
                "topology.kubernetes.io/zone".to_string(),
                "topology.kubernetes.io/region".to_string(),
            ],
            position_decay: 0.25,
        }
    }
}

impl LocationConfig {
    /// Distance in `0.0..=1.0` between a cluster (by its labels) and a
    /// preferred location value.
    pub fn distance(&self, labels: &Labels, preference: &str) -> f64 {
        if self.levels.is_empty() {
            return 1.0;
        }
        self.levels
            .iter()
            .position(|key| labels.get(key).is_some_and(|v| v == preference))
            .map(|level| level as f64 / self.levels.len() as f64)
            .unwrap_or(1.0)
    }

    /// Affinity in `0.0..=1.0` to an ordered preference list: the best
    /// `(1 - distance) * (1 - position * decay)` over all preferences.
    pub fn affinity(&self, labels: &Labels, preferences: &[String]) -> f64 {
        preferences
            .iter()
            .enumerate()
            .map(|(i, pref)| {
                let positional = (1.0 - i as f64 * self.position_decay).max(0.0);
                (1.0 - self.distance(labels, pref)) * positional
            })
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    pub algorithm: CombinationAlgorithm,
    pub scheduler_weight: f64,
    pub policy_weight: f64,
    /// Percentile (0, 1] both rankings must reach in the consensus pass.
    pub consensus_percentile: f64,
    /// Relaxed percentile for the consensus secondary pass.
    pub consensus_relaxed_percentile: f64,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            algorithm: CombinationAlgorithm::WeightedBlend,
            scheduler_weight: 0.5,
            policy_weight: 0.5,
            consensus_percentile: 0.5,
            consensus_relaxed_percentile: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Multiplier on declared capacity that reservations may reach.
    pub overcommit_factor: f64,
    /// Re-derivations allowed after fatal conflicts.
    pub max_retries: u32,
    /// Projected utilization above which an advisory warning is raised.
    pub utilization_warning: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            overcommit_factor: 1.0,
            max_retries: 3,
            utilization_warning: 0.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    pub prefer_boost: f64,
    pub avoid_penalty: f64,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self {
            prefer_boost: 25.0,
            avoid_penalty: 25.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub max_expression_len: usize,
    pub max_depth: usize,
    pub max_eval_steps: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            cache_ttl_secs: 300,
            max_expression_len: 4096,
            max_depth: 64,
            max_eval_steps: 10_000,
        }
    }
}

impl PolicyConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub history_depth: usize,
    pub write_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            history_depth: 10,
            write_timeout_ms: 500,
        }
    }
}

impl RecorderConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no evaluation could run sensibly with.
    pub fn validate(&self) -> PlacementResult<()> {
        let bad = |msg: &str| Err(PlacementError::Config(msg.to_string()));

        let c = &self.combiner;
        let tunables = [
            c.scheduler_weight,
            c.policy_weight,
            c.consensus_percentile,
            c.consensus_relaxed_percentile,
            self.validator.overcommit_factor,
            self.validator.utilization_warning,
            self.overrides.prefer_boost,
            self.overrides.avoid_penalty,
            self.scheduler.location.position_decay,
        ];
        if tunables.iter().any(|v| !v.is_finite()) {
            return bad("numeric tunables must be finite");
        }
        if c.scheduler_weight < 0.0 || c.policy_weight < 0.0 {
            return bad("combiner weights must be non-negative");
        }
        if c.scheduler_weight + c.policy_weight <= 0.0 {
            return bad("combiner weights must not both be zero");
        }
        if !(c.consensus_percentile > 0.0 && c.consensus_percentile <= 1.0) {
            return bad("consensus_percentile must be in (0, 1]");
        }
        if !(c.consensus_relaxed_percentile > 0.0
            && c.consensus_relaxed_percentile <= c.consensus_percentile)
        {
            return bad("consensus_relaxed_percentile must be in (0, consensus_percentile]");
        }
        if self.validator.overcommit_factor < 1.0 {
            return bad("overcommit_factor must be at least 1.0");
        }
        if self.validator.utilization_warning <= 0.0 {
            return bad("utilization_warning must be positive");
        }
        if self.overrides.prefer_boost < 0.0 || self.overrides.avoid_penalty < 0.0 {
            return bad("override boost and penalty must be non-negative");
        }
        if self.policy.cache_capacity == 0 {
            return bad("policy cache_capacity must be at least 1");
        }
        if self.policy.max_eval_steps == 0 || self.policy.max_depth == 0 {
            return bad("policy evaluation limits must be positive");
        }
        if self.scheduler.location.position_decay < 0.0 {
            return bad("location position_decay must be non-negative");
        }
        if self.recorder.history_depth == 0 {
            return bad("recorder history_depth must be at least 1");
        }
        Ok(())
    }
}
