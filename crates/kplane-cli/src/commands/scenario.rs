//! Scenario files: a workload request plus the collaborator data the
//! engine would normally fetch.

use std::path::Path;

use anyhow::Context;
use kplane_core::{Candidate, EngineConfig, Override, PlacementPolicy, WorkloadRequest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub request: WorkloadRequest,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub policies: Vec<PlacementPolicy>,
    #[serde(default)]
    pub overrides: Vec<Override>,
}

impl Scenario {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing scenario {}", path.display()))
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}
