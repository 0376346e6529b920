//! Collaborator seams: where candidates, policies and overrides come from.
//!
//! The engine owns none of this data. Each call returns a point-in-time
//! snapshot that is used for one evaluation and then dropped.

use async_trait::async_trait;
use kplane_core::{Candidate, Override, PlacementPolicy, WorkloadRequest};

#[async_trait]
pub trait CandidateSupplier: Send + Sync {
    /// Clusters eligible to host `workload`, as selected by its selector.
    async fn list_candidates(&self, workload: &WorkloadRequest) -> anyhow::Result<Vec<Candidate>>;
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Policies that may apply to `workload`. The engine re-checks scope.
    async fn get_policies(&self, workload: &WorkloadRequest) -> anyhow::Result<Vec<PlacementPolicy>>;
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Overrides targeting `workload` that have not been revoked as of
    /// `as_of` (epoch millis). Expired entries may be returned; the engine
    /// records them as skipped.
    async fn list_active_overrides(
        &self,
        workload: &WorkloadRequest,
        as_of: u64,
    ) -> anyhow::Result<Vec<Override>>;
}

// ── Static collaborators ───────────────────────────────────────────

/// A fixed candidate list, filtered by the workload's label selector.
#[derive(Debug, Clone, Default)]
pub struct StaticCandidates {
    candidates: Vec<Candidate>,
}

impl StaticCandidates {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl CandidateSupplier for StaticCandidates {
    async fn list_candidates(&self, workload: &WorkloadRequest) -> anyhow::Result<Vec<Candidate>> {
        Ok(self
            .candidates
            .iter()
            .filter(|c| {
                workload
                    .selector
                    .iter()
                    .all(|(k, v)| c.labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticPolicies {
    policies: Vec<PlacementPolicy>,
}

impl StaticPolicies {
    pub fn new(policies: Vec<PlacementPolicy>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl PolicyStore for StaticPolicies {
    async fn get_policies(&self, workload: &WorkloadRequest) -> anyhow::Result<Vec<PlacementPolicy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.scope.applies_to(workload))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticOverrides {
    overrides: Vec<Override>,
}

impl StaticOverrides {
    pub fn new(overrides: Vec<Override>) -> Self {
        Self { overrides }
    }
}

#[async_trait]
impl OverrideStore for StaticOverrides {
    async fn list_active_overrides(
        &self,
        workload: &WorkloadRequest,
        _as_of: u64,
    ) -> anyhow::Result<Vec<Override>> {
        Ok(self
            .overrides
            .iter()
            .filter(|o| o.target.workload.matches(workload))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kplane_core::ResourceQuantity;

    fn cluster(name: &str, env: &str) -> Candidate {
        Candidate::new(name, ResourceQuantity::new(1000, 1000), ResourceQuantity::ZERO)
            .with_label("env", env)
    }

    #[tokio::test]
    async fn static_candidates_honour_selector() {
        let supplier = StaticCandidates::new(vec![cluster("a", "prod"), cluster("b", "dev")]);
        let mut workload = WorkloadRequest::new("root", "default", "api");
        assert_eq!(supplier.list_candidates(&workload).await.unwrap().len(), 2);

        workload.selector.insert("env".into(), "prod".into());
        let found = supplier.list_candidates(&workload).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cluster, "a");
    }
}
