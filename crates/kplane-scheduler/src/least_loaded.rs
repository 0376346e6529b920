//! Least-loaded scoring: `100 * (1 - utilization)`.
//!
//! Utilization is the larger of the CPU and memory ratios. Candidates
//! already at or above capacity score zero; they are still returned, since
//! rejection happens downstream.

use kplane_core::{Candidate, ScoredCandidate, WorkloadRequest};

use crate::algorithm::{MAX_SCORE, SchedulingAlgorithm, scored};

#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl LeastLoaded {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulingAlgorithm for LeastLoaded {
    fn score(&self, _request: &WorkloadRequest, candidates: &[Candidate]) -> Vec<ScoredCandidate> {
        candidates
            .iter()
            .map(|c| scored(c, MAX_SCORE * (1.0 - c.utilization()), self.name()))
            .collect()
    }

    fn name(&self) -> &'static str {
        "least-loaded"
    }
}
