//! The scheduling strategy seam.

use kplane_core::{Candidate, ScoredCandidate, WorkloadRequest};

/// Upper bound of the score range shared by every algorithm.
pub const MAX_SCORE: f64 = 100.0;

/// A candidate scoring strategy.
///
/// Implementations must be deterministic for identical inputs (the random
/// algorithm is seeded) and must return exactly one scored entry per
/// input candidate.
pub trait SchedulingAlgorithm: Send + Sync {
    /// Score every candidate for `request`.
    fn score(&self, request: &WorkloadRequest, candidates: &[Candidate]) -> Vec<ScoredCandidate>;

    /// Returns the algorithm name recorded on each scored candidate.
    fn name(&self) -> &'static str;
}

/// Candidates ordered by cluster identifier, so that algorithms which
/// depend on position are independent of supplier ordering.
pub(crate) fn by_cluster_id(candidates: &[Candidate]) -> Vec<&Candidate> {
    let mut ordered: Vec<&Candidate> = candidates.iter().collect();
    ordered.sort_by(|a, b| a.cluster.cmp(&b.cluster));
    ordered
}

pub(crate) fn scored(candidate: &Candidate, score: f64, algorithm: &'static str) -> ScoredCandidate {
    ScoredCandidate {
        candidate: candidate.clone(),
        score: score.clamp(0.0, MAX_SCORE),
        algorithm: algorithm.to_string(),
    }
}
