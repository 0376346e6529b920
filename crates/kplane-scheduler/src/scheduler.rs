//! Scheduler: runs the configured scoring algorithm.
//!
//! The algorithm is an injected strategy; `from_config` builds the stock
//! ones. Output is ordered best first, ties broken by cluster identifier,
//! so that identical inputs always rank identically.

use std::cmp::Ordering;
use std::sync::Arc;

use kplane_core::config::{SchedulerAlgorithm, SchedulerConfig};
use kplane_core::{Candidate, ScoredCandidate, WorkloadRequest};
use tracing::debug;

use crate::algorithm::SchedulingAlgorithm;
use crate::error::{SchedulerError, SchedulerResult};
use crate::least_loaded::LeastLoaded;
use crate::location::LocationAware;
use crate::random::SeededRandom;
use crate::round_robin::RoundRobin;

#[derive(Clone)]
pub struct Scheduler {
    algorithm: Arc<dyn SchedulingAlgorithm>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("algorithm", &self.algorithm.name())
            .finish()
    }
}

impl Scheduler {
    pub fn new(algorithm: Arc<dyn SchedulingAlgorithm>) -> Self {
        Self { algorithm }
    }

    /// Build the stock algorithm named by `config`.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        let algorithm: Arc<dyn SchedulingAlgorithm> = match config.algorithm {
            SchedulerAlgorithm::RoundRobin => Arc::new(RoundRobin::new()),
            SchedulerAlgorithm::LeastLoaded => Arc::new(LeastLoaded::new()),
            SchedulerAlgorithm::Random => Arc::new(SeededRandom::seeded(config.random_seed)),
            SchedulerAlgorithm::LocationAware => Arc::new(LocationAware::new(config.location.clone())),
        };
        Self { algorithm }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Score every candidate, best first.
    pub fn score(
        &self,
        request: &WorkloadRequest,
        candidates: &[Candidate],
    ) -> SchedulerResult<Vec<ScoredCandidate>> {
        if candidates.is_empty() {
            return Err(SchedulerError::NoCandidates(request.id()));
        }

        let mut scores = self.algorithm.score(request, candidates);
        debug_assert_eq!(scores.len(), candidates.len());
        scores.sort_by(rank_order);

        for s in &scores {
            debug!(
                workload = %request.id(),
                cluster = %s.cluster(),
                score = s.score,
                algorithm = self.algorithm.name(),
                "scored candidate"
            );
        }
        Ok(scores)
    }
}

/// Best score first; equal scores ordered by cluster identifier.
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.cluster().cmp(b.cluster()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::testing::candidate;

    #[test]
    fn empty_candidates_is_an_error() {
        let scheduler = Scheduler::from_config(&SchedulerConfig::default());
        let req = WorkloadRequest::new("root", "default", "api");
        let result = scheduler.score(&req, &[]);
        assert_eq!(
            result,
            Err(SchedulerError::NoCandidates("root:default/api".to_string()))
        );
    }

    #[test]
    fn least_loaded_ranks_thirty_above_seventy() {
        let scheduler = Scheduler::from_config(&SchedulerConfig::default());
        let req = WorkloadRequest::new("root", "default", "api");
        let ranked = scheduler
            .score(&req, &[candidate("seventy", 0.7), candidate("thirty", 0.3)])
            .unwrap();
        assert_eq!(ranked[0].cluster(), "thirty");
        assert_eq!(ranked[1].cluster(), "seventy");
    }

    #[test]
    fn ties_break_by_cluster_id() {
        let scheduler = Scheduler::from_config(&SchedulerConfig::default());
        let req = WorkloadRequest::new("root", "default", "api");
        let ranked = scheduler
            .score(&req, &[candidate("zeta", 0.5), candidate("alpha", 0.5), candidate("mid", 0.5)])
            .unwrap();
        let ids: Vec<_> = ranked.iter().map(|s| s.cluster()).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn from_config_selects_algorithm() {
        let mut config = SchedulerConfig::default();
        for (algorithm, name) in [
            (SchedulerAlgorithm::RoundRobin, "round-robin"),
            (SchedulerAlgorithm::LeastLoaded, "least-loaded"),
            (SchedulerAlgorithm::Random, "random"),
            (SchedulerAlgorithm::LocationAware, "location-aware"),
        ] {
            config.algorithm = algorithm;
            assert_eq!(Scheduler::from_config(&config).algorithm_name(), name);
        }
    }

    #[test]
    fn injected_algorithm_is_used() {
        struct Constant;
        impl SchedulingAlgorithm for Constant {
            fn score(&self, _: &WorkloadRequest, c: &[Candidate]) -> Vec<ScoredCandidate> {
                c.iter()
                    .map(|c| ScoredCandidate {
                        candidate: c.clone(),
                        score: 10.0,
                        algorithm: "constant".into(),
                    })
                    .collect()
            }
            fn name(&self) -> &'static str {
                "constant"
            }
        }

        let scheduler = Scheduler::new(Arc::new(Constant));
        let req = WorkloadRequest::new("root", "default", "api");
        let ranked = scheduler.score(&req, &[candidate("b", 0.0), candidate("a", 0.0)]).unwrap();
        assert_eq!(ranked[0].cluster(), "a");
        assert!(ranked.iter().all(|s| s.score == 10.0));
    }
}
