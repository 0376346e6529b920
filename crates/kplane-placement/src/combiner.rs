//! Decision combiner: merges scheduler scores and policy results into a
//! ranked proposal.
//!
//! Hard policy excludes are removed before any strategy runs, so no
//! weighting can bring an excluded cluster back. Every strategy sorts by
//! score and then by cluster identifier, so identical inputs always rank
//! identically.
//!
//! # Strategies
//!
//! - **`WeightedBlend`**: `w_s * scheduler + w_p * policy`
//! - **`PolicyPrimary`**: explicit policy includes first, then policy
//!   score, with the scheduler score breaking ties
//! - **`SchedulerPrimary`**: scheduler order; policies only filter
//! - **`Consensus`**: both rankings must place a cluster above a
//!   percentile; a relaxed second pass fills any remaining slots

use std::cmp::Ordering;
use std::sync::Arc;

use kplane_core::config::CombinerConfig;
use kplane_core::{Candidate, CombinationAlgorithm, Rejection, RejectionStage, WorkloadRequest};
use kplane_policy::CandidatePolicyResult;
use tracing::debug;

/// Everything known about one candidate before combination.
#[derive(Debug, Clone)]
pub struct CandidateEvaluation {
    pub candidate: Candidate,
    pub scheduler_score: f64,
    pub policy: CandidatePolicyResult,
}

impl CandidateEvaluation {
    pub fn cluster(&self) -> &str {
        &self.candidate.cluster
    }
}

/// A candidate with its combined score and the reasons behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: Candidate,
    pub scheduler_score: f64,
    pub policy_score: f64,
    pub final_score: f64,
    /// Added by a Force override rather than by ranking.
    pub forced: bool,
    pub rationale: Vec<String>,
}

impl RankedCandidate {
    fn from_evaluation(e: &CandidateEvaluation, final_score: f64) -> Self {
        let mut rationale = Vec::new();
        if e.policy.is_included() {
            rationale.push(format!(
                "included by policy {}",
                e.policy.deciding_policies.join(", ")
            ));
        }
        Self {
            candidate: e.candidate.clone(),
            scheduler_score: e.scheduler_score,
            policy_score: e.policy.score,
            final_score,
            forced: false,
            rationale,
        }
    }

    pub fn cluster(&self) -> &str {
        &self.candidate.cluster
    }
}

/// Best score first, then cluster identifier.
pub fn by_final_score(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| a.cluster().cmp(b.cluster()))
}

/// A strategy's output: selectable candidates in rank order, plus any it
/// declined to make selectable and why.
#[derive(Debug, Clone, Default)]
pub struct Ranking {
    pub ordered: Vec<RankedCandidate>,
    pub deferred: Vec<(RankedCandidate, String)>,
}

/// A combination algorithm. Receives only candidates no policy excluded.
pub trait CombinationStrategy: Send + Sync {
    fn algorithm(&self) -> CombinationAlgorithm;

    fn rank(&self, eligible: &[&CandidateEvaluation]) -> Ranking;
}

// ── Weighted blend ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct WeightedBlend {
    pub scheduler_weight: f64,
    pub policy_weight: f64,
}

impl CombinationStrategy for WeightedBlend {
    fn algorithm(&self) -> CombinationAlgorithm {
        CombinationAlgorithm::WeightedBlend
    }

    fn rank(&self, eligible: &[&CandidateEvaluation]) -> Ranking {
        let mut ordered: Vec<RankedCandidate> = eligible
            .iter()
            .map(|e| {
                let score =
                    self.scheduler_weight * e.scheduler_score + self.policy_weight * e.policy.score;
                RankedCandidate::from_evaluation(e, score)
            })
            .collect();
        ordered.sort_by(by_final_score);
        Ranking {
            ordered,
            deferred: Vec::new(),
        }
    }
}

// ── Policy primary ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyPrimary;

impl CombinationStrategy for PolicyPrimary {
    fn algorithm(&self) -> CombinationAlgorithm {
        CombinationAlgorithm::PolicyPrimary
    }

    fn rank(&self, eligible: &[&CandidateEvaluation]) -> Ranking {
        let mut sorted: Vec<&CandidateEvaluation> = eligible.to_vec();
        sorted.sort_by(|a, b| {
            b.policy
                .is_included()
                .cmp(&a.policy.is_included())
                .then_with(|| b.policy.score.total_cmp(&a.policy.score))
                .then_with(|| b.scheduler_score.total_cmp(&a.scheduler_score))
                .then_with(|| a.cluster().cmp(b.cluster()))
        });
        Ranking {
            ordered: sorted
                .into_iter()
                .map(|e| RankedCandidate::from_evaluation(e, e.policy.score))
                .collect(),
            deferred: Vec::new(),
        }
    }
}

// ── Scheduler primary ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerPrimary;

impl CombinationStrategy for SchedulerPrimary {
    fn algorithm(&self) -> CombinationAlgorithm {
        CombinationAlgorithm::SchedulerPrimary
    }

    fn rank(&self, eligible: &[&CandidateEvaluation]) -> Ranking {
        let mut ordered: Vec<RankedCandidate> = eligible
            .iter()
            .map(|e| RankedCandidate::from_evaluation(e, e.scheduler_score))
            .collect();
        ordered.sort_by(by_final_score);
        Ranking {
            ordered,
            deferred: Vec::new(),
        }
    }
}

// ── Consensus ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Consensus {
    /// Both percentiles must reach this in the first pass.
    pub percentile: f64,
    /// Threshold for the secondary pass.
    pub relaxed_percentile: f64,
}

/// Fraction of `all` at or below `value`.
fn percentile(value: f64, all: &[f64]) -> f64 {
    if all.is_empty() {
        return 0.0;
    }
    all.iter().filter(|&&s| s <= value).count() as f64 / all.len() as f64
}

impl CombinationStrategy for Consensus {
    fn algorithm(&self) -> CombinationAlgorithm {
        CombinationAlgorithm::Consensus
    }

    fn rank(&self, eligible: &[&CandidateEvaluation]) -> Ranking {
        let scheduler: Vec<f64> = eligible.iter().map(|e| e.scheduler_score).collect();
        let policy: Vec<f64> = eligible.iter().map(|e| e.policy.score).collect();

        let mut primary = Vec::new();
        let mut secondary = Vec::new();
        let mut deferred = Vec::new();
        for e in eligible {
            let ps = percentile(e.scheduler_score, &scheduler);
            let pp = percentile(e.policy.score, &policy);
            let mut ranked =
                RankedCandidate::from_evaluation(e, (e.scheduler_score + e.policy.score) / 2.0);
            let agreement = ps.min(pp);
            if agreement >= self.percentile {
                ranked.rationale.push(format!(
                    "consensus: scheduler p{:.0} and policy p{:.0} both above p{:.0}",
                    ps * 100.0,
                    pp * 100.0,
                    self.percentile * 100.0
                ));
                primary.push(ranked);
            } else if agreement >= self.relaxed_percentile {
                ranked.rationale.push(format!(
                    "consensus (relaxed pass): scheduler p{:.0}, policy p{:.0}",
                    ps * 100.0,
                    pp * 100.0
                ));
                secondary.push(ranked);
            } else {
                let reason = format!(
                    "no consensus: scheduler p{:.0}, policy p{:.0} below relaxed p{:.0}",
                    ps * 100.0,
                    pp * 100.0,
                    self.relaxed_percentile * 100.0
                );
                deferred.push((ranked, reason));
            }
        }

        primary.sort_by(by_final_score);
        secondary.sort_by(by_final_score);
        primary.extend(secondary);
        deferred.sort_by(|a, b| by_final_score(&a.0, &b.0));
        Ranking {
            ordered: primary,
            deferred,
        }
    }
}

// ── Combiner ───────────────────────────────────────────────────────

/// Ranked selection for one attempt.
#[derive(Debug, Clone, Default)]
pub struct Proposal {
    /// Top-N candidates, best first.
    pub selected: Vec<RankedCandidate>,
    /// Selectable candidates outside the top N, best first.
    pub alternates: Vec<RankedCandidate>,
    pub rejections: Vec<Rejection>,
}

#[derive(Clone)]
pub struct Combiner {
    strategy: Arc<dyn CombinationStrategy>,
}

impl std::fmt::Debug for Combiner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Combiner")
            .field("algorithm", &self.strategy.algorithm())
            .finish()
    }
}

impl Combiner {
    pub fn new(strategy: Arc<dyn CombinationStrategy>) -> Self {
        Self { strategy }
    }

    pub fn from_config(config: &CombinerConfig) -> Self {
        let strategy: Arc<dyn CombinationStrategy> = match config.algorithm {
            CombinationAlgorithm::WeightedBlend => Arc::new(WeightedBlend {
                scheduler_weight: config.scheduler_weight,
                policy_weight: config.policy_weight,
            }),
            CombinationAlgorithm::PolicyPrimary => Arc::new(PolicyPrimary),
            CombinationAlgorithm::SchedulerPrimary => Arc::new(SchedulerPrimary),
            CombinationAlgorithm::Consensus => Arc::new(Consensus {
                percentile: config.consensus_percentile,
                relaxed_percentile: config.consensus_relaxed_percentile,
            }),
        };
        Self { strategy }
    }

    pub fn algorithm(&self) -> CombinationAlgorithm {
        self.strategy.algorithm()
    }

    pub fn combine(&self, request: &WorkloadRequest, evaluations: &[CandidateEvaluation]) -> Proposal {
        let mut rejections = Vec::new();
        let mut eligible = Vec::with_capacity(evaluations.len());
        for e in evaluations {
            if e.policy.is_excluded() {
                rejections.push(Rejection {
                    cluster: e.cluster().to_string(),
                    stage: RejectionStage::Policy,
                    reason: format!(
                        "excluded by policy {}",
                        e.policy.deciding_policies.join(", ")
                    ),
                });
            } else {
                eligible.push(e);
            }
        }

        let Ranking { ordered, deferred } = self.strategy.rank(&eligible);
        for (r, reason) in deferred {
            rejections.push(Rejection {
                cluster: r.candidate.cluster,
                stage: RejectionStage::Combiner,
                reason,
            });
        }

        let wanted = request.clusters as usize;
        let algorithm = self.algorithm();
        let mut selected = Vec::new();
        let mut alternates = Vec::new();
        for (i, mut r) in ordered.into_iter().enumerate() {
            let summary = format!(
                "ranked #{} by {algorithm} (scheduler {:.1}, policy {:.1}, final {:.1})",
                i + 1,
                r.scheduler_score,
                r.policy_score,
                r.final_score
            );
            r.rationale.insert(0, summary);
            if i < wanted {
                selected.push(r);
            } else {
                r.rationale.push(format!("outside the top {wanted}"));
                alternates.push(r);
            }
        }

        debug!(
            workload = %request.id(),
            %algorithm,
            selected = selected.len(),
            alternates = alternates.len(),
            rejected = rejections.len(),
            "combined candidate scores"
        );
        Proposal {
            selected,
            alternates,
            rejections,
        }
    }
}
