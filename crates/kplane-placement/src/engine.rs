//! Placement engine: the `decide` pipeline.
//!
//! One call evaluates one workload:
//!
//! 1. fetch candidates, policies and overrides (bounded by the deadline)
//! 2. score every candidate and evaluate policies per candidate in parallel
//! 3. combine, validate, and re-derive with offenders removed on fatal
//!    conflicts, up to `max_retries` times
//! 4. apply overrides and re-validate the final selection
//! 5. build the decision and append it to the recorder
//!
//! Evaluations share only the policy cache, the scheduler's cursor table
//! and the recorder; any number may run concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kplane_core::{
    AuditRecord, Candidate, CandidateScore, Clock, Conflict, ConflictKind, Deadline, Decision,
    EngineConfig, PlacementError, PlacementResult, PolicyEvaluationError, Rejection,
    RejectionStage, SelectedCluster, SystemClock, WorkloadRequest,
};
use kplane_policy::{CandidatePolicyResult, PolicyEvaluator, PreparedPolicies};
use kplane_recorder::DecisionRecorder;
use kplane_scheduler::{Scheduler, SchedulerError};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::combiner::{CandidateEvaluation, Combiner, Proposal, RankedCandidate};
use crate::overrides::{OverrideManager, OverrideOutcome};
use crate::sources::{
    CandidateSupplier, OverrideStore, PolicyStore, StaticOverrides, StaticPolicies,
};
use crate::validator::{Validator, placements};

pub struct PlacementEngine {
    config: EngineConfig,
    candidates: Arc<dyn CandidateSupplier>,
    policies: Arc<dyn PolicyStore>,
    overrides: Arc<dyn OverrideStore>,
    scheduler: Scheduler,
    evaluator: PolicyEvaluator,
    combiner: Combiner,
    validator: Validator,
    override_manager: OverrideManager,
    recorder: Arc<DecisionRecorder>,
    clock: Arc<dyn Clock>,
    /// Evaluations started by this engine; feeds the decision id.
    evaluations: AtomicU64,
}

impl std::fmt::Debug for PlacementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementEngine")
            .field("scheduler", &self.scheduler)
            .field("combiner", &self.combiner)
            .field("validator", &self.validator)
            .field("recorder", &self.recorder)
            .finish_non_exhaustive()
    }
}

/// Builder for [`PlacementEngine`]. Only the candidate supplier is
/// mandatory; everything else defaults from the configuration.
pub struct PlacementEngineBuilder {
    config: EngineConfig,
    candidates: Option<Arc<dyn CandidateSupplier>>,
    policies: Option<Arc<dyn PolicyStore>>,
    overrides: Option<Arc<dyn OverrideStore>>,
    scheduler: Option<Scheduler>,
    combiner: Option<Combiner>,
    recorder: Option<Arc<DecisionRecorder>>,
    clock: Option<Arc<dyn Clock>>,
}

impl PlacementEngineBuilder {
    pub fn candidates(mut self, supplier: Arc<dyn CandidateSupplier>) -> Self {
        self.candidates = Some(supplier);
        self
    }

    pub fn policies(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policies = Some(store);
        self
    }

    pub fn overrides(mut self, store: Arc<dyn OverrideStore>) -> Self {
        self.overrides = Some(store);
        self
    }

    /// Replace the configured scheduling algorithm.
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Replace the configured combination strategy.
    pub fn combiner(mut self, combiner: Combiner) -> Self {
        self.combiner = Some(combiner);
        self
    }

    pub fn recorder(mut self, recorder: Arc<DecisionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> PlacementResult<PlacementEngine> {
        self.config.validate()?;
        let candidates = self
            .candidates
            .ok_or_else(|| PlacementError::Config("no candidate supplier configured".into()))?;
        let config = self.config;

        Ok(PlacementEngine {
            policies: self
                .policies
                .unwrap_or_else(|| Arc::new(StaticPolicies::default())),
            overrides: self
                .overrides
                .unwrap_or_else(|| Arc::new(StaticOverrides::default())),
            scheduler: self
                .scheduler
                .unwrap_or_else(|| Scheduler::from_config(&config.scheduler)),
            evaluator: PolicyEvaluator::new(&config.policy, config.scheduler.location.clone()),
            combiner: self
                .combiner
                .unwrap_or_else(|| Combiner::from_config(&config.combiner)),
            validator: Validator::new(config.validator.clone()),
            override_manager: OverrideManager::new(
                config.overrides.clone(),
                config.validator.overcommit_factor,
            ),
            recorder: self
                .recorder
                .unwrap_or_else(|| Arc::new(DecisionRecorder::in_memory(&config.recorder))),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            evaluations: AtomicU64::new(0),
            candidates,
            config,
        })
    }
}

/// Everything fetched and scored for one evaluation.
struct Inputs {
    evaluations: Vec<CandidateEvaluation>,
    candidates: BTreeMap<String, Candidate>,
    policy: BTreeMap<String, CandidatePolicyResult>,
    overrides: Vec<kplane_core::Override>,
    policy_errors: Vec<PolicyEvaluationError>,
}

/// State carried across validation attempts.
#[derive(Default)]
struct Trail {
    attempts: u32,
    conflicts: Vec<Conflict>,
    rejections: Vec<Rejection>,
    rationale: Vec<String>,
}

impl Trail {
    fn failure(mut self, workload: String, mut conflicts: Vec<Conflict>) -> PlacementError {
        self.conflicts.append(&mut conflicts);
        PlacementError::ValidationFailed {
            workload,
            attempts: self.attempts,
            conflicts: self.conflicts,
            rationale: self.rationale,
        }
    }
}

impl PlacementEngine {
    pub fn builder(config: EngineConfig) -> PlacementEngineBuilder {
        PlacementEngineBuilder {
            config,
            candidates: None,
            policies: None,
            overrides: None,
            scheduler: None,
            combiner: None,
            recorder: None,
            clock: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<DecisionRecorder> {
        &self.recorder
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    /// Decide where `request` should run.
    ///
    /// Returns a decision with no unresolved fatal conflict, or a typed
    /// failure. Nothing is recorded when the evaluation fails.
    pub async fn decide(
        &self,
        request: &WorkloadRequest,
        deadline: &Deadline,
    ) -> PlacementResult<Decision> {
        let workload = request.id();
        request.validate().map_err(PlacementError::InvalidRequest)?;
        deadline.check()?;
        let sequence = self.evaluations.fetch_add(1, Ordering::Relaxed);
        info!(workload = %workload, clusters = request.clusters, replicas = request.replicas, "evaluating placement");

        let mut trail = Trail::default();
        let inputs = self.gather(request, deadline, &mut trail.rationale).await?;
        deadline.check()?;

        let proposal = self.derive(request, &inputs, deadline, &mut trail)?;
        deadline.check()?;

        let now = self.clock.now_millis();
        let outcome = self.override_manager.apply(
            request,
            now,
            &inputs.overrides,
            &inputs.evaluations,
            proposal.clone(),
        );
        let (selected, outcome) = self.finalize(request, &inputs, outcome, &mut trail)?;
        deadline.check()?;

        let (decision, rejected) =
            self.assemble(request, &inputs, proposal, selected, outcome, trail, now, sequence);

        let audit = AuditRecord {
            decision: decision.clone(),
            rejected,
            recorded_at: self.clock.now_millis(),
        };
        if let Err(e) = self.recorder.record_within(&audit, deadline.remaining()).await {
            warn!(workload = %workload, decision = %decision.id, error = %e, "decision returned without being recorded");
        }

        info!(
            workload = %workload,
            decision = %decision.id,
            selected = ?decision.selected_clusters(),
            attempts = decision.attempts,
            conflicts = decision.conflicts.len(),
            "placement decided"
        );
        Ok(decision)
    }

    // ── Stage 1-2: inputs and scoring ──────────────────────────────

    async fn gather(
        &self,
        request: &WorkloadRequest,
        deadline: &Deadline,
        rationale: &mut Vec<String>,
    ) -> PlacementResult<Inputs> {
        let supplied = deadline
            .run(self.candidates.list_candidates(request))
            .await?
            .map_err(|e| PlacementError::CandidateSupply(format!("{e:#}")))?;

        let mut seen = BTreeSet::new();
        let mut candidates = Vec::with_capacity(supplied.len());
        for c in supplied {
            if seen.insert(c.cluster.clone()) {
                candidates.push(c);
            } else {
                warn!(cluster = %c.cluster, "supplier returned duplicate cluster");
                rationale.push(format!(
                    "duplicate candidate {} ignored; first entry kept",
                    c.cluster
                ));
            }
        }

        let scored = self.scheduler.score(request, &candidates).map_err(|e| match e {
            SchedulerError::NoCandidates(workload) => PlacementError::NoCandidates { workload },
        })?;

        let as_of = self.clock.now_millis();
        let (policies, overrides) = deadline
            .run(async {
                tokio::join!(
                    self.policies.get_policies(request),
                    self.overrides.list_active_overrides(request, as_of)
                )
            })
            .await?;
        let policies = policies.map_err(|e| PlacementError::PolicyStore(format!("{e:#}")))?;
        let overrides = overrides.map_err(|e| PlacementError::OverrideStore(format!("{e:#}")))?;

        let prepared = Arc::new(self.evaluator.prepare(request, &policies));
        let mut policy = deadline
            .run(evaluate_all(prepared.clone(), request, &candidates))
            .await?;

        let mut policy_errors = prepared.compile_errors();
        for result in policy.values() {
            policy_errors.extend(result.errors.iter().cloned());
        }
        if !policy_errors.is_empty() {
            rationale.push(format!(
                "{} policy evaluation error(s) treated as neutral",
                policy_errors.len()
            ));
        }

        let mut evaluations: Vec<CandidateEvaluation> = scored
            .into_iter()
            .map(|s| {
                let result = policy
                    .remove(s.cluster())
                    .unwrap_or_else(|| CandidatePolicyResult::neutral(s.cluster()));
                CandidateEvaluation {
                    candidate: s.candidate,
                    scheduler_score: s.score,
                    policy: result,
                }
            })
            .collect();
        evaluations.sort_by(|a, b| a.cluster().cmp(b.cluster()));

        debug!(
            workload = %request.id(),
            candidates = evaluations.len(),
            policies = prepared.len(),
            overrides = overrides.len(),
            "gathered evaluation inputs"
        );

        Ok(Inputs {
            candidates: evaluations
                .iter()
                .map(|e| (e.cluster().to_string(), e.candidate.clone()))
                .collect(),
            policy: evaluations
                .iter()
                .map(|e| (e.cluster().to_string(), e.policy.clone()))
                .collect(),
            evaluations,
            overrides,
            policy_errors,
        })
    }

    // ── Stage 3: combine + validate with retries ───────────────────

    fn derive(
        &self,
        request: &WorkloadRequest,
        inputs: &Inputs,
        deadline: &Deadline,
        trail: &mut Trail,
    ) -> PlacementResult<Proposal> {
        let max_attempts = self.validator.config().max_retries + 1;
        let mut pool: Vec<CandidateEvaluation> = inputs.evaluations.clone();

        loop {
            deadline.check()?;
            trail.attempts += 1;
            let proposal = self.combiner.combine(request, &pool);
            let selection = placements(request, &proposal.selected);
            let result = self
                .validator
                .validate(request, &selection, &inputs.candidates, &inputs.policy);
            if result.passed {
                // Advisories are collected from the final selection instead.
                return Ok(proposal);
            }

            let fatal: Vec<Conflict> = result.fatal().cloned().collect();
            let offenders: BTreeSet<String> =
                fatal.iter().flat_map(|c| c.clusters.iter().cloned()).collect();
            if offenders.is_empty() || fatal.iter().any(|c| c.clusters.is_empty()) {
                trail.rationale.push("no candidate left to select".to_string());
                return Err(std::mem::take(trail).failure(request.id(), result.conflicts));
            }
            if trail.attempts >= max_attempts {
                trail
                    .rationale
                    .push(format!("retry limit of {} reached", max_attempts - 1));
                return Err(std::mem::take(trail).failure(request.id(), result.conflicts));
            }

            warn!(
                workload = %request.id(),
                attempt = trail.attempts,
                removed = ?offenders,
                "fatal conflicts; re-deriving without offending clusters"
            );
            let removed = offenders.iter().cloned().collect::<Vec<_>>().join(", ");
            for c in fatal {
                trail
                    .conflicts
                    .push(c.resolved(format!("removed {removed} and re-derived")));
            }
            for cluster in &offenders {
                trail.rejections.push(Rejection {
                    cluster: cluster.clone(),
                    stage: RejectionStage::Validator,
                    reason: format!("removed after fatal conflict on attempt {}", trail.attempts),
                });
            }
            trail.rationale.push(format!(
                "attempt {} removed {removed} after fatal conflicts",
                trail.attempts
            ));
            pool.retain(|e| !offenders.contains(e.cluster()));
        }
    }

    // ── Stage 4: overrides + final validation ──────────────────────

    /// Re-validate the overridden selection. Non-forced offenders are
    /// dropped and backfilled from the alternates. Forced clusters survive
    /// anything but a capacity overcommit.
    fn finalize(
        &self,
        request: &WorkloadRequest,
        inputs: &Inputs,
        mut outcome: OverrideOutcome,
        trail: &mut Trail,
    ) -> PlacementResult<(Vec<SelectedCluster>, OverrideOutcome)> {
        let max_attempts = self.validator.config().max_retries + 1;
        let mut passes = 0;

        loop {
            passes += 1;
            let selection = placements(request, &outcome.selected);
            let result = self
                .validator
                .validate(request, &selection, &inputs.candidates, &inputs.policy);
            let forced: BTreeSet<&str> = outcome
                .selected
                .iter()
                .filter(|r| r.forced)
                .map(|r| r.cluster())
                .collect();

            let mut offenders = BTreeSet::new();
            let mut blocking = false;
            for c in result.fatal() {
                if c.clusters.is_empty() {
                    blocking = true;
                }
                for cluster in &c.clusters {
                    if !forced.contains(cluster.as_str())
                        || c.kind == ConflictKind::ResourceOvercommit
                    {
                        offenders.insert(cluster.clone());
                    }
                }
            }

            if blocking || (!offenders.is_empty() && passes >= max_attempts) {
                trail
                    .rationale
                    .push("overridden selection could not be validated".to_string());
                return Err(std::mem::take(trail).failure(request.id(), result.conflicts));
            }

            if offenders.is_empty() {
                for c in result.conflicts {
                    if c.is_fatal() {
                        trail.conflicts.push(c.resolved("accepted: cluster forced by override"));
                    } else {
                        trail.conflicts.push(c);
                    }
                }
                return Ok((selection, outcome));
            }

            let removed = offenders.iter().cloned().collect::<Vec<_>>().join(", ");
            for c in result.conflicts.into_iter().filter(Conflict::is_fatal) {
                trail
                    .conflicts
                    .push(c.resolved(format!("removed {removed} after overrides")));
            }
            for cluster in &offenders {
                let stage = if forced.contains(cluster.as_str()) {
                    RejectionStage::Capacity
                } else {
                    RejectionStage::Validator
                };
                trail.rejections.push(Rejection {
                    cluster: cluster.clone(),
                    stage,
                    reason: "removed after fatal conflict in the overridden selection".to_string(),
                });
            }
            let wanted = request.clusters as usize;
            outcome.selected.retain(|r| !offenders.contains(r.cluster()));
            outcome.alternates.retain(|r| !offenders.contains(r.cluster()));
            let unforced = outcome.selected.iter().filter(|r| !r.forced).count();
            let pinned = outcome.selected.len() - unforced;
            let fill = wanted.saturating_sub(pinned).saturating_sub(unforced);
            let take = fill.min(outcome.alternates.len());
            outcome.selected.extend(outcome.alternates.drain(..take));
            trail.rationale.push(format!("final pass removed {removed}"));
        }
    }

    // ── Stage 5: decision ──────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        request: &WorkloadRequest,
        inputs: &Inputs,
        proposal: Proposal,
        selected: Vec<SelectedCluster>,
        outcome: OverrideOutcome,
        trail: Trail,
        decided_at: u64,
        sequence: u64,
    ) -> (Decision, Vec<Rejection>) {
        let Trail {
            attempts,
            mut conflicts,
            rejections: validator_rejections,
            mut rationale,
        } = trail;
        conflicts.extend(outcome.conflicts);

        let mut rejected = proposal.rejections;
        rejected.extend(validator_rejections);
        rejected.extend(outcome.rejections);
        for r in &outcome.alternates {
            rejected.push(Rejection {
                cluster: r.cluster().to_string(),
                stage: RejectionStage::Combiner,
                reason: format!("ranked outside the top {}", request.clusters),
            });
        }

        for s in &outcome.skipped {
            rationale.push(format!("override {} skipped: {}", s.override_id, s.reason));
        }
        for a in &outcome.applied {
            rationale.push(format!(
                "{} override {} on {}: {}",
                a.kind, a.override_id, a.cluster, a.effect
            ));
        }

        let ranked: BTreeMap<&str, &RankedCandidate> = outcome
            .selected
            .iter()
            .chain(&outcome.alternates)
            .map(|r| (r.cluster(), r))
            .collect();
        let is_selected: BTreeSet<&str> = selected.iter().map(|s| s.cluster.as_str()).collect();
        let scores = inputs
            .evaluations
            .iter()
            .map(|e| {
                let cluster = e.cluster();
                let mut why: Vec<String> = ranked
                    .get(cluster)
                    .map(|r| r.rationale.clone())
                    .unwrap_or_default();
                why.extend(
                    rejected
                        .iter()
                        .filter(|r| r.cluster == cluster)
                        .map(|r| format!("rejected at {:?}: {}", r.stage, r.reason)),
                );
                CandidateScore {
                    cluster: cluster.to_string(),
                    scheduler_score: e.scheduler_score,
                    policy_score: e.policy.score,
                    final_score: ranked.get(cluster).map(|r| r.final_score).unwrap_or(0.0),
                    selected: is_selected.contains(cluster),
                    rationale: why,
                }
            })
            .collect();

        let mut overrides_skipped = outcome.skipped;
        overrides_skipped.sort_by(|a, b| a.override_id.cmp(&b.override_id));

        let workload_id = request.id();
        let decision = Decision {
            id: decision_id(&workload_id, decided_at, sequence, &selected),
            workload_id,
            selected,
            scores,
            scheduler_algorithm: self.scheduler.algorithm_name().to_string(),
            combination: self.combiner.algorithm(),
            overrides_applied: outcome.applied,
            overrides_skipped,
            conflicts,
            policy_errors: inputs.policy_errors.clone(),
            rationale,
            attempts,
            decided_at,
        };
        (decision, rejected)
    }
}

/// Evaluate policies for every candidate on the blocking-free task pool.
/// A panicked task degrades that candidate to neutral.
async fn evaluate_all(
    prepared: Arc<PreparedPolicies>,
    request: &WorkloadRequest,
    candidates: &[Candidate],
) -> BTreeMap<String, CandidatePolicyResult> {
    let mut results = BTreeMap::new();
    if prepared.is_empty() {
        for c in candidates {
            results.insert(c.cluster.clone(), CandidatePolicyResult::neutral(&c.cluster));
        }
        return results;
    }

    let workload = Arc::new(request.clone());
    let mut tasks = JoinSet::new();
    for c in candidates {
        let prepared = prepared.clone();
        let workload = workload.clone();
        let candidate = c.clone();
        tasks.spawn(async move {
            let result = prepared.evaluate(&workload, &candidate);
            (candidate.cluster, result)
        });
    }
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((cluster, result)) => {
                results.insert(cluster, result);
            }
            Err(e) => warn!(error = %e, "policy evaluation task failed"),
        }
    }

    for c in candidates {
        results.entry(c.cluster.clone()).or_insert_with(|| {
            let mut result = CandidatePolicyResult::neutral(&c.cluster);
            result.errors.push(PolicyEvaluationError {
                policy_id: "*".to_string(),
                version: 0,
                cluster: Some(c.cluster.clone()),
                message: "policy evaluation task failed".to_string(),
            });
            result
        });
    }
    results
}

/// Decision identifier over the workload, the decision time, the engine's
/// evaluation sequence and the final selection. Replaying the same inputs
/// on a fresh engine reproduces it; two evaluations on one engine never
/// share it.
fn decision_id(
    workload_id: &str,
    decided_at: u64,
    sequence: u64,
    selected: &[SelectedCluster],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workload_id.as_bytes());
    hasher.update(decided_at.to_be_bytes());
    hasher.update(sequence.to_be_bytes());
    for s in selected {
        hasher.update(s.cluster.as_bytes());
        hasher.update([0]);
        hasher.update(s.replicas.to_be_bytes());
        hasher.update(s.score.to_bits().to_be_bytes());
    }
    let digest = hasher.finalize();
    format!("dec-{}", hex::encode(&digest[..12]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::StaticCandidates;
    use kplane_core::{FixedClock, ResourceQuantity};
    use std::time::Duration;

    fn engine(candidates: Vec<Candidate>) -> PlacementEngine {
        PlacementEngine::builder(EngineConfig::default())
            .candidates(Arc::new(StaticCandidates::new(candidates)))
            .clock(Arc::new(FixedClock::new(1_000)))
            .build()
            .unwrap()
    }

    fn cluster(name: &str, cpu_used: u64) -> Candidate {
        Candidate::new(
            name,
            ResourceQuantity::new(1000, 1000),
            ResourceQuantity::new(cpu_used, 0),
        )
    }

    #[test]
    fn builder_requires_candidate_supplier() {
        let err = PlacementEngine::builder(EngineConfig::default())
            .build()
            .unwrap_err();
        assert!(matches!(err, PlacementError::Config(_)));
    }

    #[test]
    fn decision_id_is_stable() {
        let s = vec![SelectedCluster {
            cluster: "a".into(),
            score: 50.0,
            replicas: 1,
            reserved: ResourceQuantity::ZERO,
            forced: false,
        }];
        assert_eq!(decision_id("w", 1, 0, &s), decision_id("w", 1, 0, &s));
        assert_ne!(decision_id("w", 1, 0, &s), decision_id("w", 2, 0, &s));
        assert_ne!(decision_id("w", 1, 0, &s), decision_id("w", 1, 1, &s));
        assert!(decision_id("w", 1, 0, &s).starts_with("dec-"));
    }

    #[tokio::test]
    async fn invalid_request_is_rejected() {
        let engine = engine(vec![cluster("a", 0)]);
        let mut request = WorkloadRequest::new("root", "default", "api");
        request.clusters = 0;
        let err = engine
            .decide(&request, &Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, PlacementError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn overcommitted_top_candidate_is_retried_away() {
        let mut request = WorkloadRequest::new("root", "default", "api");
        // "small" is least loaded but its memory cannot hold the request.
        request.resources = ResourceQuantity::new(100, 500);
        let mut small = cluster("small", 0);
        small.capacity = ResourceQuantity::new(1000, 100);
        let engine = PlacementEngine::builder(EngineConfig::default())
            .candidates(Arc::new(StaticCandidates::new(vec![small, cluster("big", 100)])))
            .clock(Arc::new(FixedClock::new(1_000)))
            .build()
            .unwrap();

        let decision = engine
            .decide(&request, &Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(decision.selected_clusters(), vec!["big"]);
        assert_eq!(decision.attempts, 2);
        assert!(decision
            .conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::ResourceOvercommit && c.resolution.is_some()));
    }

    #[tokio::test]
    async fn duplicate_candidates_are_noted() {
        let engine = engine(vec![cluster("a", 0), cluster("a", 500), cluster("b", 100)]);
        let request = WorkloadRequest::new("root", "default", "api");
        let decision = engine
            .decide(&request, &Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(decision.scores.len(), 2);
        assert!(decision.rationale.iter().any(|r| r.contains("duplicate candidate a")));
    }
}
