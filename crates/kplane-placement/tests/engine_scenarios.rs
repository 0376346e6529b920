//! End-to-end placement scenarios.
//!
//! Each test drives `PlacementEngine::decide` through static
//! collaborators and a fixed clock, then inspects the decision and the
//! recorded history.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kplane_core::config::{CombinerConfig, RecorderConfig, SchedulerAlgorithm};
use kplane_core::{
    AuditRecord, Candidate, ClusterSelector, CombinationAlgorithm, ConflictKind, Deadline,
    EngineConfig, FixedClock, Override, OverrideKind, OverrideTarget, PlacementError,
    PlacementPolicy, PolicyScope, ResourceQuantity, Severity, WorkloadRequest,
};
use kplane_placement::{
    CandidateSupplier, PlacementEngine, StaticCandidates, StaticOverrides, StaticPolicies,
};
use kplane_recorder::{
    AuditQuery, DecisionRecorder, RecorderError, RecorderResult, RecorderStorage, RedbStorage,
};

const NOW: u64 = 1_700_000_000_000;

fn cluster(name: &str, utilization_pct: u64) -> Candidate {
    Candidate::new(
        name,
        ResourceQuantity::new(1000, 1000),
        ResourceQuantity::new(utilization_pct * 10, utilization_pct * 10),
    )
}

fn request() -> WorkloadRequest {
    let mut r = WorkloadRequest::new("root:org", "default", "api");
    r.resources = ResourceQuantity::new(100, 100);
    r
}

fn policy(id: &str, expression: &str) -> PlacementPolicy {
    PlacementPolicy {
        id: id.into(),
        version: 1,
        name: id.into(),
        expression: expression.into(),
        priority: 1,
        weight: 1.0,
        scope: PolicyScope::default(),
        author: "ops".into(),
    }
}

fn directive(id: &str, kind: OverrideKind, cluster: &str) -> Override {
    Override {
        id: id.into(),
        kind,
        target: OverrideTarget {
            workload: Default::default(),
            clusters: ClusterSelector::for_cluster(cluster),
        },
        priority: 0,
        created_at: NOW - 1_000,
        expires_at: None,
        created_by: "ops".into(),
        reason: "test".into(),
    }
}

fn deadline() -> Deadline {
    Deadline::after(Duration::from_secs(5))
}

struct Fixture {
    config: EngineConfig,
    candidates: Vec<Candidate>,
    policies: Vec<PlacementPolicy>,
    overrides: Vec<Override>,
}

impl Fixture {
    fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            config: EngineConfig::default(),
            candidates,
            policies: Vec::new(),
            overrides: Vec::new(),
        }
    }

    fn engine(&self) -> PlacementEngine {
        PlacementEngine::builder(self.config.clone())
            .candidates(Arc::new(StaticCandidates::new(self.candidates.clone())))
            .policies(Arc::new(StaticPolicies::new(self.policies.clone())))
            .overrides(Arc::new(StaticOverrides::new(self.overrides.clone())))
            .clock(Arc::new(FixedClock::new(NOW)))
            .build()
            .unwrap()
    }
}

// ── Determinism and capacity ───────────────────────────────────────

#[tokio::test]
async fn identical_inputs_yield_identical_decisions() {
    let mut fx = Fixture::new(vec![
        cluster("east", 40),
        cluster("west", 40),
        cluster("north", 20),
        cluster("south", 60),
    ]);
    fx.policies = vec![
        policy("prefer-free", "100 - utilization() * 100"),
        policy("no-south", "cluster.name != \"south\""),
    ];
    let mut req = request();
    req.clusters = 2;

    let first = fx.engine().decide(&req, &deadline()).await.unwrap();
    let second = fx.engine().decide(&req, &deadline()).await.unwrap();
    assert_eq!(first, second);
    // east and west tie; the cluster id decides.
    assert_eq!(first.selected_clusters(), vec!["north", "east"]);
}

#[tokio::test]
async fn random_scheduler_is_reproducible_with_default_seed() {
    let mut fx = Fixture::new(
        (0..6)
            .map(|i| cluster(&format!("c{i}"), 30))
            .collect(),
    );
    fx.config.scheduler.algorithm = SchedulerAlgorithm::Random;
    let mut req = request();
    req.clusters = 2;

    let first = fx.engine().decide(&req, &deadline()).await.unwrap();
    for _ in 0..7 {
        let again = fx.engine().decide(&req, &deadline()).await.unwrap();
        assert_eq!(again, first);
    }
}

#[tokio::test]
async fn selections_never_exceed_capacity() {
    let mut fx = Fixture::new(vec![
        cluster("a", 5),
        cluster("b", 85),
        cluster("c", 92),
        cluster("d", 50),
    ]);
    fx.config.combiner.algorithm = CombinationAlgorithm::SchedulerPrimary;
    let mut req = request();
    req.clusters = 3;
    req.replicas = 2;

    let decision = fx.engine().decide(&req, &deadline()).await.unwrap();
    for s in &decision.selected {
        let c = fx.candidates.iter().find(|c| c.cluster == s.cluster).unwrap();
        let total = c.allocated.saturating_add(&s.reserved);
        assert!(total.fits_within(&c.capacity, 1.0), "{} overcommitted", s.cluster);
    }
    assert!(!decision.is_selected("c"));
}

// ── Scheduler and combiner scenarios ───────────────────────────────

#[tokio::test]
async fn least_loaded_ranks_lower_utilization_first() {
    let mut fx = Fixture::new(vec![cluster("busy", 70), cluster("idle", 30)]);
    fx.config.scheduler.algorithm = SchedulerAlgorithm::LeastLoaded;

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["idle"]);
    assert_eq!(decision.scheduler_algorithm, "least-loaded");
    let idle = decision.scores.iter().find(|s| s.cluster == "idle").unwrap();
    let busy = decision.scores.iter().find(|s| s.cluster == "busy").unwrap();
    assert!(idle.scheduler_score > busy.scheduler_score);
}

#[tokio::test]
async fn policy_primary_hard_exclude_beats_top_scheduler_score() {
    let mut fx = Fixture::new(vec![cluster("best", 5), cluster("other", 60)]);
    fx.config.combiner = CombinerConfig {
        algorithm: CombinationAlgorithm::PolicyPrimary,
        ..CombinerConfig::default()
    };
    fx.policies = vec![policy("ban-best", "cluster.name != \"best\"")];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["other"]);
    let best = decision.scores.iter().find(|s| s.cluster == "best").unwrap();
    assert!(!best.selected);
    assert!(best.rationale.iter().any(|r| r.contains("ban-best")));
}

#[tokio::test]
async fn broken_policy_degrades_to_neutral() {
    let mut fx = Fixture::new(vec![cluster("a", 10), cluster("b", 20)]);
    fx.policies = vec![policy("broken", "label(")];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["a"]);
    assert_eq!(decision.policy_errors.len(), 1);
    assert_eq!(decision.policy_errors[0].policy_id, "broken");
}

#[tokio::test]
async fn required_separation_is_restored_by_retry() {
    let mut fx = Fixture::new(vec![
        cluster("a", 10).with_label("zone", "z1"),
        cluster("b", 20).with_label("zone", "z1"),
        cluster("c", 30).with_label("zone", "z2"),
    ]);
    fx.config.combiner.algorithm = CombinationAlgorithm::SchedulerPrimary;
    let mut req = request();
    req.clusters = 2;
    req.affinity = vec![kplane_core::AffinityRule {
        kind: kplane_core::AffinityKind::Separate,
        topology_key: "zone".into(),
        required: true,
    }];

    let decision = fx.engine().decide(&req, &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["a", "c"]);
    assert_eq!(decision.attempts, 2);
}

#[tokio::test]
async fn compiled_policies_are_reused_across_evaluations() {
    let mut fx = Fixture::new(vec![cluster("a", 10), cluster("b", 20)]);
    fx.policies = vec![policy("headroom", "100 - utilization() * 100")];
    let engine = fx.engine();

    engine.decide(&request(), &deadline()).await.unwrap();
    engine.decide(&request(), &deadline()).await.unwrap();

    let stats = engine.evaluator().cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

// ── Overrides ──────────────────────────────────────────────────────

#[tokio::test]
async fn exclude_override_removes_best_candidate() {
    let mut fx = Fixture::new(vec![cluster("best", 5), cluster("next", 50)]);
    fx.overrides = vec![directive("drain-best", OverrideKind::Exclude, "best")];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert!(!decision.is_selected("best"));
    assert_eq!(decision.selected_clusters(), vec!["next"]);
    assert_eq!(decision.overrides_applied[0].override_id, "drain-best");
}

#[tokio::test]
async fn force_override_adds_candidate() {
    let mut fx = Fixture::new(vec![cluster("best", 5), cluster("legacy", 60)]);
    fx.overrides = vec![directive("pin-legacy", OverrideKind::Force, "legacy")];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert!(decision.is_selected("best"));
    assert!(decision.is_selected("legacy"));
    let legacy = decision.selected.iter().find(|s| s.cluster == "legacy").unwrap();
    assert!(legacy.forced);
}

#[tokio::test]
async fn force_override_without_capacity_is_not_applied() {
    let mut fx = Fixture::new(vec![cluster("best", 5), cluster("full", 95)]);
    fx.overrides = vec![directive("pin-full", OverrideKind::Force, "full")];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["best"]);
    let conflict = decision
        .conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::ForceRejected)
        .unwrap();
    assert_eq!(conflict.severity, Severity::Fatal);
    assert!(conflict.resolution.is_some());
    assert_eq!(conflict.override_ids, vec!["pin-full".to_string()]);
}

#[tokio::test]
async fn expired_override_has_no_effect() {
    let mut fx = Fixture::new(vec![cluster("best", 5), cluster("next", 50)]);
    let mut stale = directive("old-drain", OverrideKind::Exclude, "best");
    stale.expires_at = Some(NOW - 1);
    fx.overrides = vec![stale];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["best"]);
    assert!(decision.overrides_applied.is_empty());
    assert_eq!(decision.overrides_skipped[0].override_id, "old-drain");
    assert!(decision.rationale.iter().any(|r| r.contains("old-drain")));
}

#[tokio::test]
async fn equal_priority_overrides_resolve_by_recency() {
    let mut fx = Fixture::new(vec![cluster("best", 5), cluster("next", 50)]);
    let mut old = directive("old-force", OverrideKind::Force, "next");
    old.created_at = NOW - 10_000;
    let mut new = directive("new-exclude", OverrideKind::Exclude, "next");
    new.created_at = NOW - 5_000;
    fx.overrides = vec![old, new];

    let decision = fx.engine().decide(&request(), &deadline()).await.unwrap();
    assert!(!decision.is_selected("next"));
    let conflict = decision
        .conflicts
        .iter()
        .find(|c| c.kind == ConflictKind::OverrideConflict)
        .unwrap();
    assert_eq!(conflict.severity, Severity::Advisory);
    assert_eq!(conflict.override_ids, vec!["old-force".to_string()]);
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test]
async fn empty_candidate_set_fails_without_recording() {
    let fx = Fixture::new(Vec::new());
    let engine = fx.engine();
    let req = request();

    let err = engine.decide(&req, &deadline()).await.unwrap_err();
    assert!(matches!(err, PlacementError::NoCandidates { .. }));
    assert!(engine.recorder().by_workload(&req.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn exhausted_retries_surface_validation_failure() {
    let mut fx = Fixture::new(vec![cluster("a", 95), cluster("b", 96), cluster("c", 97)]);
    fx.config.validator.max_retries = 1;

    let err = fx.engine().decide(&request(), &deadline()).await.unwrap_err();
    match err {
        PlacementError::ValidationFailed {
            attempts, conflicts, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(conflicts.iter().any(|c| c.kind == ConflictKind::ResourceOvercommit));
        }
        other => panic!("unexpected error: {other}"),
    }
}

struct SlowSupplier;

#[async_trait]
impl CandidateSupplier for SlowSupplier {
    async fn list_candidates(&self, _: &WorkloadRequest) -> anyhow::Result<Vec<Candidate>> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(vec![cluster("late", 0)])
    }
}

fn slow_engine() -> PlacementEngine {
    PlacementEngine::builder(EngineConfig::default())
        .candidates(Arc::new(SlowSupplier))
        .clock(Arc::new(FixedClock::new(NOW)))
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn slow_supplier_hits_deadline() {
    let err = slow_engine()
        .decide(&request(), &Deadline::after(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, PlacementError::DeadlineExceeded));
}

#[tokio::test(start_paused = true)]
async fn cancellation_discards_partial_work() {
    let engine = slow_engine();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let deadline = Deadline::after(Duration::from_secs(600)).with_cancellation(rx);
    let req = request();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
    });
    let err = engine.decide(&req, &deadline).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, PlacementError::Cancelled));
    assert!(engine.recorder().by_workload(&req.id()).await.unwrap().is_empty());
}

// ── Recording ──────────────────────────────────────────────────────

#[tokio::test]
async fn history_is_bounded_per_workload() {
    let fx = Fixture::new(vec![cluster("a", 10), cluster("b", 20)]);
    let clock = Arc::new(FixedClock::new(NOW));
    let engine = PlacementEngine::builder(fx.config.clone())
        .candidates(Arc::new(StaticCandidates::new(fx.candidates.clone())))
        .clock(clock.clone())
        .build()
        .unwrap();
    let req = request();

    let mut ids = Vec::new();
    for _ in 0..12 {
        clock.advance(Duration::from_secs(1));
        ids.push(engine.decide(&req, &deadline()).await.unwrap().id);
    }

    let history = engine.recorder().by_workload(&req.id()).await.unwrap();
    assert_eq!(history.len(), 10);
    assert_eq!(history[0].decision.id, ids[2]);
    assert_eq!(history[9].decision.id, ids[11]);
    assert!(engine.recorder().by_decision(&ids[0]).await.unwrap().is_none());
    assert!(engine.recorder().by_decision(&ids[11]).await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_candidates_are_recorded_with_reasons() {
    let mut fx = Fixture::new(vec![cluster("a", 10), cluster("b", 20), cluster("c", 30)]);
    fx.policies = vec![policy("no-c", "cluster.name != \"c\"")];
    let engine = fx.engine();
    let req = request();

    let decision = engine.decide(&req, &deadline()).await.unwrap();
    let record = engine
        .recorder()
        .by_decision(&decision.id)
        .await
        .unwrap()
        .unwrap();
    let rejected: Vec<&str> = record.rejected.iter().map(|r| r.cluster.as_str()).collect();
    assert!(rejected.contains(&"b"));
    assert!(rejected.contains(&"c"));
    assert!(!rejected.contains(&"a"));
}

struct BrokenStorage;

#[async_trait]
impl RecorderStorage for BrokenStorage {
    async fn append(&self, _: &AuditRecord, _: usize) -> RecorderResult<()> {
        Err(RecorderError::Write("disk full".into()))
    }

    async fn query(&self, _: &AuditQuery) -> RecorderResult<Vec<AuditRecord>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn persistence_failure_still_returns_decision() {
    let recorder = Arc::new(DecisionRecorder::new(
        Arc::new(BrokenStorage),
        &RecorderConfig::default(),
    ));
    let mut failures = recorder.take_failures().unwrap();
    let engine = PlacementEngine::builder(EngineConfig::default())
        .candidates(Arc::new(StaticCandidates::new(vec![cluster("a", 10)])))
        .recorder(recorder)
        .clock(Arc::new(FixedClock::new(NOW)))
        .build()
        .unwrap();

    let decision = engine.decide(&request(), &deadline()).await.unwrap();
    assert_eq!(decision.selected_clusters(), vec!["a"]);

    let failure = failures.recv().await.unwrap();
    assert_eq!(failure.decision_id, decision.id);
    assert!(failure.error.contains("disk full"));
}

#[tokio::test]
async fn same_millisecond_decisions_stay_addressable() {
    let fx = Fixture::new(vec![cluster("a", 10), cluster("b", 20)]);
    let storage = Arc::new(RedbStorage::open_in_memory().unwrap());
    let engine = PlacementEngine::builder(fx.config.clone())
        .candidates(Arc::new(StaticCandidates::new(fx.candidates.clone())))
        .recorder(Arc::new(DecisionRecorder::new(
            storage,
            &RecorderConfig::default(),
        )))
        .clock(Arc::new(FixedClock::new(NOW)))
        .build()
        .unwrap();
    let req = request();

    let mut ids = Vec::new();
    for _ in 0..11 {
        ids.push(engine.decide(&req, &deadline()).await.unwrap().id);
    }
    let distinct: std::collections::BTreeSet<&String> = ids.iter().collect();
    assert_eq!(distinct.len(), 11);

    let history = engine.recorder().by_workload(&req.id()).await.unwrap();
    assert_eq!(history.len(), 10);
    for id in &ids[1..] {
        let found = engine.recorder().by_decision(id).await.unwrap();
        assert_eq!(found.map(|r| r.decision.id), Some(id.clone()));
    }
    assert!(engine.recorder().by_decision(&ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_evaluations_do_not_interfere() {
    let fx = Fixture::new(vec![cluster("a", 10), cluster("b", 20)]);
    let engine = Arc::new(fx.engine());

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let req = WorkloadRequest::new("root:org", "default", &format!("svc-{i}"));
            engine.decide(&req, &deadline()).await.unwrap()
        }));
    }
    for h in handles {
        let decision = h.await.unwrap();
        assert_eq!(decision.selected_clusters(), vec!["a"]);
    }
    for i in 0..8 {
        let history = engine
            .recorder()
            .by_workload(&format!("root:org:default/svc-{i}"))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }
}
