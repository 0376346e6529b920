//! Placement data model.
//!
//! All types are plain data: serde-serializable, cheap to clone, and
//! free of behaviour beyond small derived quantities (utilization,
//! projected reservations). Labels use `BTreeMap` so that iteration
//! order, and therefore every derived output, is deterministic.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::selector::LabelSelector;

pub type Labels = BTreeMap<String, String>;

// ── Resources ──────────────────────────────────────────────────────

/// A bundle of schedulable resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceQuantity {
    #[serde(default)]
    pub cpu_millis: u64,
    #[serde(default)]
    pub memory_bytes: u64,
}

impl ResourceQuantity {
    pub const ZERO: ResourceQuantity = ResourceQuantity {
        cpu_millis: 0,
        memory_bytes: 0,
    };

    pub fn new(cpu_millis: u64, memory_bytes: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
        }
    }

    pub fn saturating_add(&self, other: &ResourceQuantity) -> ResourceQuantity {
        ResourceQuantity {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }

    pub fn saturating_mul(&self, factor: u32) -> ResourceQuantity {
        ResourceQuantity {
            cpu_millis: self.cpu_millis.saturating_mul(u64::from(factor)),
            memory_bytes: self.memory_bytes.saturating_mul(u64::from(factor)),
        }
    }

    /// True when `self` fits inside `capacity` scaled by `factor`.
    ///
    /// A zero capacity dimension only admits a zero request.
    pub fn fits_within(&self, capacity: &ResourceQuantity, factor: f64) -> bool {
        let cpu_limit = capacity.cpu_millis as f64 * factor;
        let mem_limit = capacity.memory_bytes as f64 * factor;
        self.cpu_millis as f64 <= cpu_limit && self.memory_bytes as f64 <= mem_limit
    }

    pub fn is_zero(&self) -> bool {
        self.cpu_millis == 0 && self.memory_bytes == 0
    }
}

impl fmt::Display for ResourceQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu={}m mem={}B", self.cpu_millis, self.memory_bytes)
    }
}

/// Ratio of `used` to `capacity` across both dimensions (the larger wins).
///
/// A dimension with zero capacity counts as fully utilized when anything
/// is used on it, and as idle otherwise.
pub fn utilization_ratio(used: &ResourceQuantity, capacity: &ResourceQuantity) -> f64 {
    fn ratio(used: u64, cap: u64) -> f64 {
        if cap == 0 {
            if used == 0 { 0.0 } else { 1.0 }
        } else {
            used as f64 / cap as f64
        }
    }
    ratio(used.cpu_millis, capacity.cpu_millis).max(ratio(used.memory_bytes, capacity.memory_bytes))
}

// ── Workload request ───────────────────────────────────────────────

/// How requested replicas map onto the selected clusters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMode {
    /// Every selected cluster runs the full replica count.
    #[default]
    Replicate,
    /// Replicas are divided across the selection; the remainder goes to
    /// the highest-ranked clusters.
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AffinityKind {
    /// All selected clusters must share the same topology value.
    CoLocate,
    /// Selected clusters must have pairwise distinct topology values.
    Separate,
}

/// A co-location or separation requirement over a topology label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityRule {
    pub kind: AffinityKind,
    /// Cluster label key defining the topology domain (e.g. `region`).
    pub topology_key: String,
    /// Required rules produce fatal conflicts, preferred ones advisory.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

fn default_one() -> u32 {
    1
}

/// A request to place one workload. Immutable for the duration of an
/// evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRequest {
    pub workspace: String,
    pub namespace: String,
    pub name: String,
    /// Workload class; scopes round-robin rotation.
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub labels: Labels,
    /// Selector the candidate supplier uses to enumerate clusters.
    #[serde(default)]
    pub selector: Labels,
    /// Resources reserved per replica.
    #[serde(default)]
    pub resources: ResourceQuantity,
    #[serde(default = "default_one")]
    pub replicas: u32,
    /// Number of clusters to select.
    #[serde(default = "default_one")]
    pub clusters: u32,
    #[serde(default)]
    pub distribution: DistributionMode,
    /// Preferred locations, strongest first.
    #[serde(default)]
    pub location_preferences: Vec<String>,
    #[serde(default)]
    pub affinity: Vec<AffinityRule>,
}

impl WorkloadRequest {
    pub fn new(workspace: &str, namespace: &str, name: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            class: String::new(),
            labels: Labels::new(),
            selector: Labels::new(),
            resources: ResourceQuantity::ZERO,
            replicas: 1,
            clusters: 1,
            distribution: DistributionMode::Replicate,
            location_preferences: Vec::new(),
            affinity: Vec::new(),
        }
    }

    /// Stable workload identifier: `{workspace}:{namespace}/{name}`.
    pub fn id(&self) -> String {
        format!("{}:{}/{}", self.workspace, self.namespace, self.name)
    }

    /// The round-robin class key, falling back to the workload id.
    pub fn class_key(&self) -> String {
        if self.class.is_empty() {
            self.id()
        } else {
            self.class.clone()
        }
    }

    /// Structural sanity check performed before any collaborator is called.
    pub fn validate(&self) -> Result<(), String> {
        if self.workspace.is_empty() || self.namespace.is_empty() || self.name.is_empty() {
            return Err("workload workspace, namespace and name must be non-empty".to_string());
        }
        if self.clusters == 0 {
            return Err("workload must request at least one cluster".to_string());
        }
        for rule in &self.affinity {
            if rule.topology_key.is_empty() {
                return Err("affinity rule has an empty topology key".to_string());
            }
        }
        Ok(())
    }

    /// Resources one selected cluster is expected to reserve when the
    /// selection has exactly the requested number of clusters. Spread
    /// placements round the per-cluster replica share up.
    pub fn reservation_estimate(&self) -> ResourceQuantity {
        let per_cluster = match self.distribution {
            DistributionMode::Replicate => self.replicas,
            DistributionMode::Spread => self.replicas.div_ceil(self.clusters.max(1)),
        };
        self.resources.saturating_mul(per_cluster)
    }

    /// Replicas assigned to each position of a selection of size `selected`.
    pub fn replica_assignment(&self, selected: usize) -> Vec<u32> {
        if selected == 0 {
            return Vec::new();
        }
        match self.distribution {
            DistributionMode::Replicate => vec![self.replicas; selected],
            DistributionMode::Spread => {
                let n = selected as u32;
                let base = self.replicas / n;
                let remainder = (self.replicas % n) as usize;
                (0..selected)
                    .map(|i| if i < remainder { base + 1 } else { base })
                    .collect()
            }
        }
    }
}

// ── Candidates ─────────────────────────────────────────────────────

/// A cluster under consideration, as supplied for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub cluster: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub labels: Labels,
    pub capacity: ResourceQuantity,
    #[serde(default)]
    pub allocated: ResourceQuantity,
    #[serde(default = "default_true")]
    pub healthy: bool,
}

impl Candidate {
    pub fn new(cluster: &str, capacity: ResourceQuantity, allocated: ResourceQuantity) -> Self {
        Self {
            cluster: cluster.to_string(),
            workspace: String::new(),
            labels: Labels::new(),
            capacity,
            allocated,
            healthy: true,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Current utilization in `0.0..` (may exceed 1.0 when overcommitted).
    pub fn utilization(&self) -> f64 {
        utilization_ratio(&self.allocated, &self.capacity)
    }

    /// Utilization after reserving `extra` on top of current allocation.
    pub fn projected_utilization(&self, extra: &ResourceQuantity) -> f64 {
        utilization_ratio(&self.allocated.saturating_add(extra), &self.capacity)
    }

    /// Whether reserving `extra` stays within `capacity * overcommit`.
    pub fn can_reserve(&self, extra: &ResourceQuantity, overcommit: f64) -> bool {
        self.allocated
            .saturating_add(extra)
            .fits_within(&self.capacity, overcommit)
    }
}

/// A candidate annotated by a scheduling algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    /// Score in `0.0..=100.0`, higher is better.
    pub score: f64,
    pub algorithm: String,
}

impl ScoredCandidate {
    pub fn cluster(&self) -> &str {
        &self.candidate.cluster
    }
}

// ── Policies ───────────────────────────────────────────────────────

/// Where a policy applies. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    /// Workspace path prefix, matched on `:` segment boundaries.
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub namespaces: Vec<String>,
}

impl PolicyScope {
    pub fn applies_to(&self, workload: &WorkloadRequest) -> bool {
        workspace_contains(&self.workspace, &workload.workspace)
            && (self.namespaces.is_empty() || self.namespaces.iter().any(|n| n == &workload.namespace))
    }
}

/// True when `workspace` equals `prefix` or is nested beneath it
/// (`root:org` contains `root:org:team` but not `root:organic`).
pub fn workspace_contains(prefix: &str, workspace: &str) -> bool {
    if prefix.is_empty() || prefix == workspace {
        return true;
    }
    workspace
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with(':'))
}

fn default_weight() -> f64 {
    1.0
}

/// A named, versioned placement rule. Owned by the policy store; the
/// engine only compiles and evaluates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementPolicy {
    pub id: String,
    pub version: u64,
    #[serde(default)]
    pub name: String,
    pub expression: String,
    /// Higher priority verdicts override lower ones.
    #[serde(default)]
    pub priority: i32,
    /// Weight of this policy's score contribution.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub scope: PolicyScope,
    #[serde(default)]
    pub author: String,
}

// ── Overrides ──────────────────────────────────────────────────────

/// Override directive kinds, in application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverrideKind {
    Force,
    Exclude,
    Prefer,
    Avoid,
}

impl OverrideKind {
    /// Force/Exclude decide membership; Prefer/Avoid only move rank.
    pub fn is_membership(&self) -> bool {
        matches!(self, OverrideKind::Force | OverrideKind::Exclude)
    }
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OverrideKind::Force => "force",
            OverrideKind::Exclude => "exclude",
            OverrideKind::Prefer => "prefer",
            OverrideKind::Avoid => "avoid",
        };
        f.write_str(s)
    }
}

/// Which workloads an override applies to. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadSelector {
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
}

impl WorkloadSelector {
    pub fn matches(&self, workload: &WorkloadRequest) -> bool {
        workspace_contains(&self.workspace, &workload.workspace)
            && (self.namespace.is_empty() || self.namespace == workload.namespace)
            && (self.name.is_empty() || self.name == workload.name)
            && self
                .labels
                .iter()
                .all(|(k, v)| workload.labels.get(k) == Some(v))
    }
}

/// Which clusters an override targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSelector {
    /// Exact cluster names; when non-empty, only these match.
    #[serde(default)]
    pub names: Vec<String>,
    /// Label selector expression (`k=v,k2 in (a,b)`).
    #[serde(default)]
    pub selector: String,
}

impl ClusterSelector {
    pub fn for_cluster(name: &str) -> Self {
        Self {
            names: vec![name.to_string()],
            selector: String::new(),
        }
    }

    /// Whether this selector matches `candidate`. A selector that fails to
    /// parse matches nothing.
    pub fn matches(&self, candidate: &Candidate) -> bool {
        if !self.names.is_empty() && !self.names.iter().any(|n| n == &candidate.cluster) {
            return false;
        }
        if self.selector.is_empty() {
            return !self.names.is_empty();
        }
        LabelSelector::parse(&self.selector)
            .map(|s| s.matches(&candidate.labels))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideTarget {
    #[serde(default)]
    pub workload: WorkloadSelector,
    #[serde(default)]
    pub clusters: ClusterSelector,
}

/// An operator-supplied placement directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub id: String,
    pub kind: OverrideKind,
    pub target: OverrideTarget,
    #[serde(default)]
    pub priority: i32,
    /// Creation time, epoch millis.
    pub created_at: u64,
    /// Expiry time, epoch millis; `None` never expires.
    #[serde(default)]
    pub expires_at: Option<u64>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub reason: String,
}

impl Override {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now_millis)
    }
}

// ── Conflicts and validation ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Advisory,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Empty selection, unknown or duplicate references, unhealthy cluster.
    Structural,
    ResourceOvercommit,
    /// High projected utilization; always advisory.
    UtilizationWarning,
    AffinityViolation,
    /// A selected cluster is hard-excluded by a policy.
    PolicyViolation,
    /// Two equal-priority policies disagree about one cluster.
    PolicyContradiction,
    /// An override lost a recency contest against another override.
    OverrideConflict,
    /// A Force override could not be honoured within hard capacity.
    ForceRejected,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::Structural => "structural",
            ConflictKind::ResourceOvercommit => "resource-overcommit",
            ConflictKind::UtilizationWarning => "utilization-warning",
            ConflictKind::AffinityViolation => "affinity-violation",
            ConflictKind::PolicyViolation => "policy-violation",
            ConflictKind::PolicyContradiction => "policy-contradiction",
            ConflictKind::OverrideConflict => "override-conflict",
            ConflictKind::ForceRejected => "force-rejected",
        };
        f.write_str(s)
    }
}

/// A detected violation attached to a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    /// Clusters implicated; fatal conflicts remove these on retry.
    pub clusters: Vec<String>,
    #[serde(default)]
    pub override_ids: Vec<String>,
    pub message: String,
    /// How the engine resolved a fatal conflict, if it did.
    #[serde(default)]
    pub resolution: Option<String>,
}

impl Conflict {
    pub fn fatal(kind: ConflictKind, clusters: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Fatal,
            clusters,
            override_ids: Vec::new(),
            message: message.into(),
            resolution: None,
        }
    }

    pub fn advisory(kind: ConflictKind, clusters: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Advisory,
            clusters,
            override_ids: Vec::new(),
            message: message.into(),
            resolution: None,
        }
    }

    pub fn with_overrides(mut self, ids: Vec<String>) -> Self {
        self.override_ids = ids;
        self
    }

    pub fn resolved(mut self, how: impl Into<String>) -> Self {
        self.resolution = Some(how.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }

    /// Fatal and not yet resolved by the engine.
    pub fn is_blocking(&self) -> bool {
        self.is_fatal() && self.resolution.is_none()
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Fatal => "fatal",
            Severity::Advisory => "advisory",
        };
        write!(f, "[{sev} {}] {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub conflicts: Vec<Conflict>,
}

impl ValidationResult {
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self {
            passed: !conflicts.iter().any(Conflict::is_fatal),
            conflicts,
        }
    }

    pub fn fatal(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| c.is_fatal())
    }

    pub fn advisory(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.is_fatal())
    }
}

// ── Decision and audit ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombinationAlgorithm {
    WeightedBlend,
    PolicyPrimary,
    SchedulerPrimary,
    Consensus,
}

impl fmt::Display for CombinationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CombinationAlgorithm::WeightedBlend => "weighted-blend",
            CombinationAlgorithm::PolicyPrimary => "policy-primary",
            CombinationAlgorithm::SchedulerPrimary => "scheduler-primary",
            CombinationAlgorithm::Consensus => "consensus",
        };
        f.write_str(s)
    }
}

/// A cluster in the final selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedCluster {
    pub cluster: String,
    pub score: f64,
    pub replicas: u32,
    pub reserved: ResourceQuantity,
    /// Included by a Force override rather than by ranking.
    #[serde(default)]
    pub forced: bool,
}

/// Per-candidate scoring trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    pub cluster: String,
    pub scheduler_score: f64,
    pub policy_score: f64,
    pub final_score: f64,
    pub selected: bool,
    pub rationale: Vec<String>,
}

/// Pipeline stage that removed a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionStage {
    Policy,
    Combiner,
    Validator,
    Override,
    Capacity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub cluster: String,
    pub stage: RejectionStage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedOverride {
    pub override_id: String,
    pub kind: OverrideKind,
    pub cluster: String,
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedOverride {
    pub override_id: String,
    pub reason: String,
}

/// A policy that failed to compile or evaluate and was treated as neutral.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluationError {
    pub policy_id: String,
    pub version: u64,
    /// `None` when compilation failed (affects every candidate).
    pub cluster: Option<String>,
    pub message: String,
}

/// The engine's output for one evaluation. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub workload_id: String,
    pub selected: Vec<SelectedCluster>,
    pub scores: Vec<CandidateScore>,
    pub scheduler_algorithm: String,
    pub combination: CombinationAlgorithm,
    pub overrides_applied: Vec<AppliedOverride>,
    pub overrides_skipped: Vec<SkippedOverride>,
    pub conflicts: Vec<Conflict>,
    pub policy_errors: Vec<PolicyEvaluationError>,
    pub rationale: Vec<String>,
    /// Combine/validate passes needed (1 means no retry).
    pub attempts: u32,
    /// Evaluation time, epoch millis.
    pub decided_at: u64,
}

impl Decision {
    pub fn selected_clusters(&self) -> Vec<&str> {
        self.selected.iter().map(|s| s.cluster.as_str()).collect()
    }

    pub fn is_selected(&self, cluster: &str) -> bool {
        self.selected.iter().any(|s| s.cluster == cluster)
    }
}

/// A decision plus its full rejection trail, as retained by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub decision: Decision,
    pub rejected: Vec<Rejection>,
    pub recorded_at: u64,
}

impl AuditRecord {
    pub fn workload_id(&self) -> &str {
        &self.decision.workload_id
    }

    pub fn decision_id(&self) -> &str {
        &self.decision.id
    }
}
