//! Validator: checks a proposed selection and types every conflict.
//!
//! Fatal conflicts name the clusters whose removal could fix them; the
//! engine drops those clusters and re-derives the proposal. Advisory
//! conflicts are carried into the decision unchanged.

use std::collections::{BTreeMap, BTreeSet};

use kplane_core::config::ValidatorConfig;
use kplane_core::{
    AffinityKind, AffinityRule, Candidate, Conflict, ConflictKind, SelectedCluster,
    ValidationResult, WorkloadRequest,
};
use kplane_policy::CandidatePolicyResult;
use tracing::debug;

use crate::combiner::RankedCandidate;

/// Turn ranked candidates into placements: replica counts per position
/// and the resources each reserves.
pub fn placements(request: &WorkloadRequest, ranked: &[RankedCandidate]) -> Vec<SelectedCluster> {
    let replicas = request.replica_assignment(ranked.len());
    ranked
        .iter()
        .zip(replicas)
        .map(|(r, n)| SelectedCluster {
            cluster: r.cluster().to_string(),
            score: r.final_score,
            replicas: n,
            reserved: request.resources.saturating_mul(n),
            forced: r.forced,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn validate(
        &self,
        request: &WorkloadRequest,
        selection: &[SelectedCluster],
        candidates: &BTreeMap<String, Candidate>,
        policy: &BTreeMap<String, CandidatePolicyResult>,
    ) -> ValidationResult {
        let mut conflicts = Vec::new();

        let known = self.check_structure(selection, candidates, &mut conflicts);
        self.check_capacity(&known, &mut conflicts);
        check_policy_compliance(selection, policy, &mut conflicts);
        for rule in &request.affinity {
            check_affinity(rule, &known, &mut conflicts);
        }
        check_contradictions(policy, &mut conflicts);

        let result = ValidationResult::from_conflicts(conflicts);
        debug!(
            workload = %request.id(),
            passed = result.passed,
            fatal = result.fatal().count(),
            advisory = result.advisory().count(),
            "validated proposal"
        );
        result
    }

    /// Structural checks. Returns the selection entries that reference a
    /// known candidate, deduplicated, in selection order.
    fn check_structure<'a>(
        &self,
        selection: &'a [SelectedCluster],
        candidates: &'a BTreeMap<String, Candidate>,
        conflicts: &mut Vec<Conflict>,
    ) -> Vec<(&'a SelectedCluster, &'a Candidate)> {
        if selection.is_empty() {
            conflicts.push(Conflict::fatal(
                ConflictKind::Structural,
                Vec::new(),
                "selection is empty",
            ));
            return Vec::new();
        }

        let mut seen = BTreeSet::new();
        let mut known = Vec::with_capacity(selection.len());
        for s in selection {
            if !seen.insert(s.cluster.as_str()) {
                conflicts.push(Conflict::fatal(
                    ConflictKind::Structural,
                    vec![s.cluster.clone()],
                    format!("cluster {} selected more than once", s.cluster),
                ));
                continue;
            }
            let Some(candidate) = candidates.get(&s.cluster) else {
                conflicts.push(Conflict::fatal(
                    ConflictKind::Structural,
                    vec![s.cluster.clone()],
                    format!("cluster {} is not in the candidate set", s.cluster),
                ));
                continue;
            };
            if !candidate.healthy {
                conflicts.push(Conflict::fatal(
                    ConflictKind::Structural,
                    vec![s.cluster.clone()],
                    format!("cluster {} is unhealthy", s.cluster),
                ));
            }
            known.push((s, candidate));
        }
        known
    }

    fn check_capacity(&self, known: &[(&SelectedCluster, &Candidate)], conflicts: &mut Vec<Conflict>) {
        let factor = self.config.overcommit_factor;
        for (s, c) in known {
            if !c.can_reserve(&s.reserved, factor) {
                conflicts.push(Conflict::fatal(
                    ConflictKind::ResourceOvercommit,
                    vec![s.cluster.clone()],
                    format!(
                        "reserving {} on {} exceeds capacity {} x {factor} (allocated {})",
                        s.reserved, s.cluster, c.capacity, c.allocated
                    ),
                ));
                continue;
            }
            let projected = c.projected_utilization(&s.reserved);
            if projected > self.config.utilization_warning {
                conflicts.push(Conflict::advisory(
                    ConflictKind::UtilizationWarning,
                    vec![s.cluster.clone()],
                    format!(
                        "{} projected at {:.0}% utilization",
                        s.cluster,
                        projected * 100.0
                    ),
                ));
            }
        }
    }
}

fn check_policy_compliance(
    selection: &[SelectedCluster],
    policy: &BTreeMap<String, CandidatePolicyResult>,
    conflicts: &mut Vec<Conflict>,
) {
    for s in selection {
        if let Some(result) = policy.get(&s.cluster).filter(|r| r.is_excluded()) {
            conflicts.push(Conflict::fatal(
                ConflictKind::PolicyViolation,
                vec![s.cluster.clone()],
                format!(
                    "{} is excluded by policy {}",
                    s.cluster,
                    result.deciding_policies.join(", ")
                ),
            ));
        }
    }
}

fn check_affinity(
    rule: &AffinityRule,
    known: &[(&SelectedCluster, &Candidate)],
    conflicts: &mut Vec<Conflict>,
) {
    if known.len() < 2 {
        return;
    }
    let key = &rule.topology_key;
    let value = |c: &Candidate| c.labels.get(key).cloned();

    let offenders: Vec<String> = match rule.kind {
        AffinityKind::CoLocate => {
            // The highest-ranked cluster carrying the label sets the domain.
            let anchor = known.iter().find_map(|(_, c)| value(c));
            let anchor_cluster = known
                .iter()
                .find(|(_, c)| value(c).is_some())
                .map_or(known[0].0.cluster.as_str(), |(s, _)| s.cluster.as_str());
            known
                .iter()
                .filter(|(s, c)| s.cluster != anchor_cluster && (anchor.is_none() || value(c) != anchor))
                .map(|(s, _)| s.cluster.clone())
                .collect()
        }
        AffinityKind::Separate => {
            let mut seen = BTreeSet::new();
            known
                .iter()
                .filter(|(_, c)| match value(c) {
                    Some(v) => !seen.insert(v),
                    None => true,
                })
                .map(|(s, _)| s.cluster.clone())
                .collect()
        }
    };

    if offenders.is_empty() {
        return;
    }
    let verb = match rule.kind {
        AffinityKind::CoLocate => "co-locate",
        AffinityKind::Separate => "separate",
    };
    let message = format!(
        "{} violate{} the rule to {verb} on `{key}`",
        offenders.join(", "),
        if offenders.len() == 1 { "s" } else { "" }
    );
    conflicts.push(if rule.required {
        Conflict::fatal(ConflictKind::AffinityViolation, offenders, message)
    } else {
        Conflict::advisory(ConflictKind::AffinityViolation, offenders, message)
    });
}

fn check_contradictions(policy: &BTreeMap<String, CandidatePolicyResult>, conflicts: &mut Vec<Conflict>) {
    for (cluster, result) in policy {
        if let Some(c) = &result.contradiction {
            conflicts.push(Conflict::advisory(
                ConflictKind::PolicyContradiction,
                vec![cluster.clone()],
                format!(
                    "policies {} include and {} exclude {cluster} at priority {}; exclude wins",
                    c.including.join(", "),
                    c.excluding.join(", "),
                    c.priority
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combiner::testing::{contradicted, evaluation};
    use kplane_core::{DistributionMode, ResourceQuantity, Severity};
    use kplane_policy::Verdict;

    fn candidate(name: &str, allocated_cpu: u64) -> Candidate {
        Candidate::new(
            name,
            ResourceQuantity::new(1000, 1000),
            ResourceQuantity::new(allocated_cpu, 0),
        )
    }

    fn request(cpu: u64, replicas: u32) -> WorkloadRequest {
        let mut r = WorkloadRequest::new("root", "default", "api");
        r.resources = ResourceQuantity::new(cpu, 0);
        r.replicas = replicas;
        r
    }

    fn selected(cluster: &str, cpu: u64) -> SelectedCluster {
        SelectedCluster {
            cluster: cluster.into(),
            score: 50.0,
            replicas: 1,
            reserved: ResourceQuantity::new(cpu, 0),
            forced: false,
        }
    }

    fn pool(candidates: Vec<Candidate>) -> BTreeMap<String, Candidate> {
        candidates.into_iter().map(|c| (c.cluster.clone(), c)).collect()
    }

    fn validator() -> Validator {
        Validator::new(ValidatorConfig::default())
    }

    fn kinds(result: &ValidationResult) -> Vec<(ConflictKind, Severity)> {
        result.conflicts.iter().map(|c| (c.kind, c.severity)).collect()
    }

    #[test]
    fn clean_selection_passes() {
        let result = validator().validate(
            &request(100, 1),
            &[selected("a", 100)],
            &pool(vec![candidate("a", 0)]),
            &BTreeMap::new(),
        );
        assert!(result.passed);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn structural_problems_are_fatal() {
        let v = validator();
        let empty = v.validate(&request(0, 1), &[], &BTreeMap::new(), &BTreeMap::new());
        assert!(!empty.passed);
        assert!(empty.conflicts[0].clusters.is_empty());

        let mut sick = candidate("sick", 0);
        sick.healthy = false;
        let result = v.validate(
            &request(0, 1),
            &[selected("ghost", 0), selected("sick", 0), selected("sick", 0)],
            &pool(vec![sick]),
            &BTreeMap::new(),
        );
        assert!(!result.passed);
        let clusters: Vec<&str> = result.fatal().flat_map(|c| c.clusters.iter().map(String::as_str)).collect();
        assert_eq!(clusters, vec!["ghost", "sick", "sick"]);
    }

    #[test]
    fn overcommit_is_fatal_and_respects_factor() {
        let cands = pool(vec![candidate("a", 800)]);
        let result = validator().validate(&request(300, 1), &[selected("a", 300)], &cands, &BTreeMap::new());
        assert_eq!(kinds(&result), vec![(ConflictKind::ResourceOvercommit, Severity::Fatal)]);

        let lenient = Validator::new(ValidatorConfig {
            overcommit_factor: 1.2,
            utilization_warning: 2.0,
            ..ValidatorConfig::default()
        });
        assert!(lenient.validate(&request(300, 1), &[selected("a", 300)], &cands, &BTreeMap::new()).passed);
    }

    #[test]
    fn high_utilization_is_advisory() {
        let result = validator().validate(
            &request(150, 1),
            &[selected("a", 150)],
            &pool(vec![candidate("a", 800)]),
            &BTreeMap::new(),
        );
        assert!(result.passed);
        assert_eq!(kinds(&result), vec![(ConflictKind::UtilizationWarning, Severity::Advisory)]);
    }

    #[test]
    fn excluded_cluster_in_selection_is_a_violation() {
        let e = evaluation("a", 50.0, 0.0, Verdict::Exclude);
        let policy = BTreeMap::from([("a".to_string(), e.policy)]);
        let result = validator().validate(&request(0, 1), &[selected("a", 0)], &pool(vec![candidate("a", 0)]), &policy);
        assert_eq!(kinds(&result), vec![(ConflictKind::PolicyViolation, Severity::Fatal)]);
    }

    #[test]
    fn contradictions_are_advisory() {
        let e = contradicted("b");
        let policy = BTreeMap::from([("b".to_string(), e.policy)]);
        let result = validator().validate(&request(0, 1), &[selected("a", 0)], &pool(vec![candidate("a", 0)]), &policy);
        assert!(result.passed);
        assert_eq!(kinds(&result), vec![(ConflictKind::PolicyContradiction, Severity::Advisory)]);
    }

    #[test]
    fn colocation_flags_clusters_outside_anchor_domain() {
        let mut req = request(0, 1);
        req.affinity.push(AffinityRule {
            kind: AffinityKind::CoLocate,
            topology_key: "region".into(),
            required: true,
        });
        let cands = pool(vec![
            candidate("a", 0).with_label("region", "eu"),
            candidate("b", 0).with_label("region", "us"),
            candidate("c", 0).with_label("region", "eu"),
        ]);
        let sel = [selected("a", 0), selected("b", 0), selected("c", 0)];
        let result = validator().validate(&req, &sel, &cands, &BTreeMap::new());
        assert!(!result.passed);
        assert_eq!(result.conflicts[0].clusters, vec!["b".to_string()]);
    }

    #[test]
    fn separation_flags_later_duplicates() {
        let mut req = request(0, 1);
        req.affinity.push(AffinityRule {
            kind: AffinityKind::Separate,
            topology_key: "zone".into(),
            required: false,
        });
        let cands = pool(vec![
            candidate("a", 0).with_label("zone", "z1"),
            candidate("b", 0).with_label("zone", "z1"),
            candidate("c", 0).with_label("zone", "z2"),
        ]);
        let sel = [selected("a", 0), selected("b", 0), selected("c", 0)];
        let result = validator().validate(&req, &sel, &cands, &BTreeMap::new());
        // Preferred rules never block.
        assert!(result.passed);
        assert_eq!(result.conflicts[0].clusters, vec!["b".to_string()]);
        assert_eq!(result.conflicts[0].severity, Severity::Advisory);
    }

    #[test]
    fn placements_follow_distribution_mode() {
        let mut req = request(100, 5);
        let ranked: Vec<RankedCandidate> = ["a", "b"]
            .iter()
            .map(|c| {
                let e = evaluation(c, 50.0, 0.0, Verdict::Neutral);
                RankedCandidate {
                    candidate: e.candidate,
                    scheduler_score: 50.0,
                    policy_score: 0.0,
                    final_score: 25.0,
                    forced: false,
                    rationale: Vec::new(),
                }
            })
            .collect();

        let replicate = placements(&req, &ranked);
        assert_eq!(replicate[1].replicas, 5);
        assert_eq!(replicate[1].reserved.cpu_millis, 500);

        req.distribution = DistributionMode::Spread;
        let spread = placements(&req, &ranked);
        assert_eq!((spread[0].replicas, spread[1].replicas), (3, 2));
        assert_eq!(spread[0].reserved.cpu_millis, 300);
    }
}
