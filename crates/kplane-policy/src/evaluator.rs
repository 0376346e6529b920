//! Per-candidate policy aggregation.
//!
//! [`PolicyEvaluator::prepare`] selects the policies whose scope covers a
//! workload and resolves each to its compiled form through the cache.
//! The resulting [`PreparedPolicies`] is immutable and cheap to share, so
//! the engine can evaluate every candidate in its own task.
//!
//! For each candidate, verdicts are resolved by the highest priority that
//! produced one: an exclude at that priority wins, and an include and an
//! exclude at the same priority are reported as a [`Contradiction`].
//! Scores are averaged by policy weight; a policy that failed to compile
//! or evaluate contributes zero with its full weight.

use std::sync::Arc;

use kplane_core::config::{LocationConfig, PolicyConfig};
use kplane_core::{Candidate, PlacementPolicy, PolicyEvaluationError, WorkloadRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::PolicyCache;
use crate::compile::CompiledPolicy;
use crate::interpreter::EvalContext;
use crate::value::PolicyOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Include,
    Exclude,
    Neutral,
}

/// One policy's outcome for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyContribution {
    pub policy_id: String,
    pub version: u64,
    pub priority: i32,
    pub weight: f64,
    pub outcome: PolicyOutcome,
}

/// Equal-priority policies that disagree about one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    pub priority: i32,
    pub including: Vec<String>,
    pub excluding: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePolicyResult {
    pub cluster: String,
    pub verdict: Verdict,
    /// Policies whose verdict decided `verdict`.
    pub deciding_policies: Vec<String>,
    /// Weighted policy score in `0.0..=100.0`.
    pub score: f64,
    pub contributions: Vec<PolicyContribution>,
    /// Evaluation failures for this candidate.
    pub errors: Vec<PolicyEvaluationError>,
    pub contradiction: Option<Contradiction>,
}

impl CandidatePolicyResult {
    pub fn neutral(cluster: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            verdict: Verdict::Neutral,
            deciding_policies: Vec::new(),
            score: 0.0,
            contributions: Vec::new(),
            errors: Vec::new(),
            contradiction: None,
        }
    }

    pub fn is_excluded(&self) -> bool {
        self.verdict == Verdict::Exclude
    }

    pub fn is_included(&self) -> bool {
        self.verdict == Verdict::Include
    }
}

struct PreparedPolicy {
    id: String,
    version: u64,
    priority: i32,
    weight: f64,
    compiled: Result<Arc<CompiledPolicy>, String>,
}

/// Policies resolved for one workload, ready to run against candidates.
pub struct PreparedPolicies {
    policies: Vec<PreparedPolicy>,
    location: LocationConfig,
}

impl std::fmt::Debug for PreparedPolicies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedPolicies")
            .field("policies", &self.policies.iter().map(|p| &p.id).collect::<Vec<_>>())
            .finish()
    }
}

impl PreparedPolicies {
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policies that failed to compile. They count as errors for every
    /// candidate, so they are reported once here rather than per cluster.
    pub fn compile_errors(&self) -> Vec<PolicyEvaluationError> {
        self.policies
            .iter()
            .filter_map(|p| {
                p.compiled.as_ref().err().map(|message| PolicyEvaluationError {
                    policy_id: p.id.clone(),
                    version: p.version,
                    cluster: None,
                    message: message.clone(),
                })
            })
            .collect()
    }

    pub fn evaluate(&self, workload: &WorkloadRequest, candidate: &Candidate) -> CandidatePolicyResult {
        let ctx = EvalContext::new(candidate, workload, &self.location);
        let mut result = CandidatePolicyResult::neutral(&candidate.cluster);

        for p in &self.policies {
            let outcome = match &p.compiled {
                Ok(compiled) => compiled.evaluate(&ctx),
                Err(message) => PolicyOutcome::Error(message.clone()),
            };
            if let (PolicyOutcome::Error(message), Ok(_)) = (&outcome, &p.compiled) {
                result.errors.push(PolicyEvaluationError {
                    policy_id: p.id.clone(),
                    version: p.version,
                    cluster: Some(candidate.cluster.clone()),
                    message: message.clone(),
                });
            }
            result.contributions.push(PolicyContribution {
                policy_id: p.id.clone(),
                version: p.version,
                priority: p.priority,
                weight: p.weight,
                outcome,
            });
        }

        resolve_verdict(&mut result);
        result.score = weighted_score(&result.contributions);
        result
    }
}

fn resolve_verdict(result: &mut CandidatePolicyResult) {
    let top = result
        .contributions
        .iter()
        .filter(|c| matches!(c.outcome, PolicyOutcome::Verdict(_)))
        .map(|c| c.priority)
        .max();
    let Some(top) = top else {
        return;
    };

    let mut including = Vec::new();
    let mut excluding = Vec::new();
    for c in &result.contributions {
        match c.outcome {
            PolicyOutcome::Verdict(true) if c.priority == top => including.push(c.policy_id.clone()),
            PolicyOutcome::Verdict(false) if c.priority == top => excluding.push(c.policy_id.clone()),
            _ => {}
        }
    }

    if excluding.is_empty() {
        result.verdict = Verdict::Include;
        result.deciding_policies = including;
        return;
    }
    result.verdict = Verdict::Exclude;
    if !including.is_empty() {
        result.contradiction = Some(Contradiction {
            priority: top,
            including,
            excluding: excluding.clone(),
        });
    }
    result.deciding_policies = excluding;
}

fn weighted_score(contributions: &[PolicyContribution]) -> f64 {
    let mut total = 0.0;
    let mut weight = 0.0;
    for c in contributions {
        match c.outcome {
            PolicyOutcome::Score(s) => {
                total += s * c.weight;
                weight += c.weight;
            }
            PolicyOutcome::Error(_) => weight += c.weight,
            PolicyOutcome::Verdict(_) => {}
        }
    }
    if weight > 0.0 {
        (total / weight).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Entry point: scopes, compiles (through the cache) and prepares policies.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    cache: Arc<PolicyCache>,
    location: LocationConfig,
}

impl PolicyEvaluator {
    pub fn new(config: &PolicyConfig, location: LocationConfig) -> Self {
        Self::with_cache(Arc::new(PolicyCache::new(config)), location)
    }

    pub fn with_cache(cache: Arc<PolicyCache>, location: LocationConfig) -> Self {
        Self { cache, location }
    }

    pub fn cache(&self) -> &Arc<PolicyCache> {
        &self.cache
    }

    /// Resolve the policies applying to `workload`, in id order.
    pub fn prepare(&self, workload: &WorkloadRequest, policies: &[PlacementPolicy]) -> PreparedPolicies {
        let mut scoped: Vec<&PlacementPolicy> = policies
            .iter()
            .filter(|p| p.scope.applies_to(workload))
            .collect();
        scoped.sort_by(|a, b| a.id.cmp(&b.id));

        let prepared = scoped
            .into_iter()
            .map(|p| {
                let compiled = self.cache.get_or_compile(p).map_err(|e| {
                    warn!(policy_id = %p.id, version = p.version, error = %e, "policy failed to compile");
                    e.to_string()
                });
                PreparedPolicy {
                    id: p.id.clone(),
                    version: p.version,
                    priority: p.priority,
                    weight: if p.weight.is_finite() { p.weight.max(0.0) } else { 0.0 },
                    compiled,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            workload = %workload.id(),
            total = policies.len(),
            applicable = prepared.len(),
            "prepared policies"
        );
        PreparedPolicies {
            policies: prepared,
            location: self.location.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kplane_core::{PolicyScope, ResourceQuantity};

    fn policy(id: &str, priority: i32, weight: f64, expression: &str) -> PlacementPolicy {
        PlacementPolicy {
            id: id.into(),
            version: 1,
            name: String::new(),
            expression: expression.into(),
            priority,
            weight,
            scope: PolicyScope::default(),
            author: String::new(),
        }
    }

    fn candidate(name: &str, env: &str) -> Candidate {
        Candidate::new(name, ResourceQuantity::new(1000, 1000), ResourceQuantity::new(200, 200))
            .with_label("env", env)
    }

    fn run(policies: &[PlacementPolicy], c: &Candidate) -> CandidatePolicyResult {
        let evaluator = PolicyEvaluator::new(&PolicyConfig::default(), LocationConfig::default());
        let workload = WorkloadRequest::new("root:org", "default", "api");
        evaluator.prepare(&workload, policies).evaluate(&workload, c)
    }

    #[test]
    fn no_policies_is_neutral() {
        let r = run(&[], &candidate("a", "prod"));
        assert_eq!(r.verdict, Verdict::Neutral);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn higher_priority_verdict_wins() {
        let policies = [
            policy("allow-all", 1, 1.0, "true"),
            policy("no-dev", 10, 1.0, r#"label("env") != "dev""#),
        ];
        let r = run(&policies, &candidate("a", "dev"));
        assert_eq!(r.verdict, Verdict::Exclude);
        assert_eq!(r.deciding_policies, vec!["no-dev".to_string()]);
        assert!(r.contradiction.is_none());

        let r = run(&policies, &candidate("b", "prod"));
        assert_eq!(r.verdict, Verdict::Include);
    }

    #[test]
    fn equal_priority_disagreement_excludes_and_reports() {
        let policies = [
            policy("include", 5, 1.0, "true"),
            policy("exclude", 5, 1.0, "false"),
        ];
        let r = run(&policies, &candidate("a", "prod"));
        assert_eq!(r.verdict, Verdict::Exclude);
        let contradiction = r.contradiction.unwrap();
        assert_eq!(contradiction.priority, 5);
        assert_eq!(contradiction.including, vec!["include".to_string()]);
        assert_eq!(contradiction.excluding, vec!["exclude".to_string()]);
    }

    #[test]
    fn scores_are_weight_averaged() {
        let policies = [
            policy("heavy", 0, 3.0, "80"),
            policy("light", 0, 1.0, "40"),
            policy("verdict", 0, 1.0, "true"),
        ];
        let r = run(&policies, &candidate("a", "prod"));
        assert_eq!(r.score, 70.0);
        assert_eq!(r.verdict, Verdict::Include);
    }

    #[test]
    fn failing_policy_is_neutral_zero() {
        let policies = [
            policy("good", 0, 1.0, "100"),
            policy("div", 0, 1.0, "1 / 0"),
            policy("broken", 0, 2.0, "label("),
        ];
        let evaluator = PolicyEvaluator::new(&PolicyConfig::default(), LocationConfig::default());
        let workload = WorkloadRequest::new("root:org", "default", "api");
        let prepared = evaluator.prepare(&workload, &policies);
        let r = prepared.evaluate(&workload, &candidate("a", "prod"));

        // 100 * 1 / (1 + 1 + 2)
        assert_eq!(r.score, 25.0);
        assert_eq!(r.verdict, Verdict::Neutral);
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].policy_id, "div");
        assert_eq!(r.errors[0].cluster.as_deref(), Some("a"));

        let compile_errors = prepared.compile_errors();
        assert_eq!(compile_errors.len(), 1);
        assert_eq!(compile_errors[0].policy_id, "broken");
        assert!(compile_errors[0].cluster.is_none());
    }

    #[test]
    fn out_of_scope_policies_are_ignored() {
        let mut scoped = policy("other-team", 100, 1.0, "false");
        scoped.scope = PolicyScope {
            workspace: "root:other".into(),
            namespaces: vec![],
        };
        let r = run(&[scoped], &candidate("a", "prod"));
        assert_eq!(r.verdict, Verdict::Neutral);
        assert!(r.contributions.is_empty());
    }

    #[test]
    fn prepared_policies_reuse_cache() {
        let evaluator = PolicyEvaluator::new(&PolicyConfig::default(), LocationConfig::default());
        let workload = WorkloadRequest::new("root:org", "default", "api");
        let policies = [policy("p", 0, 1.0, "50")];
        evaluator.prepare(&workload, &policies);
        evaluator.prepare(&workload, &policies);
        let stats = evaluator.cache().stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }
}
