//! Override manager: applies operator directives to a validated proposal.
//!
//! Each targeted cluster is contested on two independent axes:
//! membership (Force / Exclude) and rank (Prefer / Avoid). On each axis
//! the winning override is the one with the highest priority, then the
//! most recent creation time, then kind order, then id. An override of
//! the opposite kind that loses is reported as an advisory conflict.
//!
//! Winners apply in kind order: Force, Exclude, Prefer, Avoid.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use kplane_core::config::OverrideConfig;
use kplane_core::{
    AppliedOverride, Conflict, ConflictKind, Override, OverrideKind, Rejection, RejectionStage,
    SkippedOverride, WorkloadRequest,
};
use tracing::{debug, info};

use crate::combiner::{CandidateEvaluation, Proposal, RankedCandidate};

/// The proposal after overrides, plus the trail of what happened.
#[derive(Debug, Clone, Default)]
pub struct OverrideOutcome {
    pub selected: Vec<RankedCandidate>,
    pub alternates: Vec<RankedCandidate>,
    pub applied: Vec<AppliedOverride>,
    pub skipped: Vec<SkippedOverride>,
    pub conflicts: Vec<Conflict>,
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone)]
pub struct OverrideManager {
    config: OverrideConfig,
    overcommit_factor: f64,
}

/// Winner first.
fn precedence(a: &Override, b: &Override) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.kind.cmp(&b.kind))
        .then_with(|| a.id.cmp(&b.id))
}

impl OverrideManager {
    pub fn new(config: OverrideConfig, overcommit_factor: f64) -> Self {
        Self {
            config,
            overcommit_factor,
        }
    }

    pub fn apply(
        &self,
        request: &WorkloadRequest,
        now: u64,
        overrides: &[Override],
        evaluations: &[CandidateEvaluation],
        proposal: Proposal,
    ) -> OverrideOutcome {
        let mut out = OverrideOutcome::default();
        let winners = self.resolve(request, now, overrides, evaluations, &mut out);

        let proposed: BTreeSet<String> = proposal
            .selected
            .iter()
            .map(|r| r.cluster().to_string())
            .collect();
        let mut pool: Vec<RankedCandidate> = proposal
            .selected
            .into_iter()
            .chain(proposal.alternates)
            .collect();
        let wanted = request.clusters as usize;
        let mut added = Vec::new();

        // Force
        for (cluster, ov) in winners.get(&OverrideKind::Force).into_iter().flatten() {
            let Some(e) = evaluations.iter().find(|e| e.cluster() == cluster) else {
                continue;
            };
            let pos = pool.iter().position(|r| r.cluster() == cluster);
            if let Some(pos) = pos.filter(|_| proposed.contains(cluster.as_str())) {
                let entry = &mut pool[pos];
                entry.forced = true;
                entry.rationale.push(format!("pinned by force override {}", ov.id));
                out.applied.push(applied(ov, cluster, "already selected; pinned"));
                continue;
            }

            let reservation = request.reservation_estimate();
            if !e.candidate.can_reserve(&reservation, self.overcommit_factor) {
                let message = format!(
                    "force override {} cannot place {reservation} on {cluster} (capacity {}, allocated {})",
                    ov.id, e.candidate.capacity, e.candidate.allocated
                );
                out.conflicts.push(
                    Conflict::fatal(ConflictKind::ForceRejected, vec![cluster.clone()], message)
                        .with_overrides(vec![ov.id.clone()])
                        .resolved(format!("force not applied; decision proceeds without {cluster}")),
                );
                out.skipped.push(SkippedOverride {
                    override_id: ov.id.clone(),
                    reason: format!("force on {cluster} exceeds hard capacity"),
                });
                out.rejections.push(Rejection {
                    cluster: cluster.clone(),
                    stage: RejectionStage::Capacity,
                    reason: format!("force override {} rejected: insufficient capacity", ov.id),
                });
                continue;
            }

            let mut entry = match pos {
                Some(pos) => pool.remove(pos),
                None => RankedCandidate {
                    candidate: e.candidate.clone(),
                    scheduler_score: e.scheduler_score,
                    policy_score: e.policy.score,
                    final_score: e.scheduler_score,
                    forced: false,
                    rationale: Vec::new(),
                },
            };
            entry.forced = true;
            entry.rationale.push(format!("added by force override {}", ov.id));
            if e.policy.is_excluded() {
                entry
                    .rationale
                    .push("force overrides policy exclusion".to_string());
            }
            added.push(entry);
            out.applied.push(applied(ov, cluster, "added to selection"));
        }

        // Exclude
        for (cluster, ov) in winners.get(&OverrideKind::Exclude).into_iter().flatten() {
            let Some(pos) = pool.iter().position(|r| r.cluster() == cluster) else {
                out.skipped.push(not_in_pool(ov, cluster));
                continue;
            };
            let was_selected = proposed.contains(cluster.as_str());
            pool.remove(pos);
            out.rejections.push(Rejection {
                cluster: cluster.clone(),
                stage: RejectionStage::Override,
                reason: format!("excluded by override {}", ov.id),
            });
            let effect = if was_selected {
                "removed from selection"
            } else {
                "removed from alternates"
            };
            out.applied.push(applied(ov, cluster, effect));
        }

        // Prefer / Avoid
        let mut reranked = false;
        for (kind, delta) in [
            (OverrideKind::Prefer, self.config.prefer_boost),
            (OverrideKind::Avoid, -self.config.avoid_penalty),
        ] {
            for (cluster, ov) in winners.get(&kind).into_iter().flatten() {
                let Some(entry) = pool.iter_mut().find(|r| r.cluster() == cluster) else {
                    out.skipped.push(not_in_pool(ov, cluster));
                    continue;
                };
                entry.final_score += delta;
                entry
                    .rationale
                    .push(format!("{kind} override {} adjusted score by {delta:+.1}", ov.id));
                out.applied.push(applied(ov, cluster, &format!("score adjusted by {delta:+.1}")));
                reranked = true;
            }
        }
        if reranked {
            // Stable, so clusters the overrides did not move keep their order.
            pool.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        }

        // Pinned clusters always stay; the rest fill the remaining slots.
        let pinned = pool.iter().filter(|r| r.forced).count();
        let mut free = wanted.saturating_sub(pinned);
        for r in pool {
            if r.forced {
                out.selected.push(r);
            } else if free > 0 {
                free -= 1;
                out.selected.push(r);
            } else {
                out.alternates.push(r);
            }
        }
        out.selected.extend(added);

        debug!(
            workload = %request.id(),
            applied = out.applied.len(),
            skipped = out.skipped.len(),
            conflicts = out.conflicts.len(),
            "applied overrides"
        );
        out
    }

    /// Drop inapplicable overrides and pick one winner per cluster and
    /// axis. Returns winners grouped by kind, ordered by cluster id.
    fn resolve<'o>(
        &self,
        request: &WorkloadRequest,
        now: u64,
        overrides: &'o [Override],
        evaluations: &[CandidateEvaluation],
        out: &mut OverrideOutcome,
    ) -> BTreeMap<OverrideKind, Vec<(String, &'o Override)>> {
        let mut membership: BTreeMap<String, Vec<&Override>> = BTreeMap::new();
        let mut rank: BTreeMap<String, Vec<&Override>> = BTreeMap::new();

        let mut sorted: Vec<&Override> = overrides.iter().collect();
        sorted.sort_by(|a, b| precedence(a, b));
        for ov in sorted {
            if !ov.target.workload.matches(request) {
                out.skipped.push(SkippedOverride {
                    override_id: ov.id.clone(),
                    reason: "does not target this workload".to_string(),
                });
                continue;
            }
            if ov.is_expired(now) {
                info!(override_id = %ov.id, kind = %ov.kind, "skipping expired override");
                out.skipped.push(SkippedOverride {
                    override_id: ov.id.clone(),
                    reason: format!(
                        "expired at {} (evaluated at {now})",
                        ov.expires_at.unwrap_or_default()
                    ),
                });
                continue;
            }
            let targets: Vec<&str> = evaluations
                .iter()
                .filter(|e| ov.target.clusters.matches(&e.candidate))
                .map(|e| e.cluster())
                .collect();
            if targets.is_empty() {
                out.skipped.push(SkippedOverride {
                    override_id: ov.id.clone(),
                    reason: "cluster selector matches no candidate".to_string(),
                });
                continue;
            }
            let axis = if ov.kind.is_membership() {
                &mut membership
            } else {
                &mut rank
            };
            for cluster in targets {
                axis.entry(cluster.to_string()).or_default().push(ov);
            }
        }

        let mut winners: BTreeMap<OverrideKind, Vec<(String, &Override)>> = BTreeMap::new();
        for (cluster, claims) in membership.into_iter().chain(rank) {
            // Claims were pushed in precedence order.
            let winner = claims[0];
            let mut reported = BTreeSet::new();
            for loser in &claims[1..] {
                if loser.kind != winner.kind && reported.insert(loser.id.as_str()) {
                    out.conflicts.push(
                        Conflict::advisory(
                            ConflictKind::OverrideConflict,
                            vec![cluster.clone()],
                            format!(
                                "{} override {} on {cluster} lost to {} override {}",
                                loser.kind, loser.id, winner.kind, winner.id
                            ),
                        )
                        .with_overrides(vec![loser.id.clone()]),
                    );
                }
            }
            winners.entry(winner.kind).or_default().push((cluster, winner));
        }
        for list in winners.values_mut() {
            list.sort_by(|a, b| a.0.cmp(&b.0));
        }
        winners
    }
}

fn not_in_pool(ov: &Override, cluster: &str) -> SkippedOverride {
    SkippedOverride {
        override_id: ov.id.clone(),
        reason: format!("{cluster} is not a selection candidate"),
    }
}

fn applied(ov: &Override, cluster: &str, effect: &str) -> AppliedOverride {
    AppliedOverride {
        override_id: ov.id.clone(),
        kind: ov.kind,
        cluster: cluster.to_string(),
        effect: effect.to_string(),
    }
}
