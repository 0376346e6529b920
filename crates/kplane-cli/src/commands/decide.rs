use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kplane_core::{Deadline, Decision, PlacementError};
use kplane_placement::{PlacementEngine, StaticCandidates, StaticOverrides, StaticPolicies};
use kplane_recorder::{DecisionRecorder, RedbStorage};
use tracing::info;

use super::scenario::{Scenario, load_config};

pub async fn run(
    scenario_path: &Path,
    config_path: Option<&Path>,
    history_db: Option<&Path>,
    timeout_ms: u64,
    format: &str,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let scenario = Scenario::load(scenario_path)?;

    let mut builder = PlacementEngine::builder(config.clone())
        .candidates(Arc::new(StaticCandidates::new(scenario.candidates)))
        .policies(Arc::new(StaticPolicies::new(scenario.policies)))
        .overrides(Arc::new(StaticOverrides::new(scenario.overrides)));
    if let Some(path) = history_db {
        let storage = RedbStorage::open(path)?;
        info!(path = %path.display(), "recording decisions to redb");
        builder = builder.recorder(Arc::new(DecisionRecorder::new(
            Arc::new(storage),
            &config.recorder,
        )));
    }
    let engine = builder.build()?;

    let deadline = Deadline::after(Duration::from_millis(timeout_ms));
    match engine.decide(&scenario.request, &deadline).await {
        Ok(decision) => {
            match format {
                "json" => println!("{}", serde_json::to_string_pretty(&decision)?),
                _ => println!("{}", format_decision(&decision)),
            }
            Ok(())
        }
        Err(PlacementError::ValidationFailed {
            workload,
            attempts,
            conflicts,
            rationale,
        }) => {
            eprintln!("✗ no valid placement for {workload} after {attempts} attempt(s)");
            for c in &conflicts {
                eprintln!("  {c}");
            }
            for line in &rationale {
                eprintln!("  - {line}");
            }
            anyhow::bail!("validation failed")
        }
        Err(e) => Err(e.into()),
    }
}

pub fn format_decision(decision: &Decision) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Decision {} for {}\n",
        decision.id, decision.workload_id
    ));
    out.push_str(&format!(
        "  scheduler: {}, combination: {}, attempts: {}\n",
        decision.scheduler_algorithm, decision.combination, decision.attempts
    ));

    out.push_str("\nSelected:\n");
    for s in &decision.selected {
        let forced = if s.forced { " (forced)" } else { "" };
        out.push_str(&format!(
            "  ✓ {:<20} score {:>6.1}  replicas {}  reserves {}{forced}\n",
            s.cluster, s.score, s.replicas, s.reserved
        ));
    }

    let others: Vec<_> = decision.scores.iter().filter(|s| !s.selected).collect();
    if !others.is_empty() {
        out.push_str("\nNot selected:\n");
        for s in others {
            let why = s.rationale.last().map(String::as_str).unwrap_or("");
            out.push_str(&format!("  ✗ {:<20} {why}\n", s.cluster));
        }
    }

    if !decision.conflicts.is_empty() {
        out.push_str("\nConflicts:\n");
        for c in &decision.conflicts {
            out.push_str(&format!("  ⚠ {c}\n"));
        }
    }

    if !decision.rationale.is_empty() {
        out.push_str("\nNotes:\n");
        for line in &decision.rationale {
            out.push_str(&format!("  - {line}\n"));
        }
    }
    out
}
