use std::path::Path;

use kplane_core::PlacementPolicy;
use kplane_policy::{CompileLimits, EvalContext, PolicyOutcome, compile};

use super::scenario::{Scenario, load_config};

pub fn run(expression: &str, scenario: Option<&Path>, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let policy = PlacementPolicy {
        id: "cli".to_string(),
        version: 1,
        name: "cli".to_string(),
        expression: expression.to_string(),
        priority: 0,
        weight: 1.0,
        scope: Default::default(),
        author: String::new(),
    };
    let compiled = compile(&policy, CompileLimits::from(&config.policy))?;
    println!("✓ expression compiles");

    let Some(path) = scenario else {
        return Ok(());
    };
    let scenario = Scenario::load(path)?;
    let location = &config.scheduler.location;
    for candidate in &scenario.candidates {
        let ctx = EvalContext::new(candidate, &scenario.request, location);
        let shown = match compiled.evaluate(&ctx) {
            PolicyOutcome::Verdict(true) => "include".to_string(),
            PolicyOutcome::Verdict(false) => "exclude".to_string(),
            PolicyOutcome::Score(s) => format!("score {s:.1}"),
            PolicyOutcome::Error(e) => format!("error: {e}"),
        };
        println!("  {:<20} {shown}", candidate.cluster);
    }
    Ok(())
}
