//! Location-aware scoring.
//!
//! A candidate's score is its affinity to the request's ordered location
//! preferences: full marks for a match at the finest topology level of
//! the first preference, decaying linearly with topology distance and
//! with position in the preference list.

use kplane_core::config::LocationConfig;
use kplane_core::{Candidate, ScoredCandidate, WorkloadRequest};

use crate::algorithm::{MAX_SCORE, SchedulingAlgorithm, scored};

/// Score given to every candidate when the request states no preference.
const NEUTRAL_SCORE: f64 = 50.0;

#[derive(Debug, Clone, Default)]
pub struct LocationAware {
    location: LocationConfig,
}

impl LocationAware {
    pub fn new(location: LocationConfig) -> Self {
        Self { location }
    }
}

impl SchedulingAlgorithm for LocationAware {
    fn score(&self, request: &WorkloadRequest, candidates: &[Candidate]) -> Vec<ScoredCandidate> {
        candidates
            .iter()
            .map(|c| {
                let score = if request.location_preferences.is_empty() {
                    NEUTRAL_SCORE
                } else {
                    MAX_SCORE * self.location.affinity(&c.labels, &request.location_preferences)
                };
                scored(c, score, self.name())
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "location-aware"
    }
}
