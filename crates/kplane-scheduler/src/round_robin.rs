//! Round-robin scoring.
//!
//! Rotation is driven by a cursor per workload class. Each call advances
//! the class cursor by one, so the top-scored cluster rotates through the
//! (identifier-ordered) candidate set and repeated placements of the same
//! class spread evenly. Cursors of different classes never interact.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use kplane_core::{Candidate, ScoredCandidate, WorkloadRequest};
use tracing::debug;

use crate::algorithm::{MAX_SCORE, SchedulingAlgorithm, by_cluster_id, scored};

/// Per-class rotation cursors.
///
/// Each cursor is an `AtomicU64`; advancing one is lock-free and safe for
/// concurrent evaluations of the same class.
#[derive(Debug, Default)]
pub struct CursorTable {
    cursors: DashMap<String, AtomicU64>,
}

impl CursorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the current cursor for `class` and advance it.
    pub fn advance(&self, class: &str) -> u64 {
        if let Some(cursor) = self.cursors.get(class) {
            return cursor.fetch_add(1, Ordering::Relaxed);
        }
        self.cursors
            .entry(class.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }

    /// Current cursor value (for diagnostics).
    pub fn current(&self, class: &str) -> u64 {
        self.cursors
            .get(class)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Reset one class back to zero.
    pub fn reset(&self, class: &str) {
        if let Some(cursor) = self.cursors.get(class) {
            cursor.store(0, Ordering::Relaxed);
        }
    }

    pub fn classes(&self) -> usize {
        self.cursors.len()
    }
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: CursorTable,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursors(&self) -> &CursorTable {
        &self.cursors
    }
}

impl SchedulingAlgorithm for RoundRobin {
    fn score(&self, request: &WorkloadRequest, candidates: &[Candidate]) -> Vec<ScoredCandidate> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let ordered = by_cluster_id(candidates);
        let n = ordered.len() as u64;
        let class = request.class_key();
        let offset = self.cursors.advance(&class) % n;
        debug!(%class, offset, candidates = n, "round-robin rotation");

        ordered
            .iter()
            .enumerate()
            .map(|(i, c)| {
                // Distance behind the rotation head.
                let k = (i as u64 + n - offset) % n;
                let score = MAX_SCORE * (n - k) as f64 / n as f64;
                scored(c, score, self.name())
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
