//! Whole-evaluation error taxonomy.
//!
//! Per-candidate and per-policy failures never appear here: they are
//! degraded locally and recorded in the decision. What remains are the
//! outcomes that end an evaluation without a decision.

use thiserror::Error;

use crate::types::Conflict;

/// Result type alias for engine operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Clone, Error)]
pub enum PlacementError {
    #[error("invalid workload request: {0}")]
    InvalidRequest(String),

    #[error("no candidate clusters for workload {workload}")]
    NoCandidates { workload: String },

    #[error("decision for {workload} failed validation after {attempts} attempt(s): {}", summarize(.conflicts))]
    ValidationFailed {
        workload: String,
        attempts: u32,
        conflicts: Vec<Conflict>,
        rationale: Vec<String>,
    },

    #[error("candidate supplier error: {0}")]
    CandidateSupply(String),

    #[error("policy store error: {0}")]
    PolicyStore(String),

    #[error("override store error: {0}")]
    OverrideStore(String),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PlacementError {
    /// Cancellation and deadline expiry are caller-initiated outcomes.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PlacementError::Cancelled | PlacementError::DeadlineExceeded)
    }
}

fn summarize(conflicts: &[Conflict]) -> String {
    conflicts
        .iter()
        .filter(|c| c.is_fatal())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
