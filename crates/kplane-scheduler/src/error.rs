//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while scoring candidates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("no candidates to score for workload: {0}")]
    NoCandidates(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
