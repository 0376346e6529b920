//! kplane-scheduler: candidate scoring.
//!
//! Every algorithm annotates each candidate cluster with a score in
//! `0.0..=100.0` (higher is better) and its own name. The scheduler never
//! rejects a candidate and never invents one; filtering is the job of the
//! policy evaluator and validator downstream.
//!
//! # Algorithms
//!
//! - **`round_robin`**: rotation over a per-class cursor
//! - **`least_loaded`**: inverse utilization
//! - **`random`**: seeded uniform scores
//! - **`location`**: preference-list affinity over topology labels

pub mod algorithm;
pub mod error;
pub mod least_loaded;
pub mod location;
pub mod random;
pub mod round_robin;
pub mod scheduler;

pub use algorithm::{SchedulingAlgorithm, MAX_SCORE};
pub use error::{SchedulerError, SchedulerResult};
pub use least_loaded::LeastLoaded;
pub use location::LocationAware;
pub use random::SeededRandom;
pub use round_robin::{CursorTable, RoundRobin};
pub use scheduler::{Scheduler, rank_order};
