//! kplane-core: shared vocabulary for the placement decision engine.
//!
//! Every other kplane crate speaks in terms of the types defined here:
//! workload requests, candidate clusters, placement policies, overrides,
//! decisions and their audit trail. The crate also owns the engine
//! configuration object, the whole-evaluation error taxonomy, and the
//! clock/deadline primitives the pipeline threads through each stage.

pub mod config;
pub mod error;
pub mod selector;
pub mod time;
pub mod types;

pub use config::EngineConfig;
pub use error::{PlacementError, PlacementResult};
pub use selector::{LabelSelector, SelectorError};
pub use time::{Clock, Deadline, FixedClock, SystemClock};
pub use types::*;
