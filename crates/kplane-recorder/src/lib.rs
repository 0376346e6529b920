//! kplane-recorder: bounded, queryable decision history.
//!
//! Every placement decision is appended together with its rejection and
//! conflict trail to a per-workload history capped at a configured depth
//! (oldest pruned first). History can be read back by workload, by
//! decision id, or by time range.
//!
//! # Components
//!
//! - **`DecisionRecorder`**: serializes writes per workload, bounds them
//!   by a timeout, and reports failures on a side channel
//! - **`RecorderStorage`**: storage seam; `MemoryStorage` for tests and
//!   dry runs, `RedbStorage` for durable history

pub mod error;
pub mod recorder;
pub mod redb_store;
pub mod storage;
pub mod tables;

pub use error::{RecorderError, RecorderResult};
pub use recorder::{DecisionRecorder, PersistenceFailure};
pub use redb_store::RedbStorage;
pub use storage::{AuditQuery, MemoryStorage, RecorderStorage};
