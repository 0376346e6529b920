//! redb table definitions for the decision history.
//!
//! Audit records are JSON-serialized into `&[u8]` values. Keys are
//! `{workload_id}#{seq:020}` so a prefix range scan yields one workload's
//! history oldest first.

use redb::TableDefinition;

/// Audit records keyed by `{workload_id}#{seq:020}`.
pub const AUDIT: TableDefinition<&str, &[u8]> = TableDefinition::new("audit");

/// Decision id to audit key.
pub const DECISIONS: TableDefinition<&str, &str> = TableDefinition::new("decisions");

/// Store-wide counters.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const SEQ_KEY: &str = "seq";

pub fn workload_prefix(workload_id: &str) -> String {
    format!("{workload_id}#")
}

pub fn audit_key(workload_id: &str, seq: u64) -> String {
    format!("{workload_id}#{seq:020}")
}
