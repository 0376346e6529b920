//! Storage backends for the decision history.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use kplane_core::AuditRecord;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::RecorderResult;

/// History lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "by")]
pub enum AuditQuery {
    /// One workload's retained history, oldest first.
    Workload { workload_id: String },
    /// The record for one decision, if still retained.
    Decision { decision_id: String },
    /// Records with `from <= recorded_at <= to` across all workloads,
    /// ordered by time.
    TimeRange { from: u64, to: u64 },
}

/// Durable home of audit records.
///
/// `append` must store the record and prune the workload's history to
/// `depth` entries as one atomic step, so readers never observe more than
/// `depth` records for a workload. Callers serialize appends per workload.
#[async_trait]
pub trait RecorderStorage: Send + Sync {
    async fn append(&self, record: &AuditRecord, depth: usize) -> RecorderResult<()>;

    async fn query(&self, query: &AuditQuery) -> RecorderResult<Vec<AuditRecord>>;

    fn name(&self) -> &'static str;
}

/// Sort key for time-range results.
pub(crate) fn time_order(a: &AuditRecord, b: &AuditRecord) -> std::cmp::Ordering {
    a.recorded_at
        .cmp(&b.recorded_at)
        .then_with(|| a.decision_id().cmp(b.decision_id()))
}

/// Process-local storage. History is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    histories: Mutex<HashMap<String, VecDeque<AuditRecord>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecorderStorage for MemoryStorage {
    async fn append(&self, record: &AuditRecord, depth: usize) -> RecorderResult<()> {
        let mut histories = self.histories.lock();
        let history = histories.entry(record.workload_id().to_string()).or_default();
        history.push_back(record.clone());
        while history.len() > depth {
            history.pop_front();
        }
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> RecorderResult<Vec<AuditRecord>> {
        let histories = self.histories.lock();
        let records = match query {
            AuditQuery::Workload { workload_id } => histories
                .get(workload_id)
                .map(|h| h.iter().cloned().collect())
                .unwrap_or_default(),
            AuditQuery::Decision { decision_id } => histories
                .values()
                .flat_map(|h| h.iter().rev())
                .filter(|r| r.decision_id() == decision_id)
                .take(1)
                .cloned()
                .collect(),
            AuditQuery::TimeRange { from, to } => {
                let mut found: Vec<AuditRecord> = histories
                    .values()
                    .flat_map(|h| h.iter())
                    .filter(|r| (*from..=*to).contains(&r.recorded_at))
                    .cloned()
                    .collect();
                found.sort_by(time_order);
                found
            }
        };
        Ok(records)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
