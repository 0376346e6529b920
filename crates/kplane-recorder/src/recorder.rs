//! DecisionRecorder: serialized, time-bounded writes to the history.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kplane_core::AuditRecord;
use kplane_core::config::RecorderConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{RecorderError, RecorderResult};
use crate::storage::{AuditQuery, MemoryStorage, RecorderStorage};

/// A history write that did not complete. The decision it belonged to
/// was still returned to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceFailure {
    pub workload_id: String,
    pub decision_id: String,
    pub error: String,
}

pub struct DecisionRecorder {
    storage: Arc<dyn RecorderStorage>,
    depth: usize,
    write_timeout: Duration,
    /// One async lock per workload with a write in flight; writes to
    /// different workloads run concurrently.
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    failures_tx: mpsc::UnboundedSender<PersistenceFailure>,
    failures_rx: Mutex<Option<mpsc::UnboundedReceiver<PersistenceFailure>>>,
}

impl std::fmt::Debug for DecisionRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionRecorder")
            .field("storage", &self.storage.name())
            .field("depth", &self.depth)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl DecisionRecorder {
    pub fn new(storage: Arc<dyn RecorderStorage>, config: &RecorderConfig) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            storage,
            depth: config.history_depth,
            write_timeout: config.write_timeout(),
            locks: DashMap::new(),
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
        }
    }

    pub fn in_memory(config: &RecorderConfig) -> Self {
        Self::new(Arc::new(MemoryStorage::new()), config)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Receiver for persistence failures. Can be taken once.
    pub fn take_failures(&self) -> Option<mpsc::UnboundedReceiver<PersistenceFailure>> {
        self.failures_rx.lock().take()
    }

    fn lock_for(&self, workload_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(workload_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the workload's lock once no writer holds or waits on it.
    fn release_lock(&self, workload_id: &str) {
        self.locks
            .remove_if(workload_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Append `record`, waiting at most the configured write timeout.
    pub async fn record(&self, record: &AuditRecord) -> RecorderResult<()> {
        self.record_within(record, self.write_timeout).await
    }

    /// Append `record`, waiting at most `limit` (capped at the configured
    /// write timeout). Failures are also published on the failure channel.
    pub async fn record_within(&self, record: &AuditRecord, limit: Duration) -> RecorderResult<()> {
        let limit = limit.min(self.write_timeout);
        let lock = self.lock_for(record.workload_id());
        let write = async {
            let _guard = lock.lock().await;
            self.storage.append(record, self.depth).await
        };

        let result = match tokio::time::timeout(limit, write).await {
            Ok(result) => result,
            Err(_) => Err(RecorderError::Timeout(limit)),
        };
        drop(lock);
        self.release_lock(record.workload_id());

        match &result {
            Ok(()) => debug!(
                workload = %record.workload_id(),
                decision = %record.decision_id(),
                storage = self.storage.name(),
                "decision recorded"
            ),
            Err(e) => {
                warn!(
                    workload = %record.workload_id(),
                    decision = %record.decision_id(),
                    error = %e,
                    "failed to record decision"
                );
                // The receiver may have been dropped; nothing else to do then.
                let _ = self.failures_tx.send(PersistenceFailure {
                    workload_id: record.workload_id().to_string(),
                    decision_id: record.decision_id().to_string(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    pub async fn query(&self, query: &AuditQuery) -> RecorderResult<Vec<AuditRecord>> {
        self.storage.query(query).await
    }

    pub async fn by_workload(&self, workload_id: &str) -> RecorderResult<Vec<AuditRecord>> {
        self.query(&AuditQuery::Workload {
            workload_id: workload_id.to_string(),
        })
        .await
    }

    pub async fn by_decision(&self, decision_id: &str) -> RecorderResult<Option<AuditRecord>> {
        let mut found = self
            .query(&AuditQuery::Decision {
                decision_id: decision_id.to_string(),
            })
            .await?;
        Ok(found.pop())
    }

    pub async fn in_range(&self, from: u64, to: u64) -> RecorderResult<Vec<AuditRecord>> {
        self.query(&AuditQuery::TimeRange { from, to }).await
    }
}
