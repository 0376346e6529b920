//! RedbStorage: durable decision history backed by redb.
//!
//! Every append runs in a single write transaction that inserts the
//! record, updates the decision index, and prunes the workload's oldest
//! entries beyond the configured depth. redb admits one write
//! transaction at a time, so the depth bound holds even if a timed-out
//! append finishes in the background after its caller gave up.
//!
//! redb calls are blocking; the async trait methods hop onto the tokio
//! blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use kplane_core::AuditRecord;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{RecorderError, RecorderResult};
use crate::storage::{AuditQuery, RecorderStorage, time_order};
use crate::tables::*;

/// Convert any `Display` error into a `RecorderError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| RecorderError::$variant(e.to_string())
    };
}

#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStorage").finish_non_exhaustive()
    }
}

impl RedbStorage {
    /// Open (or create) a persistent history at the given path.
    pub fn open(path: &Path) -> RecorderResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "decision history opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory history (for testing).
    pub fn open_in_memory() -> RecorderResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory decision history opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> RecorderResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(AUDIT).map_err(map_err!(Table))?;
        txn.open_table(DECISIONS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert `record` and prune its workload to `depth` entries.
    pub fn append_blocking(&self, record: &AuditRecord, depth: usize) -> RecorderResult<()> {
        let workload_id = record.workload_id();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let prefix = workload_prefix(workload_id);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pruned;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let seq = meta
                .get(SEQ_KEY)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(0)
                + 1;
            meta.insert(SEQ_KEY, seq).map_err(map_err!(Write))?;

            let key = audit_key(workload_id, seq);
            let mut audit = txn.open_table(AUDIT).map_err(map_err!(Table))?;
            audit
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut decisions = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
            decisions
                .insert(record.decision_id(), key.as_str())
                .map_err(map_err!(Write))?;

            // Keys sort by sequence within the prefix, oldest first.
            let mut existing: Vec<(String, String)> = Vec::new();
            for entry in audit.range(prefix.as_str()..).map_err(map_err!(Read))? {
                let (k, v) = entry.map_err(map_err!(Read))?;
                let k = k.value().to_string();
                if !k.starts_with(&prefix) {
                    break;
                }
                let old: AuditRecord =
                    serde_json::from_slice(v.value()).map_err(map_err!(Deserialize))?;
                existing.push((k, old.decision.id));
            }

            let excess = existing.len().saturating_sub(depth);
            for (k, decision_id) in existing.iter().take(excess) {
                audit.remove(k.as_str()).map_err(map_err!(Write))?;
                // A reused id may already point at a newer record.
                let indexed_here = decisions
                    .get(decision_id.as_str())
                    .map_err(map_err!(Read))?
                    .is_some_and(|g| g.value() == k.as_str());
                if indexed_here {
                    decisions
                        .remove(decision_id.as_str())
                        .map_err(map_err!(Write))?;
                }
            }
            pruned = excess;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(workload = %workload_id, decision = %record.decision_id(), pruned, "audit record stored");
        Ok(())
    }

    pub fn query_blocking(&self, query: &AuditQuery) -> RecorderResult<Vec<AuditRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let audit = txn.open_table(AUDIT).map_err(map_err!(Table))?;
        let decode = |bytes: &[u8]| -> RecorderResult<AuditRecord> {
            serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
        };

        match query {
            AuditQuery::Workload { workload_id } => {
                let prefix = workload_prefix(workload_id);
                let mut results = Vec::new();
                for entry in audit.range(prefix.as_str()..).map_err(map_err!(Read))? {
                    let (k, v) = entry.map_err(map_err!(Read))?;
                    if !k.value().starts_with(&prefix) {
                        break;
                    }
                    results.push(decode(v.value())?);
                }
                Ok(results)
            }
            AuditQuery::Decision { decision_id } => {
                let decisions = txn.open_table(DECISIONS).map_err(map_err!(Table))?;
                let Some(key) = decisions.get(decision_id.as_str()).map_err(map_err!(Read))? else {
                    return Ok(Vec::new());
                };
                match audit.get(key.value()).map_err(map_err!(Read))? {
                    Some(v) => Ok(vec![decode(v.value())?]),
                    None => Ok(Vec::new()),
                }
            }
            AuditQuery::TimeRange { from, to } => {
                let mut results = Vec::new();
                for entry in audit.iter().map_err(map_err!(Read))? {
                    let (_, v) = entry.map_err(map_err!(Read))?;
                    let record = decode(v.value())?;
                    if (*from..=*to).contains(&record.recorded_at) {
                        results.push(record);
                    }
                }
                results.sort_by(time_order);
                Ok(results)
            }
        }
    }
}

#[async_trait]
impl RecorderStorage for RedbStorage {
    async fn append(&self, record: &AuditRecord, depth: usize) -> RecorderResult<()> {
        let store = self.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&record, depth))
            .await
            .map_err(map_err!(Join))?
    }

    async fn query(&self, query: &AuditQuery) -> RecorderResult<Vec<AuditRecord>> {
        let store = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || store.query_blocking(&query))
            .await
            .map_err(map_err!(Join))?
    }

    fn name(&self) -> &'static str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::record;

    fn ids(records: &[AuditRecord]) -> Vec<&str> {
        records.iter().map(|r| r.decision_id()).collect()
    }

    fn workload(store: &RedbStorage, id: &str) -> Vec<AuditRecord> {
        store
            .query_blocking(&AuditQuery::Workload {
                workload_id: id.into(),
            })
            .unwrap()
    }

    #[test]
    fn append_and_query_by_workload() {
        let store = RedbStorage::open_in_memory().unwrap();
        store.append_blocking(&record("ws:ns/a", "a1", 1), 10).unwrap();
        store.append_blocking(&record("ws:ns/b", "b1", 2), 10).unwrap();
        store.append_blocking(&record("ws:ns/a", "a2", 3), 10).unwrap();

        assert_eq!(ids(&workload(&store, "ws:ns/a")), vec!["a1", "a2"]);
        assert_eq!(ids(&workload(&store, "ws:ns/b")), vec!["b1"]);
    }

    #[test]
    fn prefix_does_not_leak_across_workloads() {
        let store = RedbStorage::open_in_memory().unwrap();
        store.append_blocking(&record("ws:ns/api", "x", 1), 10).unwrap();
        store.append_blocking(&record("ws:ns/api-v2", "y", 2), 10).unwrap();
        assert_eq!(ids(&workload(&store, "ws:ns/api")), vec!["x"]);
    }

    #[test]
    fn pruning_keeps_newest_and_drops_index() {
        let store = RedbStorage::open_in_memory().unwrap();
        for i in 0..12 {
            store
                .append_blocking(&record("ws:ns/a", &format!("d{i:02}"), i), 10)
                .unwrap();
        }
        let history = workload(&store, "ws:ns/a");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].decision_id(), "d02");
        assert_eq!(history[9].decision_id(), "d11");

        let evicted = store
            .query_blocking(&AuditQuery::Decision {
                decision_id: "d00".into(),
            })
            .unwrap();
        assert!(evicted.is_empty());
        let kept = store
            .query_blocking(&AuditQuery::Decision {
                decision_id: "d05".into(),
            })
            .unwrap();
        assert_eq!(ids(&kept), vec!["d05"]);
    }

    #[test]
    fn pruning_a_reused_id_keeps_the_newer_index_entry() {
        let store = RedbStorage::open_in_memory().unwrap();
        for i in 0..11 {
            store
                .append_blocking(&record("ws:ns/a", "same", i), 10)
                .unwrap();
        }
        assert_eq!(workload(&store, "ws:ns/a").len(), 10);

        let found = store
            .query_blocking(&AuditQuery::Decision {
                decision_id: "same".into(),
            })
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].recorded_at, 10);
    }

    #[test]
    fn time_range_spans_workloads() {
        let store = RedbStorage::open_in_memory().unwrap();
        store.append_blocking(&record("ws:ns/a", "a1", 100), 10).unwrap();
        store.append_blocking(&record("ws:ns/b", "b1", 150), 10).unwrap();
        store.append_blocking(&record("ws:ns/a", "a2", 300), 10).unwrap();

        let window = store
            .query_blocking(&AuditQuery::TimeRange { from: 100, to: 200 })
            .unwrap();
        assert_eq!(ids(&window), vec!["a1", "b1"]);
    }

    #[test]
    fn history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.redb");
        {
            let store = RedbStorage::open(&path).unwrap();
            store.append_blocking(&record("ws:ns/a", "a1", 1), 10).unwrap();
        }
        let store = RedbStorage::open(&path).unwrap();
        assert_eq!(ids(&workload(&store, "ws:ns/a")), vec!["a1"]);
        // Sequence continues after reopen, so new records sort last.
        store.append_blocking(&record("ws:ns/a", "a2", 2), 10).unwrap();
        assert_eq!(ids(&workload(&store, "ws:ns/a")), vec!["a1", "a2"]);
    }

    #[tokio::test]
    async fn async_trait_round_trip() {
        let store = RedbStorage::open_in_memory().unwrap();
        store.append(&record("ws:ns/a", "a1", 1), 10).await.unwrap();
        let found = store
            .query(&AuditQuery::Decision {
                decision_id: "a1".into(),
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.name(), "redb");
    }
}
