use std::path::Path;

use kplane_recorder::{AuditQuery, RecorderStorage, RedbStorage};

pub fn query_from_args(
    workload: Option<String>,
    decision: Option<String>,
    from: Option<u64>,
    to: Option<u64>,
) -> anyhow::Result<AuditQuery> {
    match (workload, decision, from, to) {
        (Some(workload_id), None, None, None) => Ok(AuditQuery::Workload { workload_id }),
        (None, Some(decision_id), None, None) => Ok(AuditQuery::Decision { decision_id }),
        (None, None, Some(from), Some(to)) if from <= to => Ok(AuditQuery::TimeRange { from, to }),
        (None, None, Some(_), Some(_)) => anyhow::bail!("--from must not be after --to"),
        _ => anyhow::bail!("pass exactly one of --workload, --decision or --from/--to"),
    }
}

pub async fn run(db: &Path, query: &AuditQuery, format: &str) -> anyhow::Result<()> {
    if !db.exists() {
        anyhow::bail!("history database {} does not exist", db.display());
    }
    let storage = RedbStorage::open(db)?;
    let records = storage.query(query).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no recorded decisions");
        return Ok(());
    }
    for r in &records {
        let d = &r.decision;
        println!(
            "{}  {}  {}  selected [{}]  conflicts {}  rejected {}",
            r.recorded_at,
            d.id,
            d.workload_id,
            d.selected_clusters().join(", "),
            d.conflicts.len(),
            r.rejected.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_one_query_shape() {
        assert_eq!(
            query_from_args(Some("w".into()), None, None, None).unwrap(),
            AuditQuery::Workload { workload_id: "w".into() }
        );
        assert_eq!(
            query_from_args(None, None, Some(1), Some(2)).unwrap(),
            AuditQuery::TimeRange { from: 1, to: 2 }
        );
        assert!(query_from_args(None, None, Some(3), Some(2)).is_err());
        assert!(query_from_args(None, None, None, None).is_err());
    }
}
