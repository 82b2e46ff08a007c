//! Startup reconciliation of the durable ongoing set.

use releaseforge_common::{Identity, QualityLabel, Result};

use crate::ingest::{DedupStore, WorkItem};

/// Outcome of reconciling the ongoing set against release records.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    /// Items with missing qualities; re-admit these.
    pub readmit: Vec<WorkItem>,
    /// Items already fully released; removed from the ongoing set.
    pub retired: Vec<Identity>,
}

/// Sort the ongoing items left over from a previous run.
///
/// Items whose requested qualities are all uploaded are removed from the
/// ongoing set. Everything else is returned for re-admission, oldest first.
pub fn reconcile(store: &dyn DedupStore, qualities: &[QualityLabel]) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for item in store.list_ongoing()? {
        let complete = store
            .release(&item.identity)?
            .is_some_and(|record| record.all_uploaded(qualities));

        if complete {
            store.remove_ongoing(&item.identity)?;
            tracing::info!(identity = %item.identity, "Retired completed item left ongoing");
            report.retired.push(item.identity);
        } else {
            tracing::info!(identity = %item.identity, "Re-admitting interrupted item");
            report.readmit.push(WorkItem::from(item));
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SqliteDedupStore;
    use chrono::Utc;
    use releaseforge_common::ArtifactHandle;
    use releaseforge_db::models::OngoingItem;
    use releaseforge_db::pool::{get_conn, init_memory_pool};
    use releaseforge_db::queries::{ongoing, releases};

    #[test]
    fn test_reconcile_splits_complete_and_partial() {
        let pool = init_memory_pool().unwrap();
        let store = SqliteDedupStore::new(pool.clone());
        let qualities = vec![QualityLabel::new("720"), QualityLabel::new("1080")];

        let done = Identity::from_parts("Series A", 1);
        let partial = Identity::from_parts("Series A", 2);
        {
            let conn = get_conn(&pool).unwrap();
            for identity in [&done, &partial] {
                ongoing::upsert_ongoing(
                    &conn,
                    &OngoingItem {
                        identity: identity.clone(),
                        title: identity.to_string(),
                        source_locator: "http://x".to_string(),
                        ingested_at: Utc::now(),
                    },
                )
                .unwrap();
            }
            for q in &qualities {
                releases::upsert_quality(&conn, &done, q, &ArtifactHandle::new("a"), None, false)
                    .unwrap();
            }
            releases::upsert_quality(
                &conn,
                &partial,
                &qualities[0],
                &ArtifactHandle::new("b"),
                None,
                false,
            )
            .unwrap();
        }

        let report = reconcile(&store, &qualities).unwrap();
        assert_eq!(report.retired, vec![done.clone()]);
        assert_eq!(report.readmit.len(), 1);
        assert_eq!(report.readmit[0].identity, partial);

        assert!(!store.is_ongoing(&done).unwrap());
        assert!(store.is_ongoing(&partial).unwrap());
    }
}
