//! Durable backing for the deduplicator.

use releaseforge_common::{Identity, Result};
use releaseforge_db::models::{FailedQuality, OngoingItem, ReleaseRecord};
use releaseforge_db::pool::{get_conn, DbPool};
use releaseforge_db::queries::{ongoing, releases};

/// Storage the deduplicator reads and writes.
///
/// Calls are synchronous and short; the deduplicator serializes them under
/// its own lock.
pub trait DedupStore: Send + Sync {
    fn is_ongoing(&self, identity: &Identity) -> Result<bool>;
    fn insert_ongoing(&self, item: &OngoingItem) -> Result<()>;
    fn remove_ongoing(&self, identity: &Identity) -> Result<bool>;
    fn list_ongoing(&self) -> Result<Vec<OngoingItem>>;
    fn release(&self, identity: &Identity) -> Result<Option<ReleaseRecord>>;
    fn failures(&self, identity: &Identity) -> Result<Vec<FailedQuality>>;
    fn clear_failures(&self, identity: &Identity) -> Result<usize>;
}

/// [`DedupStore`] over the shared SQLite state database.
#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: DbPool,
}

impl SqliteDedupStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DedupStore for SqliteDedupStore {
    fn is_ongoing(&self, identity: &Identity) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        ongoing::is_ongoing(&conn, identity)
    }

    fn insert_ongoing(&self, item: &OngoingItem) -> Result<()> {
        let conn = get_conn(&self.pool)?;
        ongoing::upsert_ongoing(&conn, item)
    }

    fn remove_ongoing(&self, identity: &Identity) -> Result<bool> {
        let conn = get_conn(&self.pool)?;
        ongoing::remove_ongoing(&conn, identity)
    }

    fn list_ongoing(&self) -> Result<Vec<OngoingItem>> {
        let conn = get_conn(&self.pool)?;
        ongoing::list_ongoing(&conn)
    }

    fn release(&self, identity: &Identity) -> Result<Option<ReleaseRecord>> {
        let conn = get_conn(&self.pool)?;
        releases::get_release(&conn, identity)
    }

    fn failures(&self, identity: &Identity) -> Result<Vec<FailedQuality>> {
        let conn = get_conn(&self.pool)?;
        ongoing::list_failures(&conn, identity)
    }

    fn clear_failures(&self, identity: &Identity) -> Result<usize> {
        let conn = get_conn(&self.pool)?;
        ongoing::clear_failures(&conn, identity)
    }
}
