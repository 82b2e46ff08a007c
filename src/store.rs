//! Async access to the release state database.
//!
//! Every call runs its query on the blocking pool and returns once SQLite has
//! committed.

use releaseforge_common::{
    ArtifactHandle, Error, Identity, PublishPostHandle, QualityLabel, RecipientId, Result,
};
use releaseforge_db::models::{ReleaseRecord, UpsertOutcome};
use releaseforge_db::pool::{get_conn, DbPool};
use releaseforge_db::queries::{deliveries, ongoing, releases};
use rusqlite::Connection;

#[derive(Clone)]
pub struct ReleaseStore {
    pool: DbPool,
}

impl ReleaseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = get_conn(&pool)?;
            op(&conn)
        })
        .await
        .map_err(|e| Error::internal(format!("Store task failed: {}", e)))?
    }

    pub async fn get_release(&self, identity: &Identity) -> Result<Option<ReleaseRecord>> {
        let identity = identity.clone();
        self.with_conn(move |conn| releases::get_release(conn, &identity))
            .await
    }

    pub async fn list_releases(&self) -> Result<Vec<ReleaseRecord>> {
        self.with_conn(releases::list_releases).await
    }

    pub async fn mark_pending(
        &self,
        identity: &Identity,
        title: &str,
        quality: &QualityLabel,
    ) -> Result<bool> {
        let (identity, title, quality) = (identity.clone(), title.to_string(), quality.clone());
        self.with_conn(move |conn| releases::mark_pending(conn, &identity, Some(&title), &quality))
            .await
    }

    pub async fn get_publish_post(&self, identity: &Identity) -> Result<Option<PublishPostHandle>> {
        let identity = identity.clone();
        self.with_conn(move |conn| releases::get_publish_post(conn, &identity))
            .await
    }

    pub async fn set_publish_post_if_absent(
        &self,
        identity: &Identity,
        handle: &PublishPostHandle,
    ) -> Result<PublishPostHandle> {
        let (identity, handle) = (identity.clone(), handle.clone());
        self.with_conn(move |conn| releases::set_publish_post_if_absent(conn, &identity, &handle))
            .await
    }

    pub async fn upsert_quality(
        &self,
        identity: &Identity,
        quality: &QualityLabel,
        artifact: &ArtifactHandle,
        post: Option<&PublishPostHandle>,
        override_uploaded: bool,
    ) -> Result<UpsertOutcome> {
        let identity = identity.clone();
        let quality = quality.clone();
        let artifact = artifact.clone();
        let post = post.cloned();
        self.with_conn(move |conn| {
            releases::upsert_quality(
                conn,
                &identity,
                &quality,
                &artifact,
                post.as_ref(),
                override_uploaded,
            )
        })
        .await
    }

    pub async fn mark_failed(
        &self,
        identity: &Identity,
        quality: &QualityLabel,
        error_message: &str,
    ) -> Result<()> {
        let (identity, quality, message) =
            (identity.clone(), quality.clone(), error_message.to_string());
        self.with_conn(move |conn| ongoing::mark_failed(conn, &identity, &quality, &message))
            .await
    }

    pub async fn grant_delivery(
        &self,
        identity: &Identity,
        quality: &QualityLabel,
        recipient: RecipientId,
    ) -> Result<bool> {
        let (identity, quality) = (identity.clone(), quality.clone());
        self.with_conn(move |conn| deliveries::grant_delivery(conn, &identity, &quality, recipient))
            .await
    }

    pub async fn has_delivery(
        &self,
        identity: &Identity,
        quality: &QualityLabel,
        recipient: RecipientId,
    ) -> Result<bool> {
        let (identity, quality) = (identity.clone(), quality.clone());
        self.with_conn(move |conn| deliveries::has_delivery(conn, &identity, &quality, recipient))
            .await
    }

    pub async fn revoke_delivery(
        &self,
        identity: &Identity,
        quality: &QualityLabel,
        recipient: RecipientId,
    ) -> Result<bool> {
        let (identity, quality) = (identity.clone(), quality.clone());
        self.with_conn(move |conn| deliveries::revoke_delivery(conn, &identity, &quality, recipient))
            .await
    }

    /// Delete a release with its grants, failure marks, and ongoing entry.
    pub async fn forget(&self, identity: &Identity) -> Result<bool> {
        let identity = identity.clone();
        self.with_conn(move |conn| {
            ongoing::remove_ongoing(conn, &identity)?;
            ongoing::clear_failures(conn, &identity)?;
            releases::delete_release(conn, &identity)
        })
        .await
    }
}
