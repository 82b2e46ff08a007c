//! Rust models matching the database schema.

use chrono::{DateTime, Utc};
use releaseforge_common::{
    ArtifactHandle, Identity, PublishPostHandle, QualityLabel, QualityStatus, RecipientId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable release record of one episode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseRecord {
    pub identity: Identity,
    pub title: Option<String>,
    /// Shared public post every quality of the episode attaches to.
    pub publish_post_handle: Option<PublishPostHandle>,
    pub qualities: BTreeMap<QualityLabel, QualityEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReleaseRecord {
    /// Whether `quality` is recorded as uploaded.
    pub fn is_uploaded(&self, quality: &QualityLabel) -> bool {
        self.qualities
            .get(quality)
            .is_some_and(|entry| entry.status.is_uploaded())
    }

    /// Whether every quality in `requested` is uploaded.
    ///
    /// An empty request is never considered complete.
    pub fn all_uploaded<'a>(&self, requested: impl IntoIterator<Item = &'a QualityLabel>) -> bool {
        let mut any = false;
        for quality in requested {
            any = true;
            if !self.is_uploaded(quality) {
                return false;
            }
        }
        any
    }

    /// Uploaded qualities with their artifact handles, in label order.
    pub fn uploaded(&self) -> impl Iterator<Item = (&QualityLabel, &ArtifactHandle)> {
        self.qualities.iter().filter_map(|(label, entry)| {
            match (entry.status, entry.artifact_handle.as_ref()) {
                (QualityStatus::Uploaded, Some(handle)) => Some((label, handle)),
                _ => None,
            }
        })
    }
}

/// One quality within a release record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityEntry {
    pub status: QualityStatus,
    pub artifact_handle: Option<ArtifactHandle>,
    pub updated_at: DateTime<Utc>,
}

/// Result of an upsert against a release quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed; the quality was recorded as uploaded.
    Inserted,
    /// A pending row was promoted to uploaded.
    Promoted,
    /// The quality was already uploaded with the same handle.
    Unchanged,
    /// An uploaded quality was replaced under an explicit override.
    Overridden,
}

/// An item accepted for processing that has not reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OngoingItem {
    pub identity: Identity,
    pub title: String,
    pub source_locator: String,
    pub ingested_at: DateTime<Utc>,
}

/// A recorded terminal failure of one quality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedQuality {
    pub identity: Identity,
    pub quality: QualityLabel,
    pub error_message: String,
    pub failed_at: DateTime<Utc>,
}

/// A delivery grant: `recipient` already received `quality` of `identity`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryGrant {
    pub identity: Identity,
    pub quality: QualityLabel,
    pub recipient: RecipientId,
    pub granted_at: DateTime<Utc>,
}

/// Parse an RFC 3339 timestamp stored by this crate.
pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
