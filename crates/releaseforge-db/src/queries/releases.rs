//! Release record query operations.
//!
//! A release record is one row in `releases` plus one row per quality in
//! `release_qualities`. Writes that read-then-write run inside an immediate
//! transaction so a concurrent writer cannot interleave between the check and
//! the update.

use chrono::Utc;
use releaseforge_common::{
    ArtifactHandle, Error, Identity, PublishPostHandle, QualityLabel, QualityStatus, Result,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::BTreeMap;

use crate::models::{parse_timestamp, QualityEntry, ReleaseRecord, UpsertOutcome};

fn begin_immediate(conn: &Connection) -> Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))
}

/// Create the release row for `identity` if it does not exist yet.
///
/// A title is only filled in when the stored one is empty.
pub fn ensure_release(conn: &Connection, identity: &Identity, title: Option<&str>) -> Result<()> {
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT OR IGNORE INTO releases (identity, title, publish_post_handle, created_at, updated_at)
         VALUES (?, ?, NULL, ?, ?)",
        params![identity.as_str(), title, &now, &now],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    if let Some(title) = title {
        conn.execute(
            "UPDATE releases SET title = ? WHERE identity = ? AND title IS NULL",
            params![title, identity.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}

/// Get the release record for `identity`, if any.
pub fn get_release(conn: &Connection, identity: &Identity) -> Result<Option<ReleaseRecord>> {
    let row = conn
        .query_row(
            "SELECT title, publish_post_handle, created_at, updated_at
             FROM releases WHERE identity = ?",
            [identity.as_str()],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    let Some((title, post, created_at, updated_at)) = row else {
        return Ok(None);
    };

    Ok(Some(ReleaseRecord {
        identity: identity.clone(),
        title,
        publish_post_handle: post.map(PublishPostHandle::from),
        qualities: load_qualities(conn, identity)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    }))
}

fn load_qualities(
    conn: &Connection,
    identity: &Identity,
) -> Result<BTreeMap<QualityLabel, QualityEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT quality, status, artifact_handle, updated_at
             FROM release_qualities WHERE identity = ?",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([identity.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut qualities = BTreeMap::new();
    for (quality, status, handle, updated_at) in rows {
        let status: QualityStatus = status.parse().map_err(Error::database)?;
        qualities.insert(
            QualityLabel::from(quality),
            QualityEntry {
                status,
                artifact_handle: handle.map(ArtifactHandle::from),
                updated_at: parse_timestamp(&updated_at),
            },
        );
    }

    Ok(qualities)
}

/// Record `quality` of `identity` as uploaded with `artifact_handle`.
///
/// Idempotent: repeating the same upsert is a no-op. A quality that is already
/// uploaded with a different handle is only replaced when `override_uploaded`
/// is set; otherwise a [`Error::Conflict`] is returned. An uploaded quality is
/// never moved back to pending. When `publish_post_handle` is given it is
/// stored only if the release has no post yet.
pub fn upsert_quality(
    conn: &Connection,
    identity: &Identity,
    quality: &QualityLabel,
    artifact_handle: &ArtifactHandle,
    publish_post_handle: Option<&PublishPostHandle>,
    override_uploaded: bool,
) -> Result<UpsertOutcome> {
    let tx = begin_immediate(conn)?;
    let now = Utc::now().to_rfc3339();

    ensure_release(&tx, identity, None)?;

    if let Some(post) = publish_post_handle {
        tx.execute(
            "UPDATE releases SET publish_post_handle = COALESCE(publish_post_handle, ?)
             WHERE identity = ?",
            params![post.as_str(), identity.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    }

    let existing = tx
        .query_row(
            "SELECT status, artifact_handle FROM release_qualities
             WHERE identity = ? AND quality = ?",
            params![identity.as_str(), quality.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    let outcome = match existing {
        None => {
            tx.execute(
                "INSERT INTO release_qualities (identity, quality, status, artifact_handle, updated_at)
                 VALUES (?, ?, 'uploaded', ?, ?)",
                params![identity.as_str(), quality.as_str(), artifact_handle.as_str(), &now],
            )
            .map_err(|e| Error::database(e.to_string()))?;
            UpsertOutcome::Inserted
        }
        Some((status, current)) => {
            let status: QualityStatus = status.parse().map_err(Error::database)?;
            let same_handle = current.as_deref() == Some(artifact_handle.as_str());

            match status {
                QualityStatus::Uploaded if same_handle => UpsertOutcome::Unchanged,
                QualityStatus::Uploaded if !override_uploaded => {
                    return Err(Error::conflict(format!(
                        "{} of {} is already uploaded as {}",
                        quality,
                        identity,
                        current.unwrap_or_default()
                    )));
                }
                _ => {
                    tx.execute(
                        "UPDATE release_qualities
                         SET status = 'uploaded', artifact_handle = ?, updated_at = ?
                         WHERE identity = ? AND quality = ?",
                        params![
                            artifact_handle.as_str(),
                            &now,
                            identity.as_str(),
                            quality.as_str()
                        ],
                    )
                    .map_err(|e| Error::database(e.to_string()))?;

                    if status.is_uploaded() {
                        UpsertOutcome::Overridden
                    } else {
                        UpsertOutcome::Promoted
                    }
                }
            }
        }
    };

    tx.execute(
        "UPDATE releases SET updated_at = ? WHERE identity = ?",
        params![&now, identity.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(outcome)
}

/// Record `quality` of `identity` as pending if it has no row yet.
///
/// Never touches an existing row, so an uploaded quality stays uploaded.
/// Returns `true` if a pending row was inserted.
pub fn mark_pending(
    conn: &Connection,
    identity: &Identity,
    title: Option<&str>,
    quality: &QualityLabel,
) -> Result<bool> {
    let tx = begin_immediate(conn)?;

    ensure_release(&tx, identity, title)?;

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO release_qualities (identity, quality, status, artifact_handle, updated_at)
             VALUES (?, ?, 'pending', NULL, ?)",
            params![identity.as_str(), quality.as_str(), Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(inserted == 1)
}

/// Get the shared public post handle of `identity`, if one was created.
pub fn get_publish_post(conn: &Connection, identity: &Identity) -> Result<Option<PublishPostHandle>> {
    let handle = conn
        .query_row(
            "SELECT publish_post_handle FROM releases WHERE identity = ?",
            [identity.as_str()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(handle.flatten().map(PublishPostHandle::from))
}

/// Store `handle` as the shared post of `identity` unless one already exists.
///
/// Returns the handle that is stored after the call: `handle` if it won, the
/// earlier handle otherwise.
pub fn set_publish_post_if_absent(
    conn: &Connection,
    identity: &Identity,
    handle: &PublishPostHandle,
) -> Result<PublishPostHandle> {
    let tx = begin_immediate(conn)?;

    ensure_release(&tx, identity, None)?;

    tx.execute(
        "UPDATE releases SET publish_post_handle = COALESCE(publish_post_handle, ?), updated_at = ?
         WHERE identity = ?",
        params![handle.as_str(), Utc::now().to_rfc3339(), identity.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    let stored: String = tx
        .query_row(
            "SELECT publish_post_handle FROM releases WHERE identity = ?",
            [identity.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;

    Ok(PublishPostHandle::from(stored))
}

/// List all release records, most recently updated first.
pub fn list_releases(conn: &Connection) -> Result<Vec<ReleaseRecord>> {
    let mut stmt = conn
        .prepare("SELECT identity FROM releases ORDER BY updated_at DESC, identity ASC")
        .map_err(|e| Error::database(e.to_string()))?;

    let identities = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut records = Vec::with_capacity(identities.len());
    for identity in identities {
        if let Some(record) = get_release(conn, &Identity::from(identity))? {
            records.push(record);
        }
    }

    Ok(records)
}

/// Delete the release record of `identity` and its qualities.
///
/// Returns `true` if a record existed.
pub fn delete_release(conn: &Connection, identity: &Identity) -> Result<bool> {
    let deleted = conn
        .execute("DELETE FROM releases WHERE identity = ?", [identity.as_str()])
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(deleted > 0)
}
