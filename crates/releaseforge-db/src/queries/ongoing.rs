//! Ongoing item and failure mark query operations.

use chrono::Utc;
use releaseforge_common::{Error, Identity, QualityLabel, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{parse_timestamp, FailedQuality, OngoingItem};

/// Insert `item` into the ongoing set, replacing an existing entry.
pub fn upsert_ongoing(conn: &Connection, item: &OngoingItem) -> Result<()> {
    conn.execute(
        "INSERT INTO ongoing_items (identity, title, source_locator, ingested_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(identity) DO UPDATE SET
            title = excluded.title,
            source_locator = excluded.source_locator,
            ingested_at = excluded.ingested_at",
        params![
            item.identity.as_str(),
            &item.title,
            &item.source_locator,
            item.ingested_at.to_rfc3339()
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Insert `item` only if its identity is not ongoing yet.
///
/// Returns `true` if it was inserted.
pub fn insert_ongoing_if_absent(conn: &Connection, item: &OngoingItem) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO ongoing_items (identity, title, source_locator, ingested_at)
             VALUES (?, ?, ?, ?)",
            params![
                item.identity.as_str(),
                &item.title,
                &item.source_locator,
                item.ingested_at.to_rfc3339()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(inserted == 1)
}

/// Get the ongoing entry of `identity`, if any.
pub fn get_ongoing(conn: &Connection, identity: &Identity) -> Result<Option<OngoingItem>> {
    conn.query_row(
        "SELECT identity, title, source_locator, ingested_at
         FROM ongoing_items WHERE identity = ?",
        [identity.as_str()],
        row_to_ongoing,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Whether `identity` is in the ongoing set.
pub fn is_ongoing(conn: &Connection, identity: &Identity) -> Result<bool> {
    Ok(get_ongoing(conn, identity)?.is_some())
}

/// Remove `identity` from the ongoing set. Returns `true` if it was present.
pub fn remove_ongoing(conn: &Connection, identity: &Identity) -> Result<bool> {
    let deleted = conn
        .execute(
            "DELETE FROM ongoing_items WHERE identity = ?",
            [identity.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(deleted > 0)
}

/// List the ongoing set, oldest first.
pub fn list_ongoing(conn: &Connection) -> Result<Vec<OngoingItem>> {
    let mut stmt = conn
        .prepare(
            "SELECT identity, title, source_locator, ingested_at
             FROM ongoing_items ORDER BY ingested_at ASC, identity ASC",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let items = stmt
        .query_map([], row_to_ongoing)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(items)
}

fn row_to_ongoing(row: &rusqlite::Row) -> rusqlite::Result<OngoingItem> {
    Ok(OngoingItem {
        identity: Identity::from(row.get::<_, String>(0)?),
        title: row.get(1)?,
        source_locator: row.get(2)?,
        ingested_at: parse_timestamp(&row.get::<_, String>(3)?),
    })
}

/// Record a terminal failure of `quality` of `identity`.
pub fn mark_failed(
    conn: &Connection,
    identity: &Identity,
    quality: &QualityLabel,
    error_message: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO failed_qualities (identity, quality, error_message, failed_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(identity, quality) DO UPDATE SET
            error_message = excluded.error_message,
            failed_at = excluded.failed_at",
        params![
            identity.as_str(),
            quality.as_str(),
            error_message,
            Utc::now().to_rfc3339()
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// List the failure marks of `identity`.
pub fn list_failures(conn: &Connection, identity: &Identity) -> Result<Vec<FailedQuality>> {
    let mut stmt = conn
        .prepare(
            "SELECT identity, quality, error_message, failed_at
             FROM failed_qualities WHERE identity = ? ORDER BY quality",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let failures = stmt
        .query_map([identity.as_str()], row_to_failure)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(failures)
}

/// List every failure mark, most recent first.
pub fn list_all_failures(conn: &Connection) -> Result<Vec<FailedQuality>> {
    let mut stmt = conn
        .prepare(
            "SELECT identity, quality, error_message, failed_at
             FROM failed_qualities ORDER BY failed_at DESC, identity, quality",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let failures = stmt
        .query_map([], row_to_failure)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(failures)
}

fn row_to_failure(row: &rusqlite::Row) -> rusqlite::Result<FailedQuality> {
    Ok(FailedQuality {
        identity: Identity::from(row.get::<_, String>(0)?),
        quality: QualityLabel::from(row.get::<_, String>(1)?),
        error_message: row.get(2)?,
        failed_at: parse_timestamp(&row.get::<_, String>(3)?),
    })
}

/// Remove every failure mark of `identity`. Returns the number removed.
pub fn clear_failures(conn: &Connection, identity: &Identity) -> Result<usize> {
    conn.execute(
        "DELETE FROM failed_qualities WHERE identity = ?",
        [identity.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))
}
