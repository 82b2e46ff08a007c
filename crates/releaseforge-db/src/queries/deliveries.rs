//! Delivery grant query operations.
//!
//! A grant row means the recipient already received that quality. The primary
//! key makes `INSERT OR IGNORE` a single atomic compare-and-set.

use chrono::Utc;
use releaseforge_common::{Error, Identity, QualityLabel, RecipientId, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{parse_timestamp, DeliveryGrant};

/// Grant delivery of `quality` of `identity` to `recipient`.
///
/// Returns `true` only for the call that created the grant; every later or
/// concurrent call for the same key returns `false`.
pub fn grant_delivery(
    conn: &Connection,
    identity: &Identity,
    quality: &QualityLabel,
    recipient: RecipientId,
) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO delivery_grants (identity, quality, recipient, granted_at)
             VALUES (?, ?, ?, ?)",
            params![
                identity.as_str(),
                quality.as_str(),
                recipient.get(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(inserted == 1)
}

/// Check whether `recipient` already holds a grant.
pub fn has_delivery(
    conn: &Connection,
    identity: &Identity,
    quality: &QualityLabel,
    recipient: RecipientId,
) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM delivery_grants WHERE identity = ? AND quality = ? AND recipient = ?",
            params![identity.as_str(), quality.as_str(), recipient.get()],
            |_| Ok(()),
        )
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(found.is_some())
}

/// Get a single grant with its timestamp.
pub fn get_grant(
    conn: &Connection,
    identity: &Identity,
    quality: &QualityLabel,
    recipient: RecipientId,
) -> Result<DeliveryGrant> {
    conn.query_row(
        "SELECT granted_at FROM delivery_grants
         WHERE identity = ? AND quality = ? AND recipient = ?",
        params![identity.as_str(), quality.as_str(), recipient.get()],
        |row| {
            Ok(DeliveryGrant {
                identity: identity.clone(),
                quality: quality.clone(),
                recipient,
                granted_at: parse_timestamp(&row.get::<_, String>(0)?),
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("delivery_grant"),
        _ => Error::database(e.to_string()),
    })
}

/// Remove a grant, for an administrative reset or after a failed send.
///
/// Returns `true` if a grant existed.
pub fn revoke_delivery(
    conn: &Connection,
    identity: &Identity,
    quality: &QualityLabel,
    recipient: RecipientId,
) -> Result<bool> {
    let deleted = conn
        .execute(
            "DELETE FROM delivery_grants WHERE identity = ? AND quality = ? AND recipient = ?",
            params![identity.as_str(), quality.as_str(), recipient.get()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(deleted > 0)
}

/// Remove every grant of `identity`. Returns the number removed.
pub fn revoke_all_for_release(conn: &Connection, identity: &Identity) -> Result<usize> {
    conn.execute(
        "DELETE FROM delivery_grants WHERE identity = ?",
        [identity.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Count grants per quality of `identity`.
pub fn count_grants(conn: &Connection, identity: &Identity) -> Result<Vec<(QualityLabel, u64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT quality, COUNT(*) FROM delivery_grants
             WHERE identity = ? GROUP BY quality ORDER BY quality",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let counts = stmt
        .query_map([identity.as_str()], |row| {
            Ok((
                QualityLabel::from(row.get::<_, String>(0)?),
                row.get::<_, i64>(1)? as u64,
            ))
        })
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(counts)
}
