//! Block registry: directed `blocker -> blocked` facts, unique per ordered pair.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::trace;

use super::{parse_party, RelationError};
use crate::types::{from_millis, PartyId};

/// A directed block fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    /// Party who issued the block.
    pub blocker: PartyId,
    /// Party who was blocked.
    pub blocked: PartyId,
    /// When the block was created.
    pub created_at: DateTime<Utc>,
}

/// Returns `true` if `blocker` has blocked `blocked`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn is_blocked(
    conn: &mut SqliteConnection,
    blocker: PartyId,
    blocked: PartyId,
) -> Result<bool, RelationError> {
    let row: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM blocks WHERE blocker = ?1 AND blocked = ?2")
            .bind(blocker.as_db())
            .bind(blocked.as_db())
            .fetch_optional(&mut *conn)
            .await?;
    Ok(row.is_some())
}

/// Returns `true` if either party has blocked the other.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn are_blocked(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
) -> Result<bool, RelationError> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM blocks \
         WHERE (blocker = ?1 AND blocked = ?2) OR (blocker = ?2 AND blocked = ?1) \
         LIMIT 1",
    )
    .bind(a.as_db())
    .bind(b.as_db())
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.is_some())
}

/// Insert a block row. Returns `false` if the block already existed.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn insert(
    conn: &mut SqliteConnection,
    blocker: PartyId,
    blocked: PartyId,
    now: i64,
) -> Result<bool, RelationError> {
    let result = sqlx::query(
        "INSERT INTO blocks (blocker, blocked, created_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(blocker, blocked) DO NOTHING",
    )
    .bind(blocker.as_db())
    .bind(blocked.as_db())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    let created = result.rows_affected() > 0;
    trace!(%blocker, %blocked, created, "block insert");
    Ok(created)
}

/// Delete a block row. Returns `false` if there was nothing to delete.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn delete(
    conn: &mut SqliteConnection,
    blocker: PartyId,
    blocked: PartyId,
) -> Result<bool, RelationError> {
    let result = sqlx::query("DELETE FROM blocks WHERE blocker = ?1 AND blocked = ?2")
        .bind(blocker.as_db())
        .bind(blocked.as_db())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Everyone `blocker` has blocked, most recent first.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure, or
/// [`RelationError::InvalidEnum`] if a stored id is malformed.
pub async fn list_blocked_by(
    conn: &mut SqliteConnection,
    blocker: PartyId,
) -> Result<Vec<Block>, RelationError> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT blocker, blocked, created_at FROM blocks \
         WHERE blocker = ?1 ORDER BY created_at DESC",
    )
    .bind(blocker.as_db())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(blocker, blocked, created_at)| {
            Ok(Block {
                blocker: parse_party("blocker", &blocker)?,
                blocked: parse_party("blocked", &blocked)?,
                created_at: from_millis(created_at),
            })
        })
        .collect()
}
