//! Friendship registry.
//!
//! One row per unordered pair, keyed in canonical order. Rows are never
//! deleted: blocking or unfriending only clears `is_active`, and nothing but a
//! mutual invitation acceptance sets it again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, trace};

use super::conversation::{self, ConversationStatus};
use super::{block, parse_party, RelationError};
use crate::types::{canonical_pair, from_millis, PartyId};

/// Row type returned by SQLite queries for friendships.
type FriendshipRow = (String, String, bool, i64, i64);

/// A friendship between two parties, stored in canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Friendship {
    /// Canonically smaller party.
    pub user1: PartyId,
    /// Canonically larger party.
    pub user2: PartyId,
    /// Whether the pair are currently friends.
    pub is_active: bool,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the row last changed.
    pub updated_at: DateTime<Utc>,
}

/// Load the friendship row for an unordered pair, if any.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn find(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
) -> Result<Option<Friendship>, RelationError> {
    let (user1, user2) = canonical_pair(a, b);
    let row: Option<FriendshipRow> = sqlx::query_as(
        "SELECT user1, user2, is_active, created_at, updated_at \
         FROM friendships WHERE user1 = ?1 AND user2 = ?2",
    )
    .bind(user1.as_db())
    .bind(user2.as_db())
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|(u1, u2, is_active, created_at, updated_at)| {
        Ok(Friendship {
            user1: parse_party("user1", &u1)?,
            user2: parse_party("user2", &u2)?,
            is_active,
            created_at: from_millis(created_at),
            updated_at: from_millis(updated_at),
        })
    })
    .transpose()
}

/// Returns `true` only when a row exists and is active.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn are_friends(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
) -> Result<bool, RelationError> {
    Ok(find(conn, a, b).await?.is_some_and(|f| f.is_active))
}

/// Find-or-create the pair's row and mark it active.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn create_or_activate(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
    now: i64,
) -> Result<(), RelationError> {
    let (user1, user2) = canonical_pair(a, b);
    sqlx::query(
        "INSERT INTO friendships (user1, user2, is_active, created_at, updated_at) \
         VALUES (?1, ?2, 1, ?3, ?3) \
         ON CONFLICT(user1, user2) DO UPDATE SET is_active = 1, updated_at = ?3",
    )
    .bind(user1.as_db())
    .bind(user2.as_db())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    trace!(%user1, %user2, "friendship activated");
    Ok(())
}

/// Deactivate the pair's friendship if present.
///
/// When the pair is not blocked, an `active` conversation between them is
/// demoted to `locked` as well: without a friendship it can only show history.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn deactivate(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
    now: i64,
) -> Result<bool, RelationError> {
    let (user1, user2) = canonical_pair(a, b);
    let result = sqlx::query(
        "UPDATE friendships SET is_active = 0, updated_at = ?3 \
         WHERE user1 = ?1 AND user2 = ?2 AND is_active = 1",
    )
    .bind(user1.as_db())
    .bind(user2.as_db())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    let changed = result.rows_affected() > 0;

    if !block::are_blocked(conn, a, b).await? {
        if let Some(conv) = conversation::find_by_pair(conn, a, b).await? {
            if conv.status == ConversationStatus::Active {
                conversation::set_status(conn, conv.id, ConversationStatus::Locked, now).await?;
                info!(conversation_id = conv.id, "conversation locked after unfriend");
            }
        }
    }

    trace!(%user1, %user2, changed, "friendship deactivated");
    Ok(changed)
}
