//! Invitation ledger.
//!
//! Holds at most one row per direction per conversation. A declined
//! invitation is deleted rather than flagged, and so is every invitation
//! between a pair when one of them unblocks the other. An accepted row that
//! needs re-confirming is revived back to `pending` in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::trace;

use super::{parse_party, RelationError};
use crate::types::{from_millis, ConversationId, InvitationId, PartyId};

/// Row type returned by SQLite queries for invitations.
type InvitationRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<String>,
    i64,
    i64,
    Option<i64>,
);

const SELECT_COLUMNS: &str = "SELECT id, conversation_id, inviter, invitee, status, \
     initial_message, created_at, expires_at, responded_at FROM invitations";

/// Status of a stored invitation. There is no declined state: declining
/// deletes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// Waiting for the invitee to respond.
    Pending,
    /// The invitee accepted.
    Accepted,
}

impl InvitationStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }

    /// Parse a string into an invitation status.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidEnum`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, RelationError> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            other => Err(RelationError::InvalidEnum {
                field: "invitation status",
                value: other.to_owned(),
            }),
        }
    }
}

/// A directed request from `inviter` to `invitee` to chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invitation {
    /// Database id.
    pub id: InvitationId,
    /// Conversation the invitation belongs to.
    pub conversation_id: ConversationId,
    /// Party who sent the invitation.
    pub inviter: PartyId,
    /// Party who must respond.
    pub invitee: PartyId,
    /// Current status.
    pub status: InvitationStatus,
    /// Optional greeting sent along with the invitation.
    pub initial_message: Option<String>,
    /// When the invitation was (re)issued.
    pub created_at: DateTime<Utc>,
    /// Informational expiry; nothing reaps invitations past it.
    pub expires_at: DateTime<Utc>,
    /// When the invitee accepted.
    pub responded_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Returns `true` while the invitation awaits a response.
    pub fn is_pending(&self) -> bool {
        self.status == InvitationStatus::Pending
    }
}

fn invitation_from_row(row: InvitationRow) -> Result<Invitation, RelationError> {
    Ok(Invitation {
        id: row.0,
        conversation_id: row.1,
        inviter: parse_party("inviter", &row.2)?,
        invitee: parse_party("invitee", &row.3)?,
        status: InvitationStatus::parse(&row.4)?,
        initial_message: row.5,
        created_at: from_millis(row.6),
        expires_at: from_millis(row.7),
        responded_at: row.8.map(from_millis),
    })
}

/// Load an invitation by id.
///
/// # Errors
///
/// Returns [`RelationError::NotFound`] if no invitation matches,
/// or [`RelationError::Database`] on SQLite failure.
pub async fn load(
    conn: &mut SqliteConnection,
    id: InvitationId,
) -> Result<Invitation, RelationError> {
    let row: InvitationRow = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RelationError::not_found("invitation", id))?;
    invitation_from_row(row)
}

/// The invitation row for one direction of a conversation, in any status.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn find_direction(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    inviter: PartyId,
    invitee: PartyId,
) -> Result<Option<Invitation>, RelationError> {
    let row: Option<InvitationRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE conversation_id = ?1 AND inviter = ?2 AND invitee = ?3"
    ))
    .bind(conversation_id)
    .bind(inviter.as_db())
    .bind(invitee.as_db())
    .fetch_optional(&mut *conn)
    .await?;
    row.map(invitation_from_row).transpose()
}

/// The pending invitation for one direction of a conversation, if any.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn find_pending(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    inviter: PartyId,
    invitee: PartyId,
) -> Result<Option<Invitation>, RelationError> {
    Ok(find_direction(conn, conversation_id, inviter, invitee)
        .await?
        .filter(Invitation::is_pending))
}

/// Insert a pending invitation for a direction that has no row yet.
///
/// If a concurrent request created the row first, the existing row is
/// returned unchanged; callers inspect its status.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn insert_pending(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    inviter: PartyId,
    invitee: PartyId,
    initial_message: Option<&str>,
    now: i64,
    expires_at: i64,
) -> Result<Invitation, RelationError> {
    let result = sqlx::query(
        "INSERT INTO invitations (conversation_id, inviter, invitee, status, \
         initial_message, created_at, expires_at) \
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6) \
         ON CONFLICT(conversation_id, inviter, invitee) DO NOTHING",
    )
    .bind(conversation_id)
    .bind(inviter.as_db())
    .bind(invitee.as_db())
    .bind(initial_message)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    let invitation = find_direction(conn, conversation_id, inviter, invitee)
        .await?
        .ok_or_else(|| RelationError::not_found("invitation", format!("{inviter}->{invitee}")))?;
    trace!(
        invitation_id = invitation.id,
        created = result.rows_affected() > 0,
        "pending invitation ensured"
    );
    Ok(invitation)
}

/// Reset an existing row to `pending` with fresh timestamps.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn revive(
    conn: &mut SqliteConnection,
    id: InvitationId,
    initial_message: Option<&str>,
    now: i64,
    expires_at: i64,
) -> Result<Invitation, RelationError> {
    sqlx::query(
        "UPDATE invitations SET status = 'pending', responded_at = NULL, \
         initial_message = COALESCE(?2, initial_message), created_at = ?3, expires_at = ?4 \
         WHERE id = ?1",
    )
    .bind(id)
    .bind(initial_message)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;
    trace!(invitation_id = id, "invitation revived to pending");
    load(conn, id).await
}

/// Mark an invitation accepted.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn mark_accepted(
    conn: &mut SqliteConnection,
    id: InvitationId,
    now: i64,
) -> Result<(), RelationError> {
    sqlx::query("UPDATE invitations SET status = 'accepted', responded_at = ?2 WHERE id = ?1")
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    trace!(invitation_id = id, "invitation accepted");
    Ok(())
}

/// Delete a single invitation row.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn delete(conn: &mut SqliteConnection, id: InvitationId) -> Result<(), RelationError> {
    sqlx::query("DELETE FROM invitations WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    trace!(invitation_id = id, "invitation deleted");
    Ok(())
}

/// Delete pending invitations in both directions between a pair.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn delete_pending_between(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
) -> Result<u64, RelationError> {
    let result = sqlx::query(
        "DELETE FROM invitations WHERE status = 'pending' \
         AND ((inviter = ?1 AND invitee = ?2) OR (inviter = ?2 AND invitee = ?1))",
    )
    .bind(a.as_db())
    .bind(b.as_db())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Delete every invitation between a pair regardless of status.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn delete_all_between(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
) -> Result<u64, RelationError> {
    let result = sqlx::query(
        "DELETE FROM invitations \
         WHERE (inviter = ?1 AND invitee = ?2) OR (inviter = ?2 AND invitee = ?1)",
    )
    .bind(a.as_db())
    .bind(b.as_db())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Pending invitations addressed to `invitee`, newest first.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn list_pending_for(
    conn: &mut SqliteConnection,
    invitee: PartyId,
) -> Result<Vec<Invitation>, RelationError> {
    let rows: Vec<InvitationRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE invitee = ?1 AND status = 'pending' \
         ORDER BY created_at DESC, id DESC"
    ))
    .bind(invitee.as_db())
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(invitation_from_row).collect()
}

/// Number of pending invitations addressed to `invitee`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn count_pending_for(
    conn: &mut SqliteConnection,
    invitee: PartyId,
) -> Result<u64, RelationError> {
    let row: (i64,) =
        sqlx::query_as("SELECT count(*) FROM invitations WHERE invitee = ?1 AND status = 'pending'")
            .bind(invitee.as_db())
            .fetch_one(&mut *conn)
            .await?;
    // count(*) is always non-negative.
    Ok(row.0.unsigned_abs())
}
