//! Per-participant visibility state: hidden, muted and last-read markers.
//!
//! `last_read_at = NULL` is a sentinel meaning "treat the next message as the
//! very first". Inbound messages reset it; the sender's own messages advance
//! it to just after the message timestamp.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::trace;

use super::{parse_party, RelationError};
use crate::types::{from_millis, ConversationId, PartyId};

/// Row type returned by SQLite queries for participants.
type ParticipantRow = (i64, String, bool, Option<i64>, bool, Option<i64>, Option<i64>);

const SELECT_COLUMNS: &str = "SELECT conversation_id, party, is_hidden, hidden_at, is_muted, \
     mute_until, last_read_at FROM participants";

/// One participant's view of one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantState {
    /// Conversation this state belongs to.
    pub conversation_id: ConversationId,
    /// The participant.
    pub party: PartyId,
    /// Hidden from this participant's conversation list.
    pub is_hidden: bool,
    /// Last time the participant hid the conversation. Kept after unhiding as
    /// the cutoff for the history this participant still sees.
    pub hidden_at: Option<DateTime<Utc>>,
    /// Notifications suppressed.
    pub is_muted: bool,
    /// End of a timed mute; `None` with `is_muted` means muted indefinitely.
    pub mute_until: Option<DateTime<Utc>>,
    /// Read marker; `None` means the next message is treated as the first.
    pub last_read_at: Option<DateTime<Utc>>,
}

impl ParticipantState {
    /// Whether notifications for this participant are suppressed at `now`.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        if !self.is_muted {
            return false;
        }
        match self.mute_until {
            None => true,
            Some(until) => now < until,
        }
    }
}

fn state_from_row(row: ParticipantRow) -> Result<ParticipantState, RelationError> {
    Ok(ParticipantState {
        conversation_id: row.0,
        party: parse_party("party", &row.1)?,
        is_hidden: row.2,
        hidden_at: row.3.map(from_millis),
        is_muted: row.4,
        mute_until: row.5.map(from_millis),
        last_read_at: row.6.map(from_millis),
    })
}

/// Create the participant row if it does not exist yet.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn ensure(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
) -> Result<(), RelationError> {
    sqlx::query(
        "INSERT INTO participants (conversation_id, party) VALUES (?1, ?2) \
         ON CONFLICT(conversation_id, party) DO NOTHING",
    )
    .bind(conversation_id)
    .bind(party.as_db())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Load a participant's state, if the row exists.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn find(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
) -> Result<Option<ParticipantState>, RelationError> {
    let row: Option<ParticipantRow> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE conversation_id = ?1 AND party = ?2"))
            .bind(conversation_id)
            .bind(party.as_db())
            .fetch_optional(&mut *conn)
            .await?;
    row.map(state_from_row).transpose()
}

/// Load a participant's state, failing if the row is missing.
///
/// # Errors
///
/// Returns [`RelationError::NotFound`] if the party has no row in the
/// conversation, or [`RelationError::Database`] on SQLite failure.
pub async fn load(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
) -> Result<ParticipantState, RelationError> {
    find(conn, conversation_id, party)
        .await?
        .ok_or_else(|| RelationError::not_found("participant", format!("{conversation_id}/{party}")))
}

/// Hide the conversation for `party` as of `now`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn hide(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
    now: i64,
) -> Result<(), RelationError> {
    sqlx::query(
        "UPDATE participants SET is_hidden = 1, hidden_at = ?3 \
         WHERE conversation_id = ?1 AND party = ?2",
    )
    .bind(conversation_id)
    .bind(party.as_db())
    .bind(now)
    .execute(&mut *conn)
    .await?;
    trace!(conversation_id, %party, "conversation hidden");
    Ok(())
}

/// Clear the hidden flag for one participant, leaving read markers alone.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn unhide(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
) -> Result<(), RelationError> {
    sqlx::query("UPDATE participants SET is_hidden = 0 WHERE conversation_id = ?1 AND party = ?2")
        .bind(conversation_id)
        .bind(party.as_db())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Unhide the conversation for every participant and reset their read
/// markers, as when a deleted conversation is brought back.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn reset_all(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
) -> Result<(), RelationError> {
    sqlx::query(
        "UPDATE participants SET is_hidden = 0, last_read_at = NULL WHERE conversation_id = ?1",
    )
    .bind(conversation_id)
    .execute(&mut *conn)
    .await?;
    trace!(conversation_id, "visibility reset for all participants");
    Ok(())
}

/// Apply the visibility side effects of a new message.
///
/// Every participant is unhidden. The sender's read marker moves to one
/// millisecond past `sent_at`; everyone else's is reset to `NULL` so the new
/// message counts as their first unread.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn record_message(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    sender: PartyId,
    sent_at: i64,
) -> Result<(), RelationError> {
    sqlx::query(
        "UPDATE participants SET is_hidden = 0, \
         last_read_at = CASE WHEN party = ?2 THEN ?3 ELSE NULL END \
         WHERE conversation_id = ?1",
    )
    .bind(conversation_id)
    .bind(sender.as_db())
    .bind(sent_at.saturating_add(1))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Mute notifications for `party`, indefinitely when `until` is `None`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn mute(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
    until: Option<i64>,
) -> Result<(), RelationError> {
    sqlx::query(
        "UPDATE participants SET is_muted = 1, mute_until = ?3 \
         WHERE conversation_id = ?1 AND party = ?2",
    )
    .bind(conversation_id)
    .bind(party.as_db())
    .bind(until)
    .execute(&mut *conn)
    .await?;
    trace!(conversation_id, %party, ?until, "conversation muted");
    Ok(())
}

/// Clear any mute for `party`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn unmute(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
) -> Result<(), RelationError> {
    sqlx::query(
        "UPDATE participants SET is_muted = 0, mute_until = NULL \
         WHERE conversation_id = ?1 AND party = ?2",
    )
    .bind(conversation_id)
    .bind(party.as_db())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Move `party`'s read marker to `at`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn mark_read(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    party: PartyId,
    at: i64,
) -> Result<(), RelationError> {
    sqlx::query(
        "UPDATE participants SET last_read_at = ?3 WHERE conversation_id = ?1 AND party = ?2",
    )
    .bind(conversation_id)
    .bind(party.as_db())
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Returns `true` once every participant has hidden the conversation.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn all_hidden(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
) -> Result<bool, RelationError> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT count(*), COALESCE(SUM(is_hidden), 0) FROM participants WHERE conversation_id = ?1",
    )
    .bind(conversation_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.0 > 0 && row.0 == row.1)
}
