//! Conversation store and its lifecycle status.
//!
//! A conversation is created lazily by the first invitation between a pair and
//! is never hard-deleted. The stored status is a cache of the underlying block,
//! friendship and invitation facts; [`reconcile`] is the one place that
//! re-derives it when the two have drifted apart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{trace, warn};

use super::{block, friendship, parse_party, visibility, RelationError};
use crate::types::{canonical_pair, from_millis, ConversationId, PartyId};

/// Row type returned by SQLite queries for conversations.
type ConversationRow = (i64, String, String, String, String, i64, i64);

const SELECT_COLUMNS: &str =
    "SELECT id, party_a, party_b, status, created_by, created_at, updated_at FROM conversations";

/// Lifecycle status of a direct conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Created by an invitation that has not been accepted yet.
    Pending,
    /// Both parties may exchange messages.
    Active,
    /// One party blocked the other.
    Blocked,
    /// View-only history after an unblock or unfriend.
    Locked,
    /// Hidden by both parties; inert until a new invitation resurrects it.
    Deleted,
}

impl ConversationStatus {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Locked => "locked",
            Self::Deleted => "deleted",
        }
    }

    /// Parse a string into a conversation status.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidEnum`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, RelationError> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "blocked" => Ok(Self::Blocked),
            "locked" => Ok(Self::Locked),
            "deleted" => Ok(Self::Deleted),
            other => Err(RelationError::InvalidEnum {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }
}

/// The two-party relationship record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conversation {
    /// Database id.
    pub id: ConversationId,
    /// Canonically smaller party.
    pub party_a: PartyId,
    /// Canonically larger party.
    pub party_b: PartyId,
    /// Current lifecycle status.
    pub status: ConversationStatus,
    /// Party whose invitation created the row.
    pub created_by: PartyId,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change or message.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Returns `true` if `party` is one of the two participants.
    pub fn involves(&self, party: PartyId) -> bool {
        self.party_a == party || self.party_b == party
    }

    /// The other participant, or `None` if `party` is not in the conversation.
    pub fn counterpart(&self, party: PartyId) -> Option<PartyId> {
        if self.party_a == party {
            Some(self.party_b)
        } else if self.party_b == party {
            Some(self.party_a)
        } else {
            None
        }
    }

    /// Both participants, in canonical order.
    pub fn parties(&self) -> [PartyId; 2] {
        [self.party_a, self.party_b]
    }
}

fn conversation_from_row(row: ConversationRow) -> Result<Conversation, RelationError> {
    Ok(Conversation {
        id: row.0,
        party_a: parse_party("party_a", &row.1)?,
        party_b: parse_party("party_b", &row.2)?,
        status: ConversationStatus::parse(&row.3)?,
        created_by: parse_party("created_by", &row.4)?,
        created_at: from_millis(row.5),
        updated_at: from_millis(row.6),
    })
}

/// Load a conversation by id.
///
/// # Errors
///
/// Returns [`RelationError::NotFound`] if no conversation matches,
/// or [`RelationError::Database`] on SQLite failure.
pub async fn load(
    conn: &mut SqliteConnection,
    id: ConversationId,
) -> Result<Conversation, RelationError> {
    let row: ConversationRow = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| RelationError::not_found("conversation", id))?;
    conversation_from_row(row)
}

/// Look up the conversation for an unordered pair.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn find_by_pair(
    conn: &mut SqliteConnection,
    a: PartyId,
    b: PartyId,
) -> Result<Option<Conversation>, RelationError> {
    let (first, second) = canonical_pair(a, b);
    let row: Option<ConversationRow> =
        sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE party_a = ?1 AND party_b = ?2"))
            .bind(first.as_db())
            .bind(second.as_db())
            .fetch_optional(&mut *conn)
            .await?;
    row.map(conversation_from_row).transpose()
}

/// Find the pair's conversation, creating it as `pending` if absent.
///
/// A concurrent creator hitting the unique pair constraint is treated as
/// "already exists": the insert is skipped and the existing row is returned.
/// Participant rows for both parties are ensured either way.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    creator: PartyId,
    other: PartyId,
    now: i64,
) -> Result<Conversation, RelationError> {
    let (first, second) = canonical_pair(creator, other);
    let result = sqlx::query(
        "INSERT INTO conversations (party_a, party_b, status, created_by, created_at, updated_at) \
         VALUES (?1, ?2, 'pending', ?3, ?4, ?4) \
         ON CONFLICT(party_a, party_b) DO NOTHING",
    )
    .bind(first.as_db())
    .bind(second.as_db())
    .bind(creator.as_db())
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let conversation = find_by_pair(conn, first, second)
        .await?
        .ok_or_else(|| RelationError::not_found("conversation", format!("{first}/{second}")))?;

    if result.rows_affected() > 0 {
        trace!(conversation_id = conversation.id, %creator, "conversation created");
    }
    for party in conversation.parties() {
        visibility::ensure(conn, conversation.id, party).await?;
    }
    Ok(conversation)
}

/// Overwrite the stored status.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn set_status(
    conn: &mut SqliteConnection,
    id: ConversationId,
    status: ConversationStatus,
    now: i64,
) -> Result<(), RelationError> {
    sqlx::query("UPDATE conversations SET status = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    trace!(conversation_id = id, status = status.as_str(), "conversation status set");
    Ok(())
}

/// Bump `updated_at` after message activity.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn touch(
    conn: &mut SqliteConnection,
    id: ConversationId,
    now: i64,
) -> Result<(), RelationError> {
    sqlx::query("UPDATE conversations SET updated_at = ?1 WHERE id = ?2")
        .bind(now)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Conversations visible to `party`: not deleted and not hidden by them.
///
/// Ordered by most recent activity.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn list_visible_for(
    conn: &mut SqliteConnection,
    party: PartyId,
) -> Result<Vec<Conversation>, RelationError> {
    let rows: Vec<ConversationRow> = sqlx::query_as(
        "SELECT c.id, c.party_a, c.party_b, c.status, c.created_by, c.created_at, c.updated_at \
         FROM conversations c \
         JOIN participants p ON p.conversation_id = c.id AND p.party = ?1 \
         WHERE c.status <> 'deleted' AND p.is_hidden = 0 \
         ORDER BY c.updated_at DESC, c.id DESC",
    )
    .bind(party.as_db())
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(conversation_from_row).collect()
}

/// Status implied by the current facts, or `None` if `status` is consistent.
///
/// - a block between the pair never leaves the conversation `active`;
/// - an active friendship without a block means `active`;
/// - `blocked` with no block fact left behind is `locked`.
///
/// `deleted` is left alone; only an invitation resurrects it.
pub fn derive_status(
    status: ConversationStatus,
    blocked: bool,
    friends: bool,
) -> Option<ConversationStatus> {
    use ConversationStatus::{Active, Blocked, Deleted, Locked, Pending};

    let derived = match (status, blocked, friends) {
        (Deleted, _, _) => Deleted,
        (Active, true, _) => Blocked,
        (Pending | Blocked | Locked, false, true) => Active,
        (Blocked, false, false) => Locked,
        (current, _, _) => current,
    };
    (derived != status).then_some(derived)
}

/// Re-derive the conversation status from block and friendship facts,
/// persisting and logging any correction.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn reconcile(
    conn: &mut SqliteConnection,
    mut conversation: Conversation,
    now: i64,
) -> Result<Conversation, RelationError> {
    let (a, b) = (conversation.party_a, conversation.party_b);
    let blocked = block::are_blocked(conn, a, b).await?;
    let friends = friendship::are_friends(conn, a, b).await?;

    if let Some(corrected) = derive_status(conversation.status, blocked, friends) {
        warn!(
            conversation_id = conversation.id,
            stored = conversation.status.as_str(),
            corrected = corrected.as_str(),
            blocked,
            friends,
            "conversation status diverged from relationship facts; correcting"
        );
        set_status(conn, conversation.id, corrected, now).await?;
        conversation.status = corrected;
        conversation.updated_at = from_millis(now);
    }
    Ok(conversation)
}
