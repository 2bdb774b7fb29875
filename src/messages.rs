//! Append-only message store keyed by conversation.
//!
//! The relationship engine decides whether a message may be stored; this
//! module only persists it. Rows are never updated except to stamp
//! `deleted_at` when the sender hides the conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::trace;

use crate::relations::{parse_party, RelationError};
use crate::types::{from_millis, ConversationId, PartyId};

/// Row type returned by SQLite queries for messages.
type MessageRow = (i64, i64, String, String, String, i64, Option<i64>);

const SELECT_COLUMNS: &str =
    "SELECT id, conversation_id, sender, kind, content, sent_at, deleted_at FROM messages";

/// Kind of message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Image reference.
    Image,
    /// Voice or audio clip reference.
    Audio,
    /// Generic file reference.
    File,
}

impl MessageKind {
    /// Returns the SQLite-stored string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }

    /// Parse a string into a message kind.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidEnum`] if the string is unrecognized.
    pub fn parse(s: &str) -> Result<Self, RelationError> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "audio" => Ok(Self::Audio),
            "file" => Ok(Self::File),
            other => Err(RelationError::InvalidEnum {
                field: "message kind",
                value: other.to_owned(),
            }),
        }
    }
}

/// Payload of a message: text, or a reference to stored media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    /// Payload kind.
    pub kind: MessageKind,
    /// Text, or an opaque storage reference for media kinds.
    pub content: String,
}

impl MessageBody {
    /// A plain text body.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            content: content.into(),
        }
    }

    /// A media body of the given kind pointing at `reference`.
    pub fn media(kind: MessageKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            content: reference.into(),
        }
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Database id.
    pub id: i64,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub sender: PartyId,
    /// Payload.
    pub body: MessageBody,
    /// When the message was stored.
    pub sent_at: DateTime<Utc>,
    /// Set when the sender hid the conversation.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Returns `true` if the message was soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

fn message_from_row(row: MessageRow) -> Result<Message, RelationError> {
    Ok(Message {
        id: row.0,
        conversation_id: row.1,
        sender: parse_party("sender", &row.2)?,
        body: MessageBody {
            kind: MessageKind::parse(&row.3)?,
            content: row.4,
        },
        sent_at: from_millis(row.5),
        deleted_at: row.6.map(from_millis),
    })
}

/// Append a message to a conversation.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn append(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    sender: PartyId,
    body: &MessageBody,
    sent_at: i64,
) -> Result<Message, RelationError> {
    let result = sqlx::query(
        "INSERT INTO messages (conversation_id, sender, kind, content, sent_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(conversation_id)
    .bind(sender.as_db())
    .bind(body.kind.as_str())
    .bind(&body.content)
    .bind(sent_at)
    .execute(&mut *conn)
    .await?;
    let id = result.last_insert_rowid();
    trace!(message_id = id, conversation_id, kind = body.kind.as_str(), "message stored");

    Ok(Message {
        id,
        conversation_id,
        sender,
        body: body.clone(),
        sent_at: from_millis(sent_at),
        deleted_at: None,
    })
}

/// Soft-delete every message `sender` wrote in the conversation up to `at`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn soft_delete_own(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    sender: PartyId,
    at: i64,
) -> Result<u64, RelationError> {
    let result = sqlx::query(
        "UPDATE messages SET deleted_at = ?3 \
         WHERE conversation_id = ?1 AND sender = ?2 AND deleted_at IS NULL AND sent_at <= ?3",
    )
    .bind(conversation_id)
    .bind(sender.as_db())
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Non-deleted messages sent strictly after `cutoff`, oldest first.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn visible_since(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    cutoff: Option<i64>,
    limit: usize,
) -> Result<Vec<Message>, RelationError> {
    let limit_i64 = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows: Vec<MessageRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE conversation_id = ?1 AND deleted_at IS NULL AND sent_at > ?2 \
         ORDER BY sent_at ASC, id ASC LIMIT ?3"
    ))
    .bind(conversation_id)
    .bind(cutoff.unwrap_or(i64::MIN))
    .bind(limit_i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(message_from_row).collect()
}

/// The newest non-deleted message sent after `cutoff`.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn latest_visible(
    conn: &mut SqliteConnection,
    conversation_id: ConversationId,
    cutoff: Option<i64>,
) -> Result<Option<Message>, RelationError> {
    let row: Option<MessageRow> = sqlx::query_as(&format!(
        "{SELECT_COLUMNS} WHERE conversation_id = ?1 AND deleted_at IS NULL AND sent_at > ?2 \
         ORDER BY sent_at DESC, id DESC LIMIT 1"
    ))
    .bind(conversation_id)
    .bind(cutoff.unwrap_or(i64::MIN))
    .fetch_optional(&mut *conn)
    .await?;
    row.map(message_from_row).transpose()
}
