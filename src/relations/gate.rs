//! Message gate: the single authority on whether a send is allowed now.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::conversation::{self, Conversation, ConversationStatus};
use super::{block, friendship, visibility, RelationError, SendDenial};
use crate::types::PartyId;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "denial", rename_all = "snake_case")]
pub enum SendVerdict {
    /// The send may proceed.
    Allowed,
    /// The send is refused for the given reason.
    Denied(SendDenial),
}

impl SendVerdict {
    /// Returns `true` if the send may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Convert into a `Result`, mapping a denial to [`RelationError::SendDenied`].
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::SendDenied`] when the verdict is a denial.
    pub fn into_result(self) -> Result<(), RelationError> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(denial) => Err(RelationError::SendDenied(denial)),
        }
    }
}

/// Decide whether `sender` may post into `conversation` right now.
///
/// Blocks are checked before status so that each side of a blocked pair gets
/// its own reason. Everything other than `active` is refused.
///
/// # Errors
///
/// Returns [`RelationError::Database`] on SQLite failure.
pub async fn can_send(
    conn: &mut SqliteConnection,
    sender: PartyId,
    conversation: &Conversation,
) -> Result<SendVerdict, RelationError> {
    let Some(recipient) = conversation.counterpart(sender) else {
        return Ok(SendVerdict::Denied(SendDenial::NotParticipant));
    };

    let denial = if block::is_blocked(conn, sender, recipient).await? {
        Some(SendDenial::BlockedByYou)
    } else if block::is_blocked(conn, recipient, sender).await? {
        Some(SendDenial::Unavailable)
    } else {
        match conversation.status {
            ConversationStatus::Active => {
                if friendship::are_friends(conn, sender, recipient).await? {
                    None
                } else {
                    Some(SendDenial::NotFriends)
                }
            }
            ConversationStatus::Locked => Some(SendDenial::NotFriends),
            other => Some(SendDenial::NotActive(other)),
        }
    };

    match denial {
        None => Ok(SendVerdict::Allowed),
        Some(denial) => {
            debug!(
                conversation_id = conversation.id,
                %sender,
                ?denial,
                "send refused by gate"
            );
            Ok(SendVerdict::Denied(denial))
        }
    }
}

/// Run the visibility and status side effects of a stored message.
///
/// Unhides the conversation for everyone, advances the sender's read marker
/// past `sent_at`, resets the others' markers, and revives a `deleted`
/// conversation to `active`.
///
/// # Errors
///
/// Returns [`RelationError::PermissionDenied`] if `sender` is not a
/// participant, or [`RelationError::Database`] on SQLite failure.
pub async fn on_message_sent(
    conn: &mut SqliteConnection,
    conversation: &Conversation,
    sender: PartyId,
    sent_at: i64,
) -> Result<ConversationStatus, RelationError> {
    if !conversation.involves(sender) {
        return Err(RelationError::PermissionDenied(
            SendDenial::NotParticipant.to_string(),
        ));
    }
    visibility::record_message(conn, conversation.id, sender, sent_at).await?;

    if conversation.status == ConversationStatus::Deleted {
        conversation::set_status(conn, conversation.id, ConversationStatus::Active, sent_at)
            .await?;
        info!(
            conversation_id = conversation.id,
            "message revived deleted conversation"
        );
        return Ok(ConversationStatus::Active);
    }

    conversation::touch(conn, conversation.id, sent_at).await?;
    Ok(conversation.status)
}
