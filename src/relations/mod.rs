//! Direct (1-to-1) relationship engine: blocks, friendships, invitations,
//! conversations and per-participant visibility.
//!
//! # Storage conventions
//!
//! Symmetric facts (conversations, friendships) are stored once per unordered
//! pair in [`canonical_pair`](crate::types::canonical_pair) order. Conversations
//! are soft-deleted through their status. Declined invitations and the
//! invitations cleared by an unblock are *deleted*: a missing row means "no
//! outstanding request", so there are no tombstones for callers to filter.
//!
//! Store functions take a `&mut SqliteConnection` so that [`engine`] can run a
//! whole state-machine transition inside one transaction.

pub mod block;
pub mod conversation;
pub mod engine;
pub mod friendship;
pub mod gate;
pub mod invitation;
pub mod visibility;

use std::fmt;

use serde::Serialize;

use crate::types::PartyId;

use self::conversation::ConversationStatus;

/// Errors from the relationship engine.
#[derive(Debug, thiserror::Error)]
pub enum RelationError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A conversation, invitation or party does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up.
        entity: &'static str,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// The operation is not valid in the current state.
    #[error("{0}")]
    InvalidState(String),

    /// The acting party is not allowed to perform the operation.
    #[error("{0}")]
    PermissionDenied(String),

    /// The message gate refused a send.
    #[error("{0}")]
    SendDenied(SendDenial),

    /// An invalid enum value was read from the database.
    #[error("invalid {field} value: {value:?}")]
    InvalidEnum {
        /// Which field contained the bad value.
        field: &'static str,
        /// The unexpected value.
        value: String,
    },
}

impl RelationError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState(reason.into())
    }
}

/// Why the message gate refused a send.
///
/// A party who has been blocked only ever sees [`SendDenial::Unavailable`],
/// so the gate never reveals who blocked whom to the blocked side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "status", rename_all = "snake_case")]
pub enum SendDenial {
    /// The sender is not one of the two parties.
    NotParticipant,
    /// The conversation is pending, blocked without a block fact, or deleted.
    NotActive(ConversationStatus),
    /// The sender blocked the recipient.
    BlockedByYou,
    /// The recipient blocked the sender.
    Unavailable,
    /// No accepted invitation backs the conversation.
    NotFriends,
}

impl fmt::Display for SendDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotParticipant => write!(f, "you are not part of this conversation"),
            Self::NotActive(ConversationStatus::Pending) => {
                write!(f, "the invitation for this conversation is still pending")
            }
            Self::NotActive(status) => {
                write!(f, "this conversation is {}; messages cannot be sent", status.as_str())
            }
            Self::BlockedByYou => write!(f, "you blocked this user; unblock them to send messages"),
            Self::Unavailable => write!(f, "this user is unavailable"),
            Self::NotFriends => write!(
                f,
                "no invitation has been accepted yet; send an invitation to chat again"
            ),
        }
    }
}

/// Parse a stored party id column.
pub(crate) fn parse_party(field: &'static str, value: &str) -> Result<PartyId, RelationError> {
    value.parse().map_err(|_| RelationError::InvalidEnum {
        field,
        value: value.to_owned(),
    })
}
