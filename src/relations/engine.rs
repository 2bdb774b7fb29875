//! Relationship engine: every public transition of the direct-conversation
//! state machine, each committed as one SQLite transaction.
//!
//! Notifications are delivered only after the transaction commits, so a
//! rolled-back transition never notifies anyone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{info, trace, warn};

use super::block::{self, Block};
use super::conversation::{self, Conversation, ConversationStatus};
use super::gate::{self, SendVerdict};
use super::invitation::{self, Invitation, InvitationStatus};
use super::visibility::{self, ParticipantState};
use super::{friendship, RelationError, SendDenial};
use crate::delivery::{DeliveryRouter, NotificationEvent};
use crate::directory::{IdentityResolver, InviteeRef};
use crate::messages::{self, Message, MessageBody};
use crate::types::{add_days, add_hours, now_millis, ConversationId, InvitationId, PartyId};

/// Default number of days until an invitation's informational expiry.
pub const DEFAULT_INVITATION_TTL_DAYS: u32 = 7;

/// Maximum number of messages returned by [`RelationEngine::history`].
pub const MAX_HISTORY: usize = 500;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Days added to `created_at` to compute an invitation's `expires_at`.
    pub invitation_ttl_days: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            invitation_ttl_days: DEFAULT_INVITATION_TTL_DAYS,
        }
    }
}

/// Result of an invitation request.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationOutcome {
    /// The pair's conversation after the request.
    pub conversation: Conversation,
    /// The invitation that was created, revived or auto-accepted.
    pub invitation: Invitation,
    /// `true` if the request completed a mutual invitation and activated the
    /// conversation.
    pub auto_accepted: bool,
}

/// One row of a party's conversation list.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    /// The conversation.
    pub conversation: Conversation,
    /// The other participant.
    pub counterpart: PartyId,
    /// The listing party's own visibility state.
    pub state: ParticipantState,
    /// Newest message the listing party can still see.
    pub last_message: Option<Message>,
}

/// Transactional relationship engine.
pub struct RelationEngine {
    pool: SqlitePool,
    directory: Arc<dyn IdentityResolver>,
    router: DeliveryRouter,
    settings: EngineSettings,
}

impl std::fmt::Debug for RelationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationEngine")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RelationEngine {
    /// Build an engine over an already-migrated pool.
    pub fn new(
        pool: SqlitePool,
        directory: Arc<dyn IdentityResolver>,
        router: DeliveryRouter,
        settings: EngineSettings,
    ) -> Self {
        Self {
            pool,
            directory,
            router,
            settings,
        }
    }

    /// The underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a transaction holding the write lock from its first statement.
    ///
    /// Concurrent transitions queue behind the busy timeout rather than
    /// failing with `SQLITE_BUSY` when a read snapshot upgrades to a write.
    async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>, RelationError> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    async fn resolve(&self, invitee: &InviteeRef) -> Result<PartyId, RelationError> {
        let resolved = match invitee {
            InviteeRef::Party(id) => Some(*id),
            InviteeRef::Phone(phone) => self.directory.resolve_phone(phone).await,
            InviteeRef::Login(login) => self.directory.resolve_login(login).await,
        };
        resolved.ok_or_else(|| {
            let id = match invitee {
                InviteeRef::Party(id) => id.to_string(),
                InviteeRef::Phone(phone) => phone.clone(),
                InviteeRef::Login(login) => login.clone(),
            };
            RelationError::not_found("party", id)
        })
    }

    // ── Invitations ─────────────────────────────────────────────

    /// Ask `invitee` to start (or restart) a direct conversation.
    ///
    /// Creates the pair's conversation on first contact, resurrects a
    /// `deleted` one, and settles the relationship immediately when the other
    /// side already has a pending invitation outstanding.
    ///
    /// # Errors
    ///
    /// - [`RelationError::NotFound`] if the invitee cannot be resolved.
    /// - [`RelationError::PermissionDenied`] if either party blocked the other.
    /// - [`RelationError::InvalidState`] for self-invites, an invitation that
    ///   is already pending, an existing reverse invitation on a locked
    ///   conversation, or a pair that is already connected.
    pub async fn request_invitation(
        &self,
        inviter: PartyId,
        invitee: &InviteeRef,
        initial_message: Option<&str>,
    ) -> Result<InvitationOutcome, RelationError> {
        let invitee = self.resolve(invitee).await?;
        check_pair(inviter, invitee, "you cannot invite yourself")?;
        let initial_message = initial_message.map(str::trim).filter(|m| !m.is_empty());
        let now = now_millis();
        let expires_at = add_days(now, self.settings.invitation_ttl_days);

        let mut tx = self.begin_write().await?;

        if block::are_blocked(&mut tx, inviter, invitee).await? {
            return Err(RelationError::PermissionDenied(
                SendDenial::Unavailable.to_string(),
            ));
        }

        let found = conversation::find_or_create(&mut tx, inviter, invitee, now).await?;
        let mut conv = conversation::reconcile(&mut tx, found, now).await?;

        let mut revived = None;
        if conv.status == ConversationStatus::Deleted {
            revived = resurrect(&mut tx, &conv, inviter, invitee, initial_message, now, expires_at)
                .await?;
            conv = conversation::load(&mut tx, conv.id).await?;
        }

        let friends = friendship::are_friends(&mut tx, inviter, invitee).await?;
        let (invitation, auto_accepted) = match conv.status {
            ConversationStatus::Active if friends => {
                let Some(reverse) =
                    invitation::find_pending(&mut tx, conv.id, invitee, inviter).await?
                else {
                    return Err(RelationError::invalid_state(
                        "you are already connected with this user",
                    ));
                };
                accept_within(&mut tx, &conv, &reverse, now).await?;
                (invitation::load(&mut tx, reverse.id).await?, true)
            }
            ConversationStatus::Blocked | ConversationStatus::Locked => {
                if invitation::find_pending(&mut tx, conv.id, invitee, inviter)
                    .await?
                    .is_some()
                {
                    return Err(RelationError::invalid_state(
                        "this user already invited you; accept their invitation instead",
                    ));
                }
                let own = issue(
                    &mut tx,
                    &conv,
                    inviter,
                    invitee,
                    initial_message,
                    revived,
                    now,
                    expires_at,
                )
                .await?;
                (own, false)
            }
            status => {
                if status == ConversationStatus::Active {
                    warn!(
                        conversation_id = conv.id,
                        "active conversation without friendship; issuing a fresh invitation"
                    );
                }
                let own = issue(
                    &mut tx,
                    &conv,
                    inviter,
                    invitee,
                    initial_message,
                    revived,
                    now,
                    expires_at,
                )
                .await?;
                if invitation::find_pending(&mut tx, conv.id, invitee, inviter)
                    .await?
                    .is_some()
                {
                    // Both sides asked: accepting ours also accepts theirs.
                    accept_within(&mut tx, &conv, &own, now).await?;
                    info!(conversation_id = conv.id, "mutual invitations settled");
                    (invitation::load(&mut tx, own.id).await?, true)
                } else {
                    (own, false)
                }
            }
        };

        if let Some(text) = initial_message {
            let conv_now = conversation::load(&mut tx, conv.id).await?;
            let message =
                messages::append(&mut tx, conv.id, inviter, &MessageBody::text(text), now).await?;
            gate::on_message_sent(&mut tx, &conv_now, inviter, now).await?;
            trace!(message_id = message.id, "initial invitation message stored");
        }

        let conversation = conversation::load(&mut tx, conv.id).await?;
        tx.commit().await?;

        info!(
            conversation_id = conversation.id,
            invitation_id = invitation.id,
            %inviter,
            %invitee,
            auto_accepted,
            status = conversation.status.as_str(),
            "invitation requested"
        );

        let event = if auto_accepted {
            NotificationEvent::InvitationAccepted(invitation.clone())
        } else {
            NotificationEvent::InvitationCreated(invitation.clone())
        };
        self.router.deliver(&event, &[invitee]).await;

        Ok(InvitationOutcome {
            conversation,
            invitation,
            auto_accepted,
        })
    }

    /// Accept a pending invitation addressed to `acting`.
    ///
    /// # Errors
    ///
    /// - [`RelationError::NotFound`] if the invitation does not exist.
    /// - [`RelationError::PermissionDenied`] if `acting` is not the invitee or
    ///   the pair is blocked.
    /// - [`RelationError::InvalidState`] if the invitation is not pending.
    pub async fn accept_invitation(
        &self,
        invitation_id: InvitationId,
        acting: PartyId,
    ) -> Result<InvitationOutcome, RelationError> {
        let now = now_millis();
        let mut tx = self.begin_write().await?;

        let inv = load_for_response(&mut tx, invitation_id, acting).await?;
        if block::are_blocked(&mut tx, inv.inviter, inv.invitee).await? {
            return Err(RelationError::PermissionDenied(
                SendDenial::Unavailable.to_string(),
            ));
        }
        let conv = conversation::load(&mut tx, inv.conversation_id).await?;
        accept_within(&mut tx, &conv, &inv, now).await?;

        let invitation = invitation::load(&mut tx, inv.id).await?;
        let conversation = conversation::load(&mut tx, conv.id).await?;
        tx.commit().await?;

        info!(
            conversation_id = conversation.id,
            invitation_id,
            %acting,
            "invitation accepted"
        );
        self.router
            .deliver(
                &NotificationEvent::InvitationAccepted(invitation.clone()),
                &[invitation.inviter],
            )
            .await;

        Ok(InvitationOutcome {
            conversation,
            invitation,
            auto_accepted: false,
        })
    }

    /// Decline a pending invitation addressed to `acting`.
    ///
    /// The row is deleted so either party may invite again straight away.
    /// The conversation status is left untouched.
    ///
    /// # Errors
    ///
    /// - [`RelationError::NotFound`] if the invitation does not exist.
    /// - [`RelationError::PermissionDenied`] if `acting` is not the invitee.
    /// - [`RelationError::InvalidState`] if the invitation is not pending.
    pub async fn decline_invitation(
        &self,
        invitation_id: InvitationId,
        acting: PartyId,
    ) -> Result<(), RelationError> {
        let mut tx = self.begin_write().await?;
        let inv = load_for_response(&mut tx, invitation_id, acting).await?;
        invitation::delete(&mut tx, inv.id).await?;
        tx.commit().await?;

        info!(
            conversation_id = inv.conversation_id,
            invitation_id,
            %acting,
            "invitation declined"
        );
        self.router
            .deliver(
                &NotificationEvent::InvitationDeclined(inv.clone()),
                &[inv.inviter],
            )
            .await;
        Ok(())
    }

    /// Pending invitations addressed to `party`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn list_pending_invitations(
        &self,
        party: PartyId,
    ) -> Result<Vec<Invitation>, RelationError> {
        let mut conn = self.pool.acquire().await?;
        invitation::list_pending_for(&mut conn, party).await
    }

    /// Number of pending invitations addressed to `party`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn count_pending_invitations(&self, party: PartyId) -> Result<u64, RelationError> {
        let mut conn = self.pool.acquire().await?;
        invitation::count_pending_for(&mut conn, party).await
    }

    // ── Blocks and friendships ──────────────────────────────────

    /// Block `blocked` on behalf of `blocker`.
    ///
    /// Demotes an active conversation to `blocked`, deactivates the
    /// friendship and deletes pending invitations in both directions.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidState`] for a nil or self block and
    /// when the block already exists.
    pub async fn block(&self, blocker: PartyId, blocked: PartyId) -> Result<(), RelationError> {
        check_pair(blocker, blocked, "you cannot block yourself")?;
        let now = now_millis();
        let mut tx = self.begin_write().await?;

        if !block::insert(&mut tx, blocker, blocked, now).await? {
            return Err(RelationError::invalid_state("user is already blocked"));
        }

        if let Some(conv) = conversation::find_by_pair(&mut tx, blocker, blocked).await? {
            if conv.status == ConversationStatus::Active {
                conversation::set_status(&mut tx, conv.id, ConversationStatus::Blocked, now)
                    .await?;
            }
        }
        friendship::deactivate(&mut tx, blocker, blocked, now).await?;
        let removed = invitation::delete_pending_between(&mut tx, blocker, blocked).await?;
        tx.commit().await?;

        info!(%blocker, %blocked, removed_invitations = removed, "party blocked");
        Ok(())
    }

    /// Lift a block. A missing block is a successful no-op.
    ///
    /// The conversation becomes view-only (`locked`) and every invitation
    /// between the pair is deleted; the friendship stays inactive until a new
    /// invitation is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidState`] for a nil or self unblock.
    pub async fn unblock(&self, blocker: PartyId, blocked: PartyId) -> Result<(), RelationError> {
        check_pair(blocker, blocked, "you cannot unblock yourself")?;
        let now = now_millis();
        let mut tx = self.begin_write().await?;

        if !block::delete(&mut tx, blocker, blocked).await? {
            trace!(%blocker, %blocked, "unblock without block; nothing to do");
            return Ok(());
        }

        if let Some(conv) = conversation::find_by_pair(&mut tx, blocker, blocked).await? {
            if matches!(
                conv.status,
                ConversationStatus::Blocked | ConversationStatus::Active
            ) {
                // The other side may still be blocking us.
                let target = if block::is_blocked(&mut tx, blocked, blocker).await? {
                    ConversationStatus::Blocked
                } else {
                    ConversationStatus::Locked
                };
                if target != conv.status {
                    conversation::set_status(&mut tx, conv.id, target, now).await?;
                }
            }
        }
        let removed = invitation::delete_all_between(&mut tx, blocker, blocked).await?;
        tx.commit().await?;

        info!(%blocker, %blocked, removed_invitations = removed, "party unblocked");
        Ok(())
    }

    /// Returns `true` if `blocker` blocked `blocked`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn is_blocked(
        &self,
        blocker: PartyId,
        blocked: PartyId,
    ) -> Result<bool, RelationError> {
        let mut conn = self.pool.acquire().await?;
        block::is_blocked(&mut conn, blocker, blocked).await
    }

    /// Returns `true` if either party blocked the other.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn are_blocked(&self, a: PartyId, b: PartyId) -> Result<bool, RelationError> {
        let mut conn = self.pool.acquire().await?;
        block::are_blocked(&mut conn, a, b).await
    }

    /// Everyone `blocker` has blocked.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn blocked_by(&self, blocker: PartyId) -> Result<Vec<Block>, RelationError> {
        let mut conn = self.pool.acquire().await?;
        block::list_blocked_by(&mut conn, blocker).await
    }

    /// End a friendship without blocking. An active conversation becomes
    /// `locked`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidState`] for a nil or self pair.
    pub async fn unfriend(&self, party: PartyId, other: PartyId) -> Result<(), RelationError> {
        check_pair(party, other, "you cannot unfriend yourself")?;
        let now = now_millis();
        let mut tx = self.begin_write().await?;
        let changed = friendship::deactivate(&mut tx, party, other, now).await?;
        tx.commit().await?;
        info!(%party, %other, changed, "friendship ended");
        Ok(())
    }

    /// Returns `true` if the pair are currently active friends.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn are_friends(&self, a: PartyId, b: PartyId) -> Result<bool, RelationError> {
        let mut conn = self.pool.acquire().await?;
        friendship::are_friends(&mut conn, a, b).await
    }

    // ── Conversations ───────────────────────────────────────────

    /// Load a conversation the party takes part in.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if it does not exist, or
    /// [`RelationError::PermissionDenied`] if `party` is not a participant.
    pub async fn get_conversation(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, RelationError> {
        let mut conn = self.pool.acquire().await?;
        let conv = conversation::load(&mut conn, conversation_id).await?;
        counterpart_of(&conv, party)?;
        Ok(conv)
    }

    /// The conversation between two parties, if one was ever created.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn conversation_between(
        &self,
        a: PartyId,
        b: PartyId,
    ) -> Result<Option<Conversation>, RelationError> {
        let mut conn = self.pool.acquire().await?;
        conversation::find_by_pair(&mut conn, a, b).await
    }

    /// Conversations visible to `party`, most recently active first.
    ///
    /// Deleted conversations and conversations `party` has hidden are left out.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] on SQLite failure.
    pub async fn list_conversations(
        &self,
        party: PartyId,
    ) -> Result<Vec<ConversationSummary>, RelationError> {
        let mut conn = self.pool.acquire().await?;
        let conversations = conversation::list_visible_for(&mut conn, party).await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conv in conversations {
            let counterpart = counterpart_of(&conv, party)?;
            let state = visibility::load(&mut conn, conv.id, party).await?;
            let cutoff = state.hidden_at.map(|t| t.timestamp_millis());
            let last_message = messages::latest_visible(&mut conn, conv.id, cutoff).await?;
            summaries.push(ConversationSummary {
                conversation: conv,
                counterpart,
                state,
                last_message,
            });
        }
        Ok(summaries)
    }

    /// Messages `party` can see, oldest first: not soft-deleted and sent after
    /// that party last hid the conversation.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] or [`RelationError::PermissionDenied`]
    /// as for [`Self::get_conversation`].
    pub async fn history(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, RelationError> {
        let mut conn = self.pool.acquire().await?;
        let conv = conversation::load(&mut conn, conversation_id).await?;
        counterpart_of(&conv, party)?;
        let state = visibility::load(&mut conn, conv.id, party).await?;
        let cutoff = state.hidden_at.map(|t| t.timestamp_millis());
        messages::visible_since(&mut conn, conv.id, cutoff, MAX_HISTORY).await
    }

    // ── Sending ─────────────────────────────────────────────────

    /// Ask the message gate whether `sender` may post right now.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the conversation does not exist.
    pub async fn can_send(
        &self,
        sender: PartyId,
        conversation_id: ConversationId,
    ) -> Result<SendVerdict, RelationError> {
        let mut conn = self.pool.acquire().await?;
        let conv = conversation::load(&mut conn, conversation_id).await?;
        gate::can_send(&mut conn, sender, &conv).await
    }

    /// Apply the side effects of a message stored by an external message
    /// store: unhide for everyone, move read markers, revive `deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] if the conversation does not exist,
    /// or [`RelationError::PermissionDenied`] if `sender` is not a participant.
    pub async fn on_message_sent(
        &self,
        conversation_id: ConversationId,
        sender: PartyId,
        sent_at: DateTime<Utc>,
    ) -> Result<ConversationStatus, RelationError> {
        let mut tx = self.begin_write().await?;
        let conv = conversation::load(&mut tx, conversation_id).await?;
        let status = gate::on_message_sent(&mut tx, &conv, sender, sent_at.timestamp_millis()).await?;
        tx.commit().await?;
        Ok(status)
    }

    /// Gate, store and deliver a message.
    ///
    /// # Errors
    ///
    /// - [`RelationError::SendDenied`] when the gate refuses the send.
    /// - [`RelationError::InvalidState`] for an empty body.
    /// - [`RelationError::NotFound`] if the conversation does not exist.
    pub async fn send_message(
        &self,
        sender: PartyId,
        conversation_id: ConversationId,
        body: MessageBody,
    ) -> Result<Message, RelationError> {
        if body.content.trim().is_empty() {
            return Err(RelationError::invalid_state("message must not be empty"));
        }
        let mut tx = self.begin_write().await?;
        let conv = conversation::load(&mut tx, conversation_id).await?;
        gate::can_send(&mut tx, sender, &conv).await?.into_result()?;

        let now = now_millis();
        let message = messages::append(&mut tx, conv.id, sender, &body, now).await?;
        gate::on_message_sent(&mut tx, &conv, sender, now).await?;
        tx.commit().await?;

        let recipient = counterpart_of(&conv, sender)?;
        self.router
            .deliver(&NotificationEvent::NewMessage(message.clone()), &[recipient])
            .await;
        Ok(message)
    }

    // ── Visibility ──────────────────────────────────────────────

    /// Hide a conversation for `party` and soft-delete their own messages.
    ///
    /// Once both participants have hidden an `active` or `locked`
    /// conversation it becomes `deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::NotFound`] or [`RelationError::PermissionDenied`]
    /// as for [`Self::get_conversation`].
    pub async fn hide_conversation(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
    ) -> Result<Conversation, RelationError> {
        let now = now_millis();
        let mut tx = self.begin_write().await?;
        let conv = conversation::load(&mut tx, conversation_id).await?;
        counterpart_of(&conv, party)?;

        visibility::hide(&mut tx, conv.id, party, now).await?;
        let removed = messages::soft_delete_own(&mut tx, conv.id, party, now).await?;

        if matches!(
            conv.status,
            ConversationStatus::Active | ConversationStatus::Locked
        ) && visibility::all_hidden(&mut tx, conv.id).await?
        {
            conversation::set_status(&mut tx, conv.id, ConversationStatus::Deleted, now).await?;
            info!(conversation_id, "conversation hidden by both parties; deleted");
        }

        let conversation = conversation::load(&mut tx, conv.id).await?;
        tx.commit().await?;
        info!(conversation_id, %party, removed_messages = removed, "conversation hidden");
        Ok(conversation)
    }

    /// Mute notifications for `party`, for `duration_hours` or indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::InvalidState`] for a zero duration, or the
    /// errors of [`Self::get_conversation`].
    pub async fn mute_conversation(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
        duration_hours: Option<u32>,
    ) -> Result<ParticipantState, RelationError> {
        if duration_hours == Some(0) {
            return Err(RelationError::invalid_state(
                "mute duration must be at least one hour",
            ));
        }
        let until = duration_hours.map(|hours| add_hours(now_millis(), hours));

        let mut tx = self.begin_write().await?;
        let conv = conversation::load(&mut tx, conversation_id).await?;
        counterpart_of(&conv, party)?;
        visibility::mute(&mut tx, conv.id, party, until).await?;
        let state = visibility::load(&mut tx, conv.id, party).await?;
        tx.commit().await?;
        Ok(state)
    }

    /// Clear any mute for `party`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::get_conversation`].
    pub async fn unmute_conversation(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
    ) -> Result<ParticipantState, RelationError> {
        let mut tx = self.begin_write().await?;
        let conv = conversation::load(&mut tx, conversation_id).await?;
        counterpart_of(&conv, party)?;
        visibility::unmute(&mut tx, conv.id, party).await?;
        let state = visibility::load(&mut tx, conv.id, party).await?;
        tx.commit().await?;
        Ok(state)
    }

    /// Move `party`'s read marker to now.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::get_conversation`].
    pub async fn mark_read(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
    ) -> Result<ParticipantState, RelationError> {
        let mut tx = self.begin_write().await?;
        let conv = conversation::load(&mut tx, conversation_id).await?;
        counterpart_of(&conv, party)?;
        visibility::mark_read(&mut tx, conv.id, party, now_millis()).await?;
        let state = visibility::load(&mut tx, conv.id, party).await?;
        tx.commit().await?;
        Ok(state)
    }

    /// A participant's visibility state.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Self::get_conversation`].
    pub async fn participant_state(
        &self,
        party: PartyId,
        conversation_id: ConversationId,
    ) -> Result<ParticipantState, RelationError> {
        let mut conn = self.pool.acquire().await?;
        let conv = conversation::load(&mut conn, conversation_id).await?;
        counterpart_of(&conv, party)?;
        visibility::load(&mut conn, conv.id, party).await
    }
}

fn check_pair(a: PartyId, b: PartyId, self_reason: &str) -> Result<(), RelationError> {
    if a.is_nil() || b.is_nil() {
        return Err(RelationError::invalid_state("party id must not be empty"));
    }
    if a == b {
        return Err(RelationError::invalid_state(self_reason));
    }
    Ok(())
}

fn counterpart_of(conv: &Conversation, party: PartyId) -> Result<PartyId, RelationError> {
    conv.counterpart(party).ok_or_else(|| {
        RelationError::PermissionDenied(SendDenial::NotParticipant.to_string())
    })
}

/// Load an invitation `acting` is about to accept or decline.
async fn load_for_response(
    conn: &mut SqliteConnection,
    invitation_id: InvitationId,
    acting: PartyId,
) -> Result<Invitation, RelationError> {
    let inv = invitation::load(conn, invitation_id).await?;
    if inv.invitee != acting {
        return Err(RelationError::PermissionDenied(
            "only the invited user can respond to this invitation".to_owned(),
        ));
    }
    if !inv.is_pending() {
        return Err(RelationError::invalid_state("invitation is no longer pending"));
    }
    Ok(inv)
}

/// Accept `inv`, auto-accept a pending reverse invitation, activate the
/// conversation and friendship, and unhide both participants.
async fn accept_within(
    conn: &mut SqliteConnection,
    conv: &Conversation,
    inv: &Invitation,
    now: i64,
) -> Result<(), RelationError> {
    invitation::mark_accepted(conn, inv.id, now).await?;
    if let Some(reverse) =
        invitation::find_pending(conn, conv.id, inv.invitee, inv.inviter).await?
    {
        invitation::mark_accepted(conn, reverse.id, now).await?;
        trace!(invitation_id = reverse.id, "reverse invitation auto-accepted");
    }
    conversation::set_status(conn, conv.id, ConversationStatus::Active, now).await?;
    for party in conv.parties() {
        visibility::unhide(conn, conv.id, party).await?;
    }
    friendship::create_or_activate(conn, inv.inviter, inv.invitee, now).await?;
    Ok(())
}

/// Find-or-create the requester's pending invitation.
///
/// An accepted row in the same direction is revived. A pending row is an
/// "already sent" error unless it is the row resurrection just revived.
#[allow(clippy::too_many_arguments)]
async fn issue(
    conn: &mut SqliteConnection,
    conv: &Conversation,
    inviter: PartyId,
    invitee: PartyId,
    initial_message: Option<&str>,
    revived: Option<InvitationId>,
    now: i64,
    expires_at: i64,
) -> Result<Invitation, RelationError> {
    let existing = invitation::find_direction(conn, conv.id, inviter, invitee).await?;
    let inv = match existing {
        Some(inv) if inv.is_pending() => {
            if revived == Some(inv.id) {
                return Ok(inv);
            }
            return Err(RelationError::invalid_state(
                "invitation already sent; awaiting response",
            ));
        }
        Some(inv) => inv,
        None => {
            let inv = invitation::insert_pending(
                conn,
                conv.id,
                inviter,
                invitee,
                initial_message,
                now,
                expires_at,
            )
            .await?;
            if inv.is_pending() {
                return Ok(inv);
            }
            inv
        }
    };
    debug_assert_eq!(inv.status, InvitationStatus::Accepted);
    invitation::revive(conn, inv.id, initial_message, now, expires_at).await
}

/// Bring a `deleted` conversation back to `pending` for a new request.
///
/// Both participants are unhidden with fresh read markers and the friendship
/// is switched off until someone re-confirms. The requester's own invitation,
/// accepted or still pending, is revived with fresh timestamps and its id
/// returned; an accepted one from the other side is dropped so that the other
/// side is the one to confirm.
async fn resurrect(
    conn: &mut SqliteConnection,
    conv: &Conversation,
    requester: PartyId,
    other: PartyId,
    initial_message: Option<&str>,
    now: i64,
    expires_at: i64,
) -> Result<Option<InvitationId>, RelationError> {
    conversation::set_status(conn, conv.id, ConversationStatus::Pending, now).await?;
    visibility::reset_all(conn, conv.id).await?;
    friendship::deactivate(conn, requester, other, now).await?;

    if let Some(theirs) = invitation::find_direction(conn, conv.id, other, requester).await? {
        if theirs.status == InvitationStatus::Accepted {
            invitation::delete(conn, theirs.id).await?;
        }
    }

    let revived = match invitation::find_direction(conn, conv.id, requester, other).await? {
        Some(ours) => {
            Some(invitation::revive(conn, ours.id, initial_message, now, expires_at).await?.id)
        }
        None => None,
    };

    info!(
        conversation_id = conv.id,
        %requester,
        revived_invitation = ?revived,
        "deleted conversation resurrected"
    );
    Ok(revived)
}
