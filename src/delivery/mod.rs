//! Delivery router: decides, per recipient, between in-band realtime delivery
//! and a deferred push notification.
//!
//! Muted recipients are skipped entirely. Online recipients (at least one live
//! realtime connection) are served in-band; everyone else gets a push with a
//! short preview. Delivery failures are logged and never reach the caller.

pub mod presence;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::messages::{Message, MessageKind};
use crate::relations::invitation::Invitation;
use crate::relations::{visibility, RelationError};
use crate::types::{ConversationId, PartyId};

/// Default cap on text previews, in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 100;

/// Answers whether a party currently holds a live realtime connection.
pub trait PresenceOracle: Send + Sync {
    /// Returns `true` if `party` has at least one live connection.
    fn is_online(&self, party: PartyId) -> bool;
}

/// Hands notifications to an external push service.
#[async_trait]
pub trait PushDispatcher: Send + Sync {
    /// Send a push notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the push service rejects the request. The router
    /// logs and discards it.
    async fn send_push(
        &self,
        recipient: PartyId,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError>;
}

/// Pushes a notification down a recipient's live connections.
#[async_trait]
pub trait RealtimeSink: Send + Sync {
    /// Deliver in-band to every live connection of `recipient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails. The router logs and discards it.
    async fn deliver(
        &self,
        recipient: PartyId,
        notification: &Notification,
    ) -> Result<(), DeliveryError>;
}

/// Errors from delivery collaborators.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The push service refused or failed the request.
    #[error("push dispatch failed: {0}")]
    Push(String),

    /// The realtime transport failed.
    #[error("realtime delivery failed: {0}")]
    Realtime(String),
}

/// An event worth notifying the other party about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A message was stored.
    NewMessage(Message),
    /// An invitation was issued or re-issued.
    InvitationCreated(Invitation),
    /// An invitation was accepted, explicitly or automatically.
    InvitationAccepted(Invitation),
    /// An invitation was declined.
    InvitationDeclined(Invitation),
}

impl NotificationEvent {
    /// Stable event type name carried in the push payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::InvitationCreated(_) => "invitation_created",
            Self::InvitationAccepted(_) => "invitation_accepted",
            Self::InvitationDeclined(_) => "invitation_declined",
        }
    }

    /// Conversation the event belongs to.
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::NewMessage(message) => message.conversation_id,
            Self::InvitationCreated(inv)
            | Self::InvitationAccepted(inv)
            | Self::InvitationDeclined(inv) => inv.conversation_id,
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "New message",
            Self::InvitationCreated(_) => "New chat invitation",
            Self::InvitationAccepted(_) => "Invitation accepted",
            Self::InvitationDeclined(_) => "Invitation declined",
        }
    }
}

/// A rendered notification for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// Who the notification is for.
    pub recipient: PartyId,
    /// Short title.
    pub title: String,
    /// Preview text.
    pub body: String,
    /// String payload for the client.
    pub data: BTreeMap<String, String>,
}

/// How a notification reached (or skipped) a recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Recipient muted the conversation; nothing sent.
    Muted,
    /// Delivered in-band over a live connection.
    Realtime,
    /// Handed to the push dispatcher.
    Push,
}

/// Text preview of a message for push bodies.
///
/// Text is cut to `max_chars` characters; media and deleted messages get a
/// fixed label.
pub fn message_preview(message: &Message, max_chars: usize) -> String {
    if message.is_deleted() {
        return "[Message deleted]".to_owned();
    }
    match message.body.kind {
        MessageKind::Text => message.body.content.chars().take(max_chars).collect(),
        MessageKind::Image => "[Image]".to_owned(),
        MessageKind::Audio => "[Voice message]".to_owned(),
        MessageKind::File => "[File]".to_owned(),
    }
}

/// Routes notification events to realtime or push delivery.
pub struct DeliveryRouter {
    pool: SqlitePool,
    presence: Arc<dyn PresenceOracle>,
    push: Arc<dyn PushDispatcher>,
    realtime: Arc<dyn RealtimeSink>,
    preview_chars: usize,
}

impl std::fmt::Debug for DeliveryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryRouter")
            .field("preview_chars", &self.preview_chars)
            .finish_non_exhaustive()
    }
}

impl DeliveryRouter {
    /// Build a router over the relationship database and delivery collaborators.
    pub fn new(
        pool: SqlitePool,
        presence: Arc<dyn PresenceOracle>,
        push: Arc<dyn PushDispatcher>,
        realtime: Arc<dyn RealtimeSink>,
    ) -> Self {
        Self {
            pool,
            presence,
            push,
            realtime,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }

    /// Override the text preview length.
    pub fn with_preview_chars(mut self, preview_chars: usize) -> Self {
        self.preview_chars = preview_chars;
        self
    }

    /// Render `event` for `recipient`.
    pub fn render(&self, event: &NotificationEvent, recipient: PartyId) -> Notification {
        let mut data = BTreeMap::new();
        data.insert("type".to_owned(), event.event_type().to_owned());
        data.insert(
            "conversation_id".to_owned(),
            event.conversation_id().to_string(),
        );

        let body = match event {
            NotificationEvent::NewMessage(message) => {
                data.insert("message_id".to_owned(), message.id.to_string());
                data.insert("sender_id".to_owned(), message.sender.to_string());
                message_preview(message, self.preview_chars)
            }
            NotificationEvent::InvitationCreated(inv) => {
                data.insert("invitation_id".to_owned(), inv.id.to_string());
                data.insert("sender_id".to_owned(), inv.inviter.to_string());
                match inv.initial_message.as_deref() {
                    Some(text) if !text.is_empty() => {
                        text.chars().take(self.preview_chars).collect()
                    }
                    _ => "You have a new chat invitation".to_owned(),
                }
            }
            NotificationEvent::InvitationAccepted(inv) => {
                data.insert("invitation_id".to_owned(), inv.id.to_string());
                data.insert("sender_id".to_owned(), inv.invitee.to_string());
                "Your invitation was accepted".to_owned()
            }
            NotificationEvent::InvitationDeclined(inv) => {
                data.insert("invitation_id".to_owned(), inv.id.to_string());
                data.insert("sender_id".to_owned(), inv.invitee.to_string());
                "Your invitation was declined".to_owned()
            }
        };

        Notification {
            recipient,
            title: event.title().to_owned(),
            body,
            data,
        }
    }

    /// Choose the route for one recipient without sending anything.
    ///
    /// # Errors
    ///
    /// Returns [`RelationError::Database`] if the mute state cannot be read.
    pub async fn route_for(
        &self,
        event: &NotificationEvent,
        recipient: PartyId,
    ) -> Result<Route, RelationError> {
        let mut conn = self.pool.acquire().await?;
        let state = visibility::find(&mut conn, event.conversation_id(), recipient).await?;
        if state.is_some_and(|s| s.is_muted_at(chrono::Utc::now())) {
            return Ok(Route::Muted);
        }
        if self.presence.is_online(recipient) {
            Ok(Route::Realtime)
        } else {
            Ok(Route::Push)
        }
    }

    /// Deliver `event` to each recipient, returning the route taken.
    ///
    /// Never fails: a recipient whose mute state cannot be read is treated as
    /// unmuted, and collaborator errors are logged.
    pub async fn deliver(
        &self,
        event: &NotificationEvent,
        recipients: &[PartyId],
    ) -> Vec<(PartyId, Route)> {
        let mut routes = Vec::with_capacity(recipients.len());
        for &recipient in recipients {
            let route = match self.route_for(event, recipient).await {
                Ok(route) => route,
                Err(err) => {
                    warn!(%recipient, error = %err, "mute lookup failed; delivering anyway");
                    if self.presence.is_online(recipient) {
                        Route::Realtime
                    } else {
                        Route::Push
                    }
                }
            };

            match route {
                Route::Muted => {
                    debug!(%recipient, event = event.event_type(), "recipient muted; skipped");
                }
                Route::Realtime => {
                    let notification = self.render(event, recipient);
                    if let Err(err) = self.realtime.deliver(recipient, &notification).await {
                        warn!(%recipient, error = %err, "realtime delivery failed");
                    }
                }
                Route::Push => {
                    let notification = self.render(event, recipient);
                    if let Err(err) = self
                        .push
                        .send_push(
                            recipient,
                            &notification.title,
                            &notification.body,
                            &notification.data,
                        )
                        .await
                    {
                        warn!(%recipient, error = %err, "push dispatch failed");
                    }
                }
            }
            routes.push((recipient, route));
        }
        routes
    }
}

/// Push dispatcher that only logs; used when no push service is configured.
#[derive(Debug, Default)]
pub struct LogPushDispatcher;

#[async_trait]
impl PushDispatcher for LogPushDispatcher {
    async fn send_push(
        &self,
        recipient: PartyId,
        title: &str,
        body: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), DeliveryError> {
        tracing::info!(%recipient, title, body, ?data, "push notification");
        Ok(())
    }
}

/// Realtime sink that only logs; used when no socket layer is attached.
#[derive(Debug, Default)]
pub struct LogRealtimeSink;

#[async_trait]
impl RealtimeSink for LogRealtimeSink {
    async fn deliver(
        &self,
        recipient: PartyId,
        notification: &Notification,
    ) -> Result<(), DeliveryError> {
        tracing::info!(%recipient, title = %notification.title, "realtime notification");
        Ok(())
    }
}
