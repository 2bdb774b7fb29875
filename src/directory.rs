//! Identity resolution seam.
//!
//! Parties are identified by a stable [`PartyId`] owned by an external
//! directory. The engine only needs to turn a login identity or a phone
//! number into that id.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::types::PartyId;

/// How a caller names the party they want to invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteeRef {
    /// Already-resolved party id.
    Party(PartyId),
    /// Phone number, resolved through the directory.
    Phone(String),
    /// Login identity, resolved through the directory.
    Login(String),
}

/// External directory mapping login identities and phones to party ids.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Resolve a login identity to its canonical party id.
    async fn resolve_login(&self, login: &str) -> Option<PartyId>;

    /// Resolve a phone number to its canonical party id.
    async fn resolve_phone(&self, phone: &str) -> Option<PartyId>;
}

/// Keep only the digits and a leading `+`.
pub fn normalize_phone(phone: &str) -> String {
    let trimmed = phone.trim();
    let mut out = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        if c.is_ascii_digit() || (i == 0 && c == '+') {
            out.push(c);
        }
    }
    out
}

/// Fixed in-memory directory, loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    logins: HashMap<String, PartyId>,
    phones: HashMap<String, PartyId>,
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a login identity.
    pub fn with_login(mut self, login: impl Into<String>, party: PartyId) -> Self {
        self.logins.insert(login.into(), party);
        self
    }

    /// Register a phone number (normalised before storing).
    pub fn with_phone(mut self, phone: &str, party: PartyId) -> Self {
        self.phones.insert(normalize_phone(phone), party);
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticDirectory {
    async fn resolve_login(&self, login: &str) -> Option<PartyId> {
        self.logins.get(login).copied()
    }

    async fn resolve_phone(&self, phone: &str) -> Option<PartyId> {
        self.phones.get(&normalize_phone(phone)).copied()
    }
}
