//! In-process presence registry.
//!
//! Connection handlers register a session id per live realtime connection and
//! unregister it on close. A party is online while at least one session is
//! registered. Safe to share across threads; each party's session set is
//! locked independently.

use std::collections::HashSet;

use dashmap::DashMap;
use tracing::debug;

use super::PresenceOracle;
use crate::types::PartyId;

/// Concurrent map of party to live session ids.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    sessions: DashMap<PartyId, HashSet<String>>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live connection. Returns `false` if the session was already
    /// registered.
    pub fn register(&self, party: PartyId, session_id: impl Into<String>) -> bool {
        let session_id = session_id.into();
        let inserted = self
            .sessions
            .entry(party)
            .or_default()
            .insert(session_id.clone());
        debug!(%party, session_id, inserted, "presence session registered");
        inserted
    }

    /// Drop a connection. Returns `false` if the session was unknown.
    pub fn unregister(&self, party: PartyId, session_id: &str) -> bool {
        let removed = match self.sessions.get_mut(&party) {
            Some(mut set) => set.remove(session_id),
            None => false,
        };
        // Only drop the entry if no session slipped in meanwhile.
        self.sessions.remove_if(&party, |_, set| set.is_empty());
        debug!(%party, session_id, removed, "presence session unregistered");
        removed
    }

    /// Number of live sessions for `party`.
    pub fn session_count(&self, party: PartyId) -> usize {
        self.sessions.get(&party).map_or(0, |set| set.len())
    }

    /// Number of parties with at least one live session.
    pub fn online_count(&self) -> usize {
        self.sessions.len()
    }
}

impl PresenceOracle for PresenceRegistry {
    fn is_online(&self, party: PartyId) -> bool {
        self.session_count(party) > 0
    }
}
