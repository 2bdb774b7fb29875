//! Shared identifier types and the canonical pair ordering.
//!
//! Symmetric relations (conversations, friendships) are stored once per
//! unordered pair. [`canonical_pair`] is the only place that decides which
//! party is stored first, and every lookup and write goes through it.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a person, resolved externally from a login or phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(Uuid);

impl PartyId {
    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random party id.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns `true` for the all-zero UUID, which is never a real party.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// The 16 raw bytes in big-endian order.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Text form stored in SQLite (lowercase hyphenated).
    pub fn as_db(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for PartyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Database row id of a conversation.
pub type ConversationId = i64;

/// Database row id of an invitation.
pub type InvitationId = i64;

/// Order two parties so the smaller one comes first.
///
/// Comparison is unsigned and byte-wise over the big-endian UUID bytes, which
/// is also the order SQLite's BINARY collation gives the lowercase text form.
pub fn canonical_pair(a: PartyId, b: PartyId) -> (PartyId, PartyId) {
    match a.as_bytes().cmp(b.as_bytes()) {
        Ordering::Greater => (b, a),
        Ordering::Less | Ordering::Equal => (a, b),
    }
}

/// Current time truncated to millisecond precision.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a stored millisecond timestamp into a UTC datetime.
///
/// Out-of-range values collapse to the Unix epoch rather than failing a read.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Millisecond timestamp `hours` after `base`.
pub fn add_hours(base: i64, hours: u32) -> i64 {
    base.saturating_add(Duration::hours(i64::from(hours)).num_milliseconds())
}

/// Millisecond timestamp `days` after `base`.
pub fn add_days(base: i64, days: u32) -> i64 {
    base.saturating_add(Duration::days(i64::from(days)).num_milliseconds())
}
