//! Duet: the relationship engine behind direct 1-to-1 conversations.
//!
//! Tracks who has blocked whom, who is friends with whom, which invitations
//! are outstanding, and the lifecycle of each pair's conversation. A message
//! gate decides whether a send is allowed right now, and a delivery router
//! picks realtime or push for the resulting notifications.
//!
//! See `DESIGN.md` for the module map and the decisions behind it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod logging;
pub mod types;

pub mod directory;
pub mod messages;
pub mod relations;

pub mod delivery;
