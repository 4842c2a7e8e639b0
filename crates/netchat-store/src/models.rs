//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use netchat_shared::Envelope;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub username: String,
    /// Salted digest, never the clear-text password.
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Stream entry
// ---------------------------------------------------------------------------

/// Log-assigned identifier of a stream entry. Strictly increasing per stream.
pub type EntryId = u64;

/// One entry of a durable stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub envelope: Envelope,
    pub appended_at: DateTime<Utc>,
}

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Deliver every retained entry.
    Beginning,
    /// Deliver only entries appended after the group was created.
    End,
}

// ---------------------------------------------------------------------------
// Rank
// ---------------------------------------------------------------------------

/// One row of the activity leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankItem {
    pub member: String,
    pub score: f64,
}
