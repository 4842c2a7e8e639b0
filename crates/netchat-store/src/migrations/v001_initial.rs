//! v001 -- Initial schema creation.
//!
//! Creates the credential table and the activity rank aggregate.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (credential store)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    username      TEXT PRIMARY KEY NOT NULL,
    password_hash TEXT NOT NULL,              -- hex(salt) '$' hex(blake3)
    created_at    TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Activity rank
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS rank (
    member TEXT PRIMARY KEY NOT NULL,
    score  REAL NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_rank_score ON rank(score DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
