//! v002 -- Durable streams with consumer groups.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    name     TEXT PRIMARY KEY NOT NULL,
    last_seq INTEGER NOT NULL DEFAULT 0       -- last assigned entry id
);

CREATE TABLE IF NOT EXISTS stream_entries (
    stream      TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    payload     TEXT NOT NULL,                -- JSON envelope
    appended_at TEXT NOT NULL,

    PRIMARY KEY (stream, seq),
    FOREIGN KEY (stream) REFERENCES streams(name) ON DELETE CASCADE
);

-- Per-group cursor: highest entry id handed to any consumer of the group.
CREATE TABLE IF NOT EXISTS stream_groups (
    stream         TEXT NOT NULL,
    group_name     TEXT NOT NULL,
    last_delivered INTEGER NOT NULL,

    PRIMARY KEY (stream, group_name),
    FOREIGN KEY (stream) REFERENCES streams(name) ON DELETE CASCADE
);

-- Delivered but not yet acknowledged entries.
CREATE TABLE IF NOT EXISTS stream_pending (
    stream       TEXT NOT NULL,
    group_name   TEXT NOT NULL,
    seq          INTEGER NOT NULL,
    consumer     TEXT NOT NULL,
    delivered_at TEXT NOT NULL,

    PRIMARY KEY (stream, group_name, seq),
    FOREIGN KEY (stream, group_name)
        REFERENCES stream_groups(stream, group_name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_stream_pending_consumer
    ON stream_pending(stream, group_name, consumer, seq);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
