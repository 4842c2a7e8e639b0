//! Durable append-only streams with consumer-group acknowledgment.
//!
//! A stream is an ordered sequence of JSON envelopes keyed by a per-stream
//! sequence number. Streams are capped: appending beyond `max_len` drops the
//! oldest entries. A consumer group keeps one cursor per stream; entries
//! handed to a consumer stay in the pending table until acknowledged, which
//! is what makes them redeliverable after a crash.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use netchat_shared::Envelope;

use crate::database::Database;
use crate::error::Result;
use crate::models::{EntryId, LogEntry, StartAt};

/// Raw row before the payload is decoded.
struct RawEntry {
    seq: i64,
    payload: String,
    appended_at: String,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            payload: row.get(1)?,
            appended_at: row.get(2)?,
        })
    }

    /// Decode the payload. Corrupt rows are logged and skipped by callers.
    fn decode(self, stream: &str) -> Option<LogEntry> {
        let envelope = match Envelope::from_json(&self.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(stream, seq = self.seq, error = %e, "skipping undecodable stream entry");
                return None;
            }
        };
        let appended_at = DateTime::parse_from_rfc3339(&self.appended_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        Some(LogEntry {
            id: self.seq as EntryId,
            envelope,
            appended_at,
        })
    }
}

fn ensure_stream(tx: &Transaction<'_>, stream: &str) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT OR IGNORE INTO streams (name, last_seq) VALUES (?1, 0)",
        params![stream],
    )?;
    Ok(())
}

impl Database {
    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Create the stream and the consumer group if absent.
    ///
    /// Returns `true` when the group was created, `false` when it already
    /// existed (which is not an error).
    pub fn create_group(&mut self, stream: &str, group: &str, start: StartAt) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;
        ensure_stream(&tx, stream)?;

        let start_seq: i64 = match start {
            StartAt::Beginning => 0,
            StartAt::End => tx.query_row(
                "SELECT last_seq FROM streams WHERE name = ?1",
                params![stream],
                |row| row.get(0),
            )?,
        };

        let created = tx.execute(
            "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_delivered)
             VALUES (?1, ?2, ?3)",
            params![stream, group, start_seq],
        )?;
        tx.commit()?;

        if created > 0 {
            tracing::debug!(stream, group, ?start, "created consumer group");
        }
        Ok(created > 0)
    }

    // ------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------

    /// Append an envelope and trim the stream to its newest `max_len` entries.
    ///
    /// `max_len == 0` disables trimming.
    pub fn append_entry(
        &mut self,
        stream: &str,
        envelope: &Envelope,
        max_len: usize,
    ) -> Result<EntryId> {
        let payload = envelope.to_json()?;
        let tx = self.conn_mut().transaction()?;
        ensure_stream(&tx, stream)?;

        tx.execute(
            "UPDATE streams SET last_seq = last_seq + 1 WHERE name = ?1",
            params![stream],
        )?;
        let seq: i64 = tx.query_row(
            "SELECT last_seq FROM streams WHERE name = ?1",
            params![stream],
            |row| row.get(0),
        )?;

        tx.execute(
            "INSERT INTO stream_entries (stream, seq, payload, appended_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![stream, seq, payload, Utc::now().to_rfc3339()],
        )?;

        let floor = seq - max_len as i64;
        if max_len > 0 && floor > 0 {
            tx.execute(
                "DELETE FROM stream_pending WHERE stream = ?1 AND seq <= ?2",
                params![stream, floor],
            )?;
            tx.execute(
                "DELETE FROM stream_entries WHERE stream = ?1 AND seq <= ?2",
                params![stream, floor],
            )?;
        }

        tx.commit()?;
        Ok(seq as EntryId)
    }

    // ------------------------------------------------------------------
    // Consume
    // ------------------------------------------------------------------

    /// Hand the next undelivered entry of `group` to `consumer`.
    ///
    /// Advances the group cursor and records the entry as pending. Returns
    /// `None` when the group has caught up. A missing group is created
    /// lazily, starting from the beginning of the stream.
    pub fn claim_next(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<LogEntry>> {
        let tx = self.conn_mut().transaction()?;
        ensure_stream(&tx, stream)?;
        tx.execute(
            "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_delivered)
             VALUES (?1, ?2, 0)",
            params![stream, group],
        )?;

        let mut cursor: i64 = tx.query_row(
            "SELECT last_delivered FROM stream_groups
             WHERE stream = ?1 AND group_name = ?2",
            params![stream, group],
            |row| row.get(0),
        )?;

        let claimed = loop {
            let raw = tx
                .query_row(
                    "SELECT seq, payload, appended_at FROM stream_entries
                     WHERE stream = ?1 AND seq > ?2
                     ORDER BY seq ASC LIMIT 1",
                    params![stream, cursor],
                    RawEntry::from_row,
                )
                .optional()?;

            let Some(raw) = raw else { break None };
            cursor = raw.seq;

            if let Some(entry) = raw.decode(stream) {
                tx.execute(
                    "INSERT OR REPLACE INTO stream_pending
                        (stream, group_name, seq, consumer, delivered_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![stream, group, cursor, consumer, Utc::now().to_rfc3339()],
                )?;
                break Some(entry);
            }
        };

        tx.execute(
            "UPDATE stream_groups SET last_delivered = ?3
             WHERE stream = ?1 AND group_name = ?2",
            params![stream, group, cursor],
        )?;
        tx.commit()?;

        Ok(claimed)
    }

    /// Entries delivered to `consumer` but never acknowledged, oldest first.
    pub fn pending_entries(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Vec<LogEntry>> {
        let mut stmt = self.conn().prepare(
            "SELECT e.seq, e.payload, e.appended_at
             FROM stream_pending p
             JOIN stream_entries e ON e.stream = p.stream AND e.seq = p.seq
             WHERE p.stream = ?1 AND p.group_name = ?2 AND p.consumer = ?3
             ORDER BY p.seq ASC",
        )?;

        let rows = stmt.query_map(params![stream, group, consumer], RawEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            if let Some(entry) = row?.decode(stream) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Acknowledge an entry for a group.
    ///
    /// Returns `false` if the entry was not pending (already acknowledged or
    /// never delivered); that is not an error.
    pub fn ack_entry(&self, stream: &str, group: &str, id: EntryId) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM stream_pending
             WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
            params![stream, group, id as i64],
        )?;
        Ok(removed > 0)
    }

    // ------------------------------------------------------------------
    // Inspect
    // ------------------------------------------------------------------

    /// The most recent `count` chat entries, returned oldest first.
    ///
    /// Exit signals are control entries: they are skipped and do not use up
    /// any of the `count` slots.
    pub fn latest_messages(&self, stream: &str, count: usize) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        if count == 0 {
            return Ok(entries);
        }

        let mut stmt = self.conn().prepare(
            "SELECT seq, payload, appended_at FROM stream_entries
             WHERE stream = ?1
             ORDER BY seq DESC",
        )?;
        let mut rows = stmt.query_map(params![stream], RawEntry::from_row)?;

        while entries.len() < count {
            let Some(row) = rows.next() else { break };
            match row?.decode(stream) {
                Some(entry) if !entry.envelope.is_exit_signal() => entries.push(entry),
                _ => {}
            }
        }
        entries.reverse();
        Ok(entries)
    }

    #[cfg(test)]
    pub fn stream_len(&self, stream: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM stream_entries WHERE stream = ?1",
            params![stream],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    #[cfg(test)]
    pub fn pending_count(&self, stream: &str, group: &str) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM stream_pending WHERE stream = ?1 AND group_name = ?2",
            params![stream, group],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    #[cfg(test)]
    pub fn group_exists(&self, stream: &str, group: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM stream_groups WHERE stream = ?1 AND group_name = ?2",
            params![stream, group],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
