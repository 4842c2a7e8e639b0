//! Async view of the durable per-stream logs.
//!
//! The SQLite tables do the bookkeeping (sequence ids, consumer group
//! cursors, pending sets); this adapter adds blocking reads. Each stream
//! has a [`Notify`] that `append` fires, so a reader that has caught up
//! parks until something new arrives instead of polling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::debug;

use netchat_shared::Envelope;
use netchat_store::{EntryId, LogEntry, StartAt};

use crate::error::ServerError;
use crate::storage::Storage;

#[derive(Clone)]
pub struct LogStore {
    storage: Storage,
    signals: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    max_len: usize,
}

impl LogStore {
    pub fn new(storage: Storage, max_len: usize) -> Self {
        Self {
            storage,
            signals: Arc::new(Mutex::new(HashMap::new())),
            max_len,
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    fn signal(&self, stream: &str) -> Result<Arc<Notify>, ServerError> {
        let mut signals = self
            .signals
            .lock()
            .map_err(|e| ServerError::Internal(format!("Lock poisoned: {e}")))?;
        Ok(signals
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone())
    }

    /// Append an envelope and wake every reader parked on the stream.
    pub fn append(&self, stream: &str, envelope: &Envelope) -> Result<EntryId, ServerError> {
        let id = self
            .storage
            .with(|db| db.append_entry(stream, envelope, self.max_len))?;
        self.signal(stream)?.notify_waiters();
        debug!(stream, id, kind = %envelope.kind, "Appended log entry");
        Ok(id)
    }

    /// Create a consumer group if it does not exist yet.
    pub fn ensure_group(&self, stream: &str, group: &str, start: StartAt) -> Result<bool, ServerError> {
        self.storage.with(|db| db.create_group(stream, group, start))
    }

    /// Next entry for `consumer`, waiting until one is appended if the
    /// group has caught up.
    pub async fn read_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<LogEntry, ServerError> {
        let signal = self.signal(stream)?;
        loop {
            // Register interest before checking so an append that lands
            // between the check and the await is not missed.
            let notified = signal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self
                .storage
                .with(|db| db.claim_next(stream, group, consumer))?
            {
                return Ok(entry);
            }

            notified.await;
        }
    }

    /// Entries handed to `consumer` earlier and never acknowledged.
    pub fn pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Vec<LogEntry>, ServerError> {
        self.storage
            .with(|db| db.pending_entries(stream, group, consumer))
    }

    /// Acknowledge an entry. Acknowledging twice is not an error.
    pub fn ack(&self, stream: &str, group: &str, id: EntryId) -> Result<bool, ServerError> {
        self.storage.with(|db| db.ack_entry(stream, group, id))
    }

    /// The most recent `count` chat entries, oldest first. Exit signals are
    /// left out and do not count.
    pub fn history(&self, stream: &str, count: usize) -> Result<Vec<LogEntry>, ServerError> {
        self.storage.with(|db| db.latest_messages(stream, count))
    }
}
