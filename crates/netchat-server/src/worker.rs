//! Stream consumer workers.
//!
//! Each session runs two: one tails the user's private inbox, the other
//! tails the shared broadcast log through a consumer group of its own.
//! A worker parks on a blocking read and stops when it reads the exit
//! sentinel published for its session, or when a hand-off finds the
//! connection already closed. Entries are acknowledged only after the writer
//! confirms the frame reached the socket, never before, so delivery is
//! at-least-once: a crash between the write and the ack redelivers the entry
//! when the user's next session replays its pending set.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use netchat_shared::constants::PUBLIC_STREAM;
use netchat_shared::types::{broadcast_group, inbox_group, inbox_stream};
use netchat_shared::{Envelope, MessageKind};
use netchat_store::LogEntry;

use crate::log_store::LogStore;
use crate::notice;
use crate::outbox::Outbox;

/// Pause before retrying after a store error.
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerKind {
    Inbox,
    Broadcast,
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

pub struct ConsumerWorker {
    kind: WorkerKind,
    username: String,
    session_id: Uuid,
    stream: String,
    group: String,
    logs: LogStore,
    outbox: Outbox,
}

impl ConsumerWorker {
    pub fn inbox(username: &str, session_id: Uuid, logs: LogStore, outbox: Outbox) -> Self {
        Self {
            kind: WorkerKind::Inbox,
            username: username.to_string(),
            session_id,
            stream: inbox_stream(username),
            group: inbox_group().to_string(),
            logs,
            outbox,
        }
    }

    pub fn broadcast(username: &str, session_id: Uuid, logs: LogStore, outbox: Outbox) -> Self {
        Self {
            kind: WorkerKind::Broadcast,
            username: username.to_string(),
            session_id,
            stream: PUBLIC_STREAM.to_string(),
            group: broadcast_group(username),
            logs,
            outbox,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        debug!(user = %self.username, kind = ?self.kind, "Consumer worker started");

        if self.replay_pending().await == Step::Stop {
            return;
        }

        loop {
            let entry = match self
                .logs
                .read_next(&self.stream, &self.group, &self.username)
                .await
            {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(user = %self.username, stream = %self.stream, error = %e, "Log read failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };
            if self.handle(entry).await == Step::Stop {
                break;
            }
        }

        info!(user = %self.username, kind = ?self.kind, "Consumer worker stopped");
    }

    /// Re-deliver entries an earlier session received but never acked.
    async fn replay_pending(&self) -> Step {
        let pending = match self.logs.pending(&self.stream, &self.group, &self.username) {
            Ok(pending) => pending,
            Err(e) => {
                warn!(user = %self.username, error = %e, "Could not load pending entries");
                return Step::Continue;
            }
        };
        if !pending.is_empty() {
            debug!(user = %self.username, count = pending.len(), "Replaying pending entries");
        }
        for entry in pending {
            if self.handle(entry).await == Step::Stop {
                return Step::Stop;
            }
        }
        Step::Continue
    }

    async fn handle(&self, entry: LogEntry) -> Step {
        let envelope = &entry.envelope;

        if envelope.is_exit_signal() {
            self.ack(entry.id);
            let ours =
                envelope.recipient == self.username && envelope.exit_session() == Some(self.session_id);
            return if ours { Step::Stop } else { Step::Continue };
        }

        let Some(delivery) = self.render(envelope) else {
            self.ack(entry.id);
            return Step::Continue;
        };

        match self.outbox.deliver(delivery).await {
            Ok(()) => {
                self.ack(entry.id);
                Step::Continue
            }
            Err(e) => {
                // The entry stays pending and is replayed by the next session.
                debug!(user = %self.username, id = entry.id, error = %e, "Connection gone, stopping");
                Step::Stop
            }
        }
    }

    /// What the user should see for a log entry, if anything.
    fn render(&self, envelope: &Envelope) -> Option<Envelope> {
        match self.kind {
            WorkerKind::Inbox => {
                if envelope.kind != MessageKind::PrivateMsg {
                    return None;
                }
                Some(Envelope::new(
                    envelope.sender.as_str(),
                    notice::private_delivery(&envelope.sender, &envelope.content),
                    MessageKind::PrivateMsg,
                    self.username.as_str(),
                ))
            }
            WorkerKind::Broadcast => {
                // System notices reach online users directly from the
                // dispatch loop; own messages are not echoed.
                if envelope.kind != MessageKind::PublicMsg
                    || envelope.is_system()
                    || envelope.sender == self.username
                {
                    return None;
                }
                Some(Envelope::public(
                    envelope.sender.as_str(),
                    notice::public_delivery(&envelope.sender, &envelope.content),
                ))
            }
        }
    }

    fn ack(&self, id: u64) {
        if let Err(e) = self.logs.ack(&self.stream, &self.group, id) {
            warn!(user = %self.username, id, error = %e, "Ack failed");
        }
    }
}
