//! Connection write path.
//!
//! A writer task owns the socket's write half and drains a bounded queue.
//! Everything addressed to a client goes through its [`Outbox`]: login
//! replies, notices from the dispatch loop and deliveries from consumer
//! workers. Worker deliveries are confirmed by the writer once the frame is
//! on the socket, so a log entry is only acknowledged after it was written.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use netchat_shared::{write_envelope, Envelope, MessageKind};

/// Queued frames per connection before `try_deliver` starts failing.
pub const OUTBOX_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum Outbound {
    Envelope(Envelope),
    /// Written, then confirmed through `written`. If the writer stops first
    /// the sender is dropped and the delivery counts as failed.
    Confirmed {
        envelope: Envelope,
        written: oneshot::Sender<()>,
    },
    /// Flush what is queued, then shut the socket down.
    Close,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// An outbox and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue without waiting. Used by the dispatch loop, which must never
    /// stall on a slow client.
    pub fn try_deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        self.tx
            .try_send(Outbound::Envelope(envelope))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
                mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Queue, waiting for room if needed, and resolve once the writer has
    /// put the frame on the socket. Fails with `Closed` if the connection
    /// shuts down before that, including when a close was queued first.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), DeliveryError> {
        let (written, confirmed) = oneshot::channel();
        self.tx
            .send(Outbound::Confirmed { envelope, written })
            .await
            .map_err(|_| DeliveryError::Closed)?;
        confirmed.await.map_err(|_| DeliveryError::Closed)
    }

    /// Server notice with no sender.
    pub fn notify(&self, kind: MessageKind, text: impl Into<String>) -> Result<(), DeliveryError> {
        self.try_deliver(Envelope::system(kind, text))
    }

    /// Ask the writer to shut the connection down. Never blocks: if the queue
    /// is full the close is sent from a detached task.
    pub fn close(&self) {
        match self.tx.try_send(Outbound::Close) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(Outbound::Close).await;
                });
            }
        }
    }
}

/// Spawn the writer task for one connection.
pub fn spawn_writer<W>(writer: W, peer: SocketAddr) -> (Outbox, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbox, rx) = Outbox::channel(OUTBOX_CAPACITY);
    let task = tokio::spawn(run_writer(writer, rx, peer));
    (outbox, task)
}

async fn run_writer<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>, peer: SocketAddr)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Envelope(envelope) => {
                if let Err(e) = write_envelope(&mut writer, &envelope).await {
                    debug!(peer = %peer, error = %e, "Write failed, dropping connection");
                    break;
                }
            }
            Outbound::Confirmed { envelope, written } => {
                if let Err(e) = write_envelope(&mut writer, &envelope).await {
                    debug!(peer = %peer, error = %e, "Write failed, dropping connection");
                    break;
                }
                let _ = written.send(());
            }
            Outbound::Close => break,
        }
    }

    // Anything still queued is dropped unwritten; confirmed deliveries see
    // their sender go away and report `Closed`.
    rx.close();
    while rx.try_recv().is_ok() {}
    let _ = writer.shutdown().await;
    debug!(peer = %peer, "Writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use netchat_shared::{read_envelope, FrameError};

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_writes_in_order_then_closes() {
        let (client, server) = tokio::io::duplex(4096);
        let (_read, write) = tokio::io::split(server);
        let (outbox, task) = spawn_writer(write, peer());

        outbox.notify(MessageKind::Login, "ok").unwrap();
        outbox
            .deliver(Envelope::public("alice", "->alice:hi"))
            .await
            .unwrap();
        outbox.close();
        task.await.unwrap();

        let mut client = client;
        assert_eq!(read_envelope(&mut client).await.unwrap().content, "ok");
        assert_eq!(
            read_envelope(&mut client).await.unwrap().content,
            "->alice:hi"
        );
        assert!(matches!(
            read_envelope(&mut client).await,
            Err(FrameError::Closed)
        ));
        assert_eq!(
            outbox.try_deliver(Envelope::heartbeat("x")),
            Err(DeliveryError::Closed)
        );
    }

    #[tokio::test]
    async fn test_deliver_after_close_is_not_confirmed() {
        let (client, server) = tokio::io::duplex(4096);
        let (_read, write) = tokio::io::split(server);
        let (outbox, task) = spawn_writer(write, peer());

        outbox.close();
        assert_eq!(
            outbox.deliver(Envelope::public("alice", "->alice:late")).await,
            Err(DeliveryError::Closed)
        );
        task.await.unwrap();

        let mut client = client;
        assert!(matches!(
            read_envelope(&mut client).await,
            Err(FrameError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_try_deliver_reports_full_queue() {
        let (outbox, _rx) = Outbox::channel(1);
        outbox.notify(MessageKind::CheckUser, "one").unwrap();
        assert_eq!(
            outbox.notify(MessageKind::CheckUser, "two"),
            Err(DeliveryError::Full)
        );
    }
}
