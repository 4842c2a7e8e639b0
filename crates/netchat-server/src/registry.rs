//! Who is online.
//!
//! The registry is owned by the dispatch loop and never shared: other tasks
//! learn about membership only through request/reply events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use netchat_shared::Envelope;

use crate::outbox::Outbox;

/// Live half of an authenticated session, as seen by the dispatch loop.
#[derive(Debug)]
pub struct SessionHandle {
    pub username: String,
    /// Distinguishes this login from earlier or later sessions of the same
    /// user. Carried by quit events and exit sentinels.
    pub session_id: Uuid,
    pub outbox: Outbox,
    pub joined_at: DateTime<Utc>,
    /// Read deadline watched by the session's receiver. Dropping the sender
    /// tells the receiver the session is over.
    deadline: watch::Sender<Instant>,
}

impl SessionHandle {
    pub fn new(
        username: impl Into<String>,
        session_id: Uuid,
        outbox: Outbox,
        deadline: watch::Sender<Instant>,
    ) -> Self {
        Self {
            username: username.into(),
            session_id,
            outbox,
            joined_at: Utc::now(),
            deadline,
        }
    }

    /// Push the receiver's read deadline out to `at`.
    pub fn refresh_deadline(&self, at: Instant) {
        // A send error only means the receiver is already gone.
        let _ = self.deadline.send(at);
    }

    /// Close the connection and release the receiver.
    pub fn close(self) {
        self.outbox.close();
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: BTreeMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.sessions.contains_key(username)
    }

    pub fn get(&self, username: &str) -> Option<&SessionHandle> {
        self.sessions.get(username)
    }

    /// The session registered for `username`, only if it is `session_id`.
    pub fn get_session(&self, username: &str, session_id: Uuid) -> Option<&SessionHandle> {
        self.get(username)
            .filter(|session| session.session_id == session_id)
    }

    /// Insert a session unless the username is already online, in which case
    /// the handle is given back.
    pub fn try_insert(&mut self, session: SessionHandle) -> Result<(), SessionHandle> {
        if self.sessions.contains_key(&session.username) {
            return Err(session);
        }
        self.sessions.insert(session.username.clone(), session);
        Ok(())
    }

    /// Remove `username` if its current session is `session_id`.
    pub fn remove(&mut self, username: &str, session_id: Uuid) -> Option<SessionHandle> {
        self.get_session(username, session_id)?;
        self.sessions.remove(username)
    }

    /// Online usernames in ascending order.
    pub fn usernames(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Best-effort send to every session except `except`. A slow or closed
    /// connection is skipped. Returns how many sends failed.
    pub fn broadcast_except(&self, except: &str, envelope: &Envelope) -> usize {
        let mut failed = 0;
        for (name, session) in self.sessions.iter().filter(|(name, _)| *name != except) {
            if let Err(e) = session.outbox.try_deliver(envelope.clone()) {
                debug!(user = %name, error = %e, "Broadcast skipped session");
                failed += 1;
            }
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::outbox::Outbound;
    use netchat_shared::MessageKind;
    use tokio::sync::mpsc;

    fn handle(name: &str) -> (SessionHandle, mpsc::Receiver<Outbound>) {
        let (outbox, rx) = Outbox::channel(8);
        let (deadline, _) = watch::channel(Instant::now());
        (SessionHandle::new(name, Uuid::new_v4(), outbox, deadline), rx)
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let mut registry = SessionRegistry::new();
        let (first, _rx1) = handle("alice");
        let first_id = first.session_id;
        registry.try_insert(first).unwrap();

        let (second, _rx2) = handle("alice");
        let rejected = registry.try_insert(second).unwrap_err();
        assert_eq!(rejected.username, "alice");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("alice").unwrap().session_id, first_id);
    }

    #[test]
    fn test_stale_session_cannot_remove_newer_one() {
        let mut registry = SessionRegistry::new();
        let (old, _rx1) = handle("alice");
        let old_id = old.session_id;
        registry.try_insert(old).unwrap();
        registry.remove("alice", old_id).unwrap();

        let (new, _rx2) = handle("alice");
        let new_id = new.session_id;
        registry.try_insert(new).unwrap();

        assert!(registry.remove("alice", old_id).is_none());
        assert!(registry.contains("alice"));
        assert!(registry.remove("alice", new_id).is_some());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_join_quit_sequences_track_net_membership() {
        // (user, join?) steps, replayed against a plain set as the model.
        let steps = [
            ("alice", true),
            ("bob", true),
            ("alice", true),
            ("carol", true),
            ("bob", false),
            ("bob", false),
            ("dave", false),
            ("bob", true),
            ("carol", false),
        ];

        let mut registry = SessionRegistry::new();
        let mut ids = std::collections::HashMap::new();
        let mut model = BTreeSet::new();
        let mut receivers = Vec::new();

        for (user, join) in steps {
            if join {
                let (session, rx) = handle(user);
                let id = session.session_id;
                receivers.push(rx);
                if registry.try_insert(session).is_ok() {
                    ids.insert(user, id);
                }
                model.insert(user.to_string());
            } else if let Some(id) = ids.remove(user) {
                registry.remove(user, id);
                model.remove(user);
            }

            let online: BTreeSet<String> = registry.usernames().into_iter().collect();
            assert_eq!(online, model);
            assert_eq!(registry.len(), model.len());
        }
        assert_eq!(registry.usernames(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_broadcast_skips_sender_and_dead_sessions() {
        let mut registry = SessionRegistry::new();
        let (alice, mut alice_rx) = handle("alice");
        let (bob, mut bob_rx) = handle("bob");
        let (carol, carol_rx) = handle("carol");
        registry.try_insert(alice).unwrap();
        registry.try_insert(bob).unwrap();
        registry.try_insert(carol).unwrap();
        drop(carol_rx);

        let notice = Envelope::system(MessageKind::Join, "[system] alice joined the chat");
        assert_eq!(registry.broadcast_except("alice", &notice), 1);

        assert!(matches!(bob_rx.try_recv(), Ok(Outbound::Envelope(e)) if e == notice));
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn test_refresh_deadline_is_observed() {
        let (outbox, _rx) = Outbox::channel(1);
        let start = Instant::now();
        let (tx, rx) = watch::channel(start);
        let session = SessionHandle::new("alice", Uuid::new_v4(), outbox, tx);

        let later = start + std::time::Duration::from_secs(50);
        session.refresh_deadline(later);
        assert_eq!(*rx.borrow(), later);

        session.close();
        assert!(rx.has_changed().is_err());
    }
}
