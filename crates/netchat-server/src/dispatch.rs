//! The dispatch loop.
//!
//! A single task drains the event queue and handles one event at a time.
//! It exclusively owns the [`SessionRegistry`], so membership changes and
//! broadcast-log appends are totally ordered without locks. Handlers never
//! await: sends to clients use `try_deliver` and store calls are single
//! short statements, so one slow client cannot stall the loop.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use netchat_shared::constants::PUBLIC_STREAM;
use netchat_shared::types::{history_stream, inbox_stream};
use netchat_shared::{Envelope, MessageKind};

use crate::error::ServerError;
use crate::log_store::LogStore;
use crate::notice;
use crate::registry::{SessionHandle, SessionRegistry};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitReason {
    /// The client sent a Quit message.
    Requested,
    /// The connection was closed or reset.
    Disconnected,
    /// No heartbeat arrived before the read deadline.
    HeartbeatTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyOnline,
    ServerFull,
}

/// Everything that can change server state goes through one of these.
#[derive(Debug)]
pub enum ServerEvent {
    /// Claim the session's username. The loop answers the client ("ok" or a
    /// rejection) before replying here.
    Join {
        session: SessionHandle,
        reply: oneshot::Sender<JoinOutcome>,
    },
    /// A message read from an authenticated connection.
    Client {
        username: String,
        session_id: Uuid,
        envelope: Envelope,
    },
    Quit {
        username: String,
        session_id: Uuid,
        reason: QuitReason,
    },
    /// Snapshot of online usernames, in order.
    Online(oneshot::Sender<Vec<String>>),
}

/// Producer side of the event queue. Sends wait for room rather than drop.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<ServerEvent>,
}

impl DispatchHandle {
    async fn send(&self, event: ServerEvent) -> Result<(), ServerError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| ServerError::DispatchClosed)
    }

    pub async fn join(&self, session: SessionHandle) -> Result<JoinOutcome, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServerEvent::Join { session, reply }).await?;
        rx.await.map_err(|_| ServerError::DispatchClosed)
    }

    pub async fn submit(
        &self,
        username: &str,
        session_id: Uuid,
        envelope: Envelope,
    ) -> Result<(), ServerError> {
        self.send(ServerEvent::Client {
            username: username.to_string(),
            session_id,
            envelope,
        })
        .await
    }

    pub async fn quit(
        &self,
        username: &str,
        session_id: Uuid,
        reason: QuitReason,
    ) -> Result<(), ServerError> {
        self.send(ServerEvent::Quit {
            username: username.to_string(),
            session_id,
            reason,
        })
        .await
    }

    pub async fn online_users(&self) -> Result<Vec<String>, ServerError> {
        let (reply, rx) = oneshot::channel();
        self.send(ServerEvent::Online(reply)).await?;
        rx.await.map_err(|_| ServerError::DispatchClosed)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub heartbeat_timeout: Duration,
    /// 0 means unlimited.
    pub max_sessions: usize,
}

pub struct Dispatcher {
    registry: SessionRegistry,
    logs: LogStore,
    storage: Storage,
    settings: DispatchSettings,
}

/// Start the dispatch loop with a queue of `capacity` events.
pub fn spawn_dispatcher(dispatcher: Dispatcher, capacity: usize) -> (DispatchHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let task = tokio::spawn(dispatcher.run(rx));
    (DispatchHandle { tx }, task)
}

impl Dispatcher {
    pub fn new(logs: LogStore, storage: Storage, settings: DispatchSettings) -> Self {
        Self {
            registry: SessionRegistry::new(),
            logs,
            storage,
            settings,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<ServerEvent>) {
        info!("Dispatch loop started");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        info!("Dispatch loop stopped");
    }

    pub fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Join { session, reply } => {
                let outcome = self.join(session);
                let _ = reply.send(outcome);
            }
            ServerEvent::Client {
                username,
                session_id,
                envelope,
            } => self.client_message(&username, session_id, envelope),
            ServerEvent::Quit {
                username,
                session_id,
                reason,
            } => self.quit(&username, session_id, reason),
            ServerEvent::Online(reply) => {
                let _ = reply.send(self.registry.usernames());
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    fn join(&mut self, session: SessionHandle) -> JoinOutcome {
        if self.registry.contains(&session.username) {
            debug!(user = %session.username, "Login rejected, already online");
            let _ = session
                .outbox
                .notify(MessageKind::Login, notice::ALREADY_LOGGED_IN);
            return JoinOutcome::AlreadyOnline;
        }
        let max = self.settings.max_sessions;
        if max > 0 && self.registry.len() >= max {
            warn!(user = %session.username, max, "Login rejected, server full");
            let _ = session.outbox.notify(MessageKind::Login, notice::SERVER_FULL);
            return JoinOutcome::ServerFull;
        }

        // "ok" must be the first thing the new session sees.
        let _ = session.outbox.notify(MessageKind::Login, notice::OK);

        let username = session.username.clone();
        let session_id = session.session_id;
        if self.registry.try_insert(session).is_err() {
            return JoinOutcome::AlreadyOnline;
        }
        info!(
            user = %username,
            session = %session_id,
            online = self.registry.len(),
            "Session joined"
        );

        self.bump_rank(&username);
        self.announce(&username, MessageKind::Join, notice::joined(&username));
        JoinOutcome::Joined
    }

    fn quit(&mut self, username: &str, session_id: Uuid, reason: QuitReason) {
        let Some(session) = self.registry.remove(username, session_id) else {
            debug!(user = %username, session = %session_id, "Quit for an inactive session ignored");
            return;
        };
        info!(
            user = %username,
            session = %session_id,
            ?reason,
            online = self.registry.len(),
            connected_secs = (chrono::Utc::now() - session.joined_at).num_seconds(),
            "Session left"
        );

        if reason == QuitReason::HeartbeatTimeout {
            self.announce(username, MessageKind::Quit, notice::kicked(username));
        }
        self.announce(username, MessageKind::Quit, notice::left(username));
        session.close();

        // Unblock this session's consumer workers, which are parked on
        // reads of these two logs.
        let sentinel = Envelope::exit_signal(username, session_id);
        for stream in [inbox_stream(username), PUBLIC_STREAM.to_string()] {
            if let Err(e) = self.logs.append(&stream, &sentinel) {
                error!(user = %username, stream = %stream, error = %e, "Failed to publish exit signal");
            }
        }
    }

    /// Record a system notice in the broadcast log and push it straight to
    /// every other online session.
    fn announce(&self, except: &str, kind: MessageKind, text: String) {
        let envelope = Envelope::system(kind, text);
        if let Err(e) = self.logs.append(PUBLIC_STREAM, &envelope) {
            warn!(error = %e, "Failed to record system notice");
        }
        self.registry.broadcast_except(except, &envelope);
    }

    // ------------------------------------------------------------------
    // Client messages
    // ------------------------------------------------------------------

    fn client_message(&mut self, username: &str, session_id: Uuid, envelope: Envelope) {
        if self.registry.get_session(username, session_id).is_none() {
            debug!(user = %username, kind = %envelope.kind, "Dropping event from an inactive session");
            return;
        }

        match envelope.kind {
            MessageKind::Register | MessageKind::Login => {
                self.reply(username, envelope.kind, notice::ALREADY_LOGGED_IN);
            }
            MessageKind::Join => {
                debug!(user = %username, "Ignoring Join from an active session");
            }
            MessageKind::Quit => self.quit(username, session_id, QuitReason::Requested),
            MessageKind::CheckUser => {
                let text = notice::online_users(&self.registry.usernames());
                self.reply(username, MessageKind::CheckUser, text);
            }
            MessageKind::CheckRankList => self.rank_list(username),
            MessageKind::PrivateMsg => self.private_message(username, envelope),
            MessageKind::PublicMsg => self.public_message(username, envelope.content),
            MessageKind::HeartMsg => {
                if let Some(session) = self.registry.get(username) {
                    session.refresh_deadline(Instant::now() + self.settings.heartbeat_timeout);
                }
            }
            MessageKind::PublicHistory => self.public_history(username, &envelope),
            MessageKind::PrivateHistory => self.private_history(username, &envelope),
        }
    }

    fn public_message(&self, sender: &str, content: String) {
        let envelope = Envelope::public(sender, content);
        match self.logs.append(PUBLIC_STREAM, &envelope) {
            Ok(_) => self.bump_rank(sender),
            Err(e) => {
                warn!(user = %sender, error = %e, "Failed to append public message");
                self.reply(sender, MessageKind::PublicMsg, notice::TRY_AGAIN);
            }
        }
    }

    fn private_message(&self, sender: &str, envelope: Envelope) {
        let recipient = envelope.recipient.as_str();
        if recipient.is_empty() {
            self.reply(sender, MessageKind::PrivateMsg, notice::MISSING_RECIPIENT);
            return;
        }
        if !self.recipient_exists(sender, recipient, MessageKind::PrivateMsg) {
            return;
        }

        let message = Envelope::private(sender, recipient, envelope.content.as_str());
        if let Err(e) = self.logs.append(&inbox_stream(recipient), &message) {
            warn!(user = %sender, to = %recipient, error = %e, "Failed to append private message");
            self.reply(sender, MessageKind::PrivateMsg, notice::TRY_AGAIN);
            return;
        }
        let history = history_stream(sender, recipient);
        if let Err(e) = self.logs.append(&history, &message) {
            warn!(stream = %history, error = %e, "Failed to record private history");
        }
        self.bump_rank(sender);
    }

    fn rank_list(&self, username: &str) {
        match self.storage.with(|db| db.rank_descending()) {
            Ok(items) => {
                self.reply(username, MessageKind::CheckRankList, notice::rank_table(&items));
            }
            Err(e) => {
                warn!(error = %e, "Failed to read rank list");
                self.reply(username, MessageKind::CheckRankList, notice::TRY_AGAIN);
            }
        }
    }

    fn public_history(&self, username: &str, request: &Envelope) {
        let Some(count) = self.history_count(username, request) else {
            return;
        };
        self.send_history(username, MessageKind::PublicHistory, PUBLIC_STREAM, count);
    }

    fn private_history(&self, username: &str, request: &Envelope) {
        let counterpart = request.recipient.as_str();
        if counterpart.is_empty() {
            self.reply(username, MessageKind::PrivateHistory, notice::MISSING_RECIPIENT);
            return;
        }
        let Some(count) = self.history_count(username, request) else {
            return;
        };
        if !self.recipient_exists(username, counterpart, MessageKind::PrivateHistory) {
            return;
        }
        let stream = history_stream(username, counterpart);
        self.send_history(username, MessageKind::PrivateHistory, &stream, count);
    }

    fn send_history(&self, username: &str, kind: MessageKind, stream: &str, count: usize) {
        match self.logs.history(stream, count) {
            Ok(entries) => self.reply(username, kind, notice::history(&entries)),
            Err(e) => {
                warn!(stream, error = %e, "Failed to read history");
                self.reply(username, kind, notice::TRY_AGAIN);
            }
        }
    }

    /// Requested history length, capped at what a log can retain.
    fn history_count(&self, username: &str, request: &Envelope) -> Option<usize> {
        match request.history_count() {
            Ok(count) => {
                let cap = self.logs.max_len();
                Some(if cap > 0 { count.min(cap) } else { count })
            }
            Err(_) => {
                self.reply(username, request.kind, notice::invalid_count(&request.content));
                None
            }
        }
    }

    /// Whether `name` is a registered user. Replies to `asker` when it is
    /// not, or when the store cannot tell.
    fn recipient_exists(&self, asker: &str, name: &str, kind: MessageKind) -> bool {
        match self.storage.with(|db| db.user_exists(name)) {
            Ok(true) => true,
            Ok(false) => {
                debug!(user = %asker, target = %name, "Unknown user");
                self.reply(asker, kind, notice::unknown_user(name));
                false
            }
            Err(e) => {
                warn!(user = %asker, error = %e, "Credential store lookup failed");
                self.reply(asker, kind, notice::TRY_AGAIN);
                false
            }
        }
    }

    fn bump_rank(&self, username: &str) {
        if let Err(e) = self.storage.with(|db| db.increment_rank(username)) {
            warn!(user = %username, error = %e, "Failed to update rank");
        }
    }

    fn reply(&self, username: &str, kind: MessageKind, text: impl Into<String>) {
        let Some(session) = self.registry.get(username) else {
            return;
        };
        if let Err(e) = session.outbox.notify(kind, text) {
            debug!(user = %username, error = %e, "Reply dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::watch;

    use super::*;
    use crate::outbox::{Outbound, Outbox};

    struct TestSession {
        id: Uuid,
        rx: mpsc::Receiver<Outbound>,
        deadline: watch::Receiver<Instant>,
    }

    impl TestSession {
        /// Contents of every queued envelope; `None` marks a close.
        fn drain(&mut self) -> Vec<Option<String>> {
            let mut out = Vec::new();
            while let Ok(item) = self.rx.try_recv() {
                out.push(match item {
                    Outbound::Envelope(envelope)
                    | Outbound::Confirmed { envelope, .. } => Some(envelope.content),
                    Outbound::Close => None,
                });
            }
            out
        }

        fn texts(&mut self) -> Vec<String> {
            self.drain().into_iter().flatten().collect()
        }
    }

    fn dispatcher() -> Dispatcher {
        dispatcher_with(0)
    }

    fn dispatcher_with(max_sessions: usize) -> Dispatcher {
        let storage = Storage::in_memory().unwrap();
        for name in ["alice", "bob", "dave"] {
            storage
                .with(|db| db.insert_user(name, "salt$digest"))
                .unwrap();
        }
        let logs = LogStore::new(storage.clone(), 100);
        Dispatcher::new(
            logs,
            storage,
            DispatchSettings {
                heartbeat_timeout: Duration::from_secs(50),
                max_sessions,
            },
        )
    }

    fn join(d: &mut Dispatcher, name: &str) -> (JoinOutcome, TestSession) {
        let (outbox, rx) = Outbox::channel(64);
        let (deadline_tx, deadline) = watch::channel(Instant::now());
        let id = Uuid::new_v4();
        let (reply, mut reply_rx) = oneshot::channel();
        d.handle_event(ServerEvent::Join {
            session: SessionHandle::new(name, id, outbox, deadline_tx),
            reply,
        });
        let outcome = reply_rx.try_recv().unwrap();
        (outcome, TestSession { id, rx, deadline })
    }

    fn send(d: &mut Dispatcher, name: &str, session: &TestSession, envelope: Envelope) {
        d.handle_event(ServerEvent::Client {
            username: name.to_string(),
            session_id: session.id,
            envelope,
        });
    }

    /// Every entry of `stream`, exit signals included, read through a
    /// throwaway consumer group.
    fn contents(d: &Dispatcher, stream: &str) -> Vec<Envelope> {
        let group = Uuid::new_v4().to_string();
        let mut out = Vec::new();
        while let Some(entry) = d
            .storage
            .with(|db| db.claim_next(stream, &group, "inspect"))
            .unwrap()
        {
            out.push(entry.envelope);
        }
        out
    }

    #[tokio::test]
    async fn test_join_sends_ok_first_and_announces() {
        let mut d = dispatcher();
        let (outcome, mut alice) = join(&mut d, "alice");
        assert_eq!(outcome, JoinOutcome::Joined);
        assert_eq!(alice.texts(), vec!["ok"]);

        let (_, mut bob) = join(&mut d, "bob");
        assert_eq!(bob.texts(), vec!["ok"]);
        assert_eq!(alice.texts(), vec!["[system] bob joined the chat"]);

        let public = contents(&d, PUBLIC_STREAM);
        assert_eq!(public.len(), 2);
        assert!(public.iter().all(|e| e.is_system()));
        assert_eq!(
            d.storage.with(|db| db.rank_score("alice")).unwrap(),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_second_login_is_rejected() {
        let mut d = dispatcher();
        let (_, _alice) = join(&mut d, "alice");
        let (outcome, mut again) = join(&mut d, "alice");
        assert_eq!(outcome, JoinOutcome::AlreadyOnline);
        assert_eq!(again.texts(), vec!["already logged in"]);
        assert_eq!(d.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut d = dispatcher_with(1);
        let (_, _alice) = join(&mut d, "alice");
        let (outcome, mut bob) = join(&mut d, "bob");
        assert_eq!(outcome, JoinOutcome::ServerFull);
        assert_eq!(bob.texts(), vec!["server is full"]);
    }

    #[tokio::test]
    async fn test_public_message_goes_to_log_not_direct() {
        let mut d = dispatcher();
        let (_, alice) = join(&mut d, "alice");
        let (_, mut bob) = join(&mut d, "bob");
        bob.drain();

        send(&mut d, "alice", &alice, Envelope::public("mallory", "hi"));

        // Delivery happens through consumer workers tailing the log.
        assert!(bob.texts().is_empty());
        let last = contents(&d, PUBLIC_STREAM).pop().unwrap();
        assert_eq!(last, Envelope::public("alice", "hi"));
        assert_eq!(
            d.storage.with(|db| db.rank_score("alice")).unwrap(),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_private_message_to_unknown_user() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        alice.drain();

        send(&mut d, "alice", &alice, Envelope::private("alice", "carol", "psst"));

        assert_eq!(alice.texts(), vec!["unknown user: carol"]);
        assert!(contents(&d, &inbox_stream("carol")).is_empty());
        assert!(contents(&d, &history_stream("alice", "carol")).is_empty());
        assert_eq!(
            d.storage.with(|db| db.rank_score("alice")).unwrap(),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_private_message_lands_in_inbox_and_history() {
        let mut d = dispatcher();
        let (_, alice) = join(&mut d, "alice");

        send(&mut d, "alice", &alice, Envelope::private("alice", "dave", "psst"));
        let expected = Envelope::private("alice", "dave", "psst");
        assert_eq!(contents(&d, "inbox:dave"), vec![expected.clone()]);
        assert_eq!(contents(&d, "history:alice:dave"), vec![expected]);
    }

    #[tokio::test]
    async fn test_quit_closes_and_publishes_exit_signals() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        let (_, mut bob) = join(&mut d, "bob");
        alice.drain();
        bob.drain();

        send(&mut d, "bob", &bob, Envelope::system(MessageKind::Quit, ""));

        assert_eq!(bob.drain(), vec![None]);
        assert!(bob.deadline.has_changed().is_err());
        assert_eq!(alice.texts(), vec!["[system] bob left the chat"]);
        assert_eq!(d.registry.usernames(), vec!["alice"]);

        let inbox = contents(&d, "inbox:bob");
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].exit_session(), Some(bob.id));
        let public = contents(&d, PUBLIC_STREAM);
        assert_eq!(public.last().unwrap().exit_session(), Some(bob.id));
    }

    #[tokio::test]
    async fn test_timeout_kick_notice_precedes_leave() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        let (_, bob) = join(&mut d, "bob");
        alice.drain();

        d.handle_event(ServerEvent::Quit {
            username: "bob".into(),
            session_id: bob.id,
            reason: QuitReason::HeartbeatTimeout,
        });

        assert_eq!(
            alice.texts(),
            vec![
                "[system] bob missed heartbeats and was kicked",
                "[system] bob left the chat"
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_session_events_are_ignored() {
        let mut d = dispatcher();
        let (_, old) = join(&mut d, "alice");
        d.handle_event(ServerEvent::Quit {
            username: "alice".into(),
            session_id: old.id,
            reason: QuitReason::Disconnected,
        });
        let (_, mut new) = join(&mut d, "alice");
        new.drain();

        // A late quit and a late message from the first session.
        d.handle_event(ServerEvent::Quit {
            username: "alice".into(),
            session_id: old.id,
            reason: QuitReason::Disconnected,
        });
        send(&mut d, "alice", &old, Envelope::public("alice", "ghost"));

        assert_eq!(d.registry.usernames(), vec!["alice"]);
        assert!(new.drain().is_empty());
        assert!(contents(&d, PUBLIC_STREAM)
            .iter()
            .all(|e| e.content != "ghost"));
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_deadline() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        let before = *alice.deadline.borrow_and_update();

        send(&mut d, "alice", &alice, Envelope::heartbeat("alice"));

        assert!(alice.deadline.has_changed().unwrap());
        let after = *alice.deadline.borrow_and_update();
        assert!(after >= before + Duration::from_secs(49));
        assert_eq!(alice.texts(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_check_user_and_rank_list() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        let (_, bob) = join(&mut d, "bob");
        send(&mut d, "bob", &bob, Envelope::public("bob", "one"));
        alice.drain();

        send(&mut d, "alice", &alice, Envelope::system(MessageKind::CheckUser, ""));
        send(&mut d, "alice", &alice, Envelope::system(MessageKind::CheckRankList, ""));

        let texts = alice.texts();
        assert_eq!(texts[0], "online users (2): alice bob");
        let bob_at = texts[1].find("bob").unwrap();
        let alice_at = texts[1].find("alice").unwrap();
        assert!(bob_at < alice_at, "higher score first: {}", texts[1]);
    }

    #[tokio::test]
    async fn test_history_is_oldest_first_and_bounded() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        for word in ["one", "two", "three"] {
            send(&mut d, "alice", &alice, Envelope::private("alice", "bob", word));
        }
        alice.drain();

        send(
            &mut d,
            "alice",
            &alice,
            Envelope::new("alice", "2", MessageKind::PrivateHistory, "bob"),
        );
        send(
            &mut d,
            "alice",
            &alice,
            Envelope::new("alice", "many", MessageKind::PublicHistory, ""),
        );
        send(
            &mut d,
            "alice",
            &alice,
            Envelope::new("alice", "5", MessageKind::PrivateHistory, "carol"),
        );

        let texts = alice.texts();
        assert_eq!(texts[0], "->alice to bob:two\n->alice to bob:three");
        assert_eq!(texts[1], "invalid history count: \"many\"");
        assert_eq!(texts[2], "unknown user: carol");
    }

    #[tokio::test]
    async fn test_public_history_ignores_exit_signals() {
        let mut d = dispatcher();
        let (_, mut alice) = join(&mut d, "alice");
        send(&mut d, "alice", &alice, Envelope::public("alice", "one"));
        for _ in 0..2 {
            let (_, bob) = join(&mut d, "bob");
            d.handle_event(ServerEvent::Quit {
                username: "bob".into(),
                session_id: bob.id,
                reason: QuitReason::Requested,
            });
        }
        assert!(contents(&d, PUBLIC_STREAM)
            .last()
            .unwrap()
            .is_exit_signal());
        alice.drain();

        send(
            &mut d,
            "alice",
            &alice,
            Envelope::new("alice", "2", MessageKind::PublicHistory, ""),
        );
        assert_eq!(
            alice.texts(),
            vec!["[system] bob joined the chat\n[system] bob left the chat"]
        );
    }

    #[tokio::test]
    async fn test_online_snapshot() {
        let mut d = dispatcher();
        let (_, _bob) = join(&mut d, "bob");
        let (_, _alice) = join(&mut d, "alice");

        let (reply, mut rx) = oneshot::channel();
        d.handle_event(ServerEvent::Online(reply));
        assert_eq!(rx.try_recv().unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_spawned_loop_serves_handle() {
        let (handle, task) = spawn_dispatcher(dispatcher(), 8);
        assert!(handle.online_users().await.unwrap().is_empty());

        let (outbox, _rx) = Outbox::channel(8);
        let (deadline, _) = watch::channel(Instant::now());
        let id = Uuid::new_v4();
        let outcome = handle
            .join(SessionHandle::new("alice", id, outbox, deadline))
            .await
            .unwrap();
        assert_eq!(outcome, JoinOutcome::Joined);
        assert_eq!(handle.online_users().await.unwrap(), vec!["alice"]);

        handle.quit("alice", id, QuitReason::Requested).await.unwrap();
        assert!(handle.online_users().await.unwrap().is_empty());

        drop(handle);
        task.await.unwrap();
    }
}
