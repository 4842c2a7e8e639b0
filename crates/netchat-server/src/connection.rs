//! Per-connection tasks: the login state machine and, once a session is
//! established, the receiver that turns frames into dispatch events.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use netchat_shared::constants::PUBLIC_STREAM;
use netchat_shared::types::{broadcast_group, inbox_group, inbox_stream};
use netchat_shared::{read_envelope, Envelope, FrameError, MessageKind, Username};
use netchat_store::StartAt;

use crate::dispatch::{JoinOutcome, QuitReason};
use crate::error::ServerError;
use crate::notice;
use crate::outbox::{spawn_writer, Outbox};
use crate::registry::SessionHandle;
use crate::server::ServerContext;
use crate::worker::ConsumerWorker;

/// A logged-in session as seen by its receiver.
struct Authenticated {
    username: String,
    session_id: Uuid,
    deadline: watch::Receiver<Instant>,
}

/// Drive one client connection from accept to close.
pub async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: ServerContext) {
    let (read_half, write_half) = stream.into_split();
    let (outbox, _writer) = spawn_writer(write_half, peer);
    let mut reader = BufReader::new(read_half);

    let Some(session) = authenticate(&mut reader, &outbox, peer, &ctx).await else {
        outbox.close();
        debug!(peer = %peer, "Connection closed before login");
        return;
    };

    ConsumerWorker::inbox(&session.username, session.session_id, ctx.logs.clone(), outbox.clone())
        .spawn();
    ConsumerWorker::broadcast(&session.username, session.session_id, ctx.logs.clone(), outbox.clone())
        .spawn();

    receive(&mut reader, &outbox, session, &ctx).await;
}

// ----------------------------------------------------------------------
// Unauthenticated
// ----------------------------------------------------------------------

/// Loop until the client logs in, gives up, or idles past the login timeout.
async fn authenticate<R>(
    reader: &mut R,
    outbox: &Outbox,
    peer: SocketAddr,
    ctx: &ServerContext,
) -> Option<Authenticated>
where
    R: AsyncRead + Unpin,
{
    loop {
        // Cancelling a half-read frame is fine here: on timeout the
        // connection is dropped.
        let envelope = match tokio::time::timeout(ctx.config.login_timeout, read_envelope(reader)).await {
            Err(_) => {
                debug!(peer = %peer, "Login timed out");
                return None;
            }
            Ok(Ok(envelope)) => envelope,
            Ok(Err(e)) if e.is_recoverable() => {
                let _ = outbox.notify(MessageKind::Login, notice::MALFORMED);
                continue;
            }
            Ok(Err(FrameError::Closed)) => return None,
            Ok(Err(e)) => {
                debug!(peer = %peer, error = %e, "Read failed before login");
                return None;
            }
        };

        match envelope.kind {
            MessageKind::Register => {
                if !ctx.auth_limiter.check(peer.ip()).await {
                    let _ = outbox.notify(MessageKind::Register, notice::TOO_MANY_ATTEMPTS);
                    continue;
                }
                let reply = match ctx.auth.register(&envelope).await {
                    Ok(username) => {
                        info!(user = %username, peer = %peer, "New account registered");
                        notice::OK.to_string()
                    }
                    Err(rejection) => rejection.client_message(),
                };
                let _ = outbox.notify(MessageKind::Register, reply);
            }
            MessageKind::Login => {
                if !ctx.auth_limiter.check(peer.ip()).await {
                    let _ = outbox.notify(MessageKind::Login, notice::TOO_MANY_ATTEMPTS);
                    continue;
                }
                let username = match ctx.auth.login(&envelope).await {
                    Ok(username) => username,
                    Err(rejection) => {
                        debug!(peer = %peer, reason = %rejection, "Login rejected");
                        let _ = outbox.notify(MessageKind::Login, rejection.client_message());
                        continue;
                    }
                };
                match start_session(&username, outbox, ctx).await {
                    Ok(Some(session)) => {
                        info!(user = %username, peer = %peer, "Logged in");
                        return Some(session);
                    }
                    // The dispatch loop already told the client why.
                    Ok(None) => continue,
                    Err(ServerError::DispatchClosed) => return None,
                    Err(e) => {
                        warn!(user = %username, error = %e, "Could not start session");
                        let _ = outbox.notify(MessageKind::Login, notice::LOGIN_FAILED);
                    }
                }
            }
            // Clients may start heartbeating before they log in.
            MessageKind::HeartMsg => {}
            _ => {
                let _ = outbox.notify(envelope.kind, notice::LOG_IN_FIRST);
            }
        }
    }
}

/// Prepare the user's consumer groups and claim the username with the
/// dispatch loop. `None` means the claim was refused.
async fn start_session(
    username: &Username,
    outbox: &Outbox,
    ctx: &ServerContext,
) -> Result<Option<Authenticated>, ServerError> {
    let name = username.as_str();
    // The inbox keeps everything sent while the user was away; the broadcast
    // group only starts at the moment the user first logs in.
    ctx.logs
        .ensure_group(&inbox_stream(name), inbox_group(), StartAt::Beginning)?;
    ctx.logs
        .ensure_group(PUBLIC_STREAM, &broadcast_group(name), StartAt::End)?;

    let session_id = Uuid::new_v4();
    let (deadline_tx, deadline) = watch::channel(Instant::now() + ctx.config.heartbeat_timeout);
    let handle = SessionHandle::new(name, session_id, outbox.clone(), deadline_tx);

    match ctx.dispatch.join(handle).await? {
        JoinOutcome::Joined => Ok(Some(Authenticated {
            username: name.to_string(),
            session_id,
            deadline,
        })),
        JoinOutcome::AlreadyOnline | JoinOutcome::ServerFull => Ok(None),
    }
}

// ----------------------------------------------------------------------
// Authenticated
// ----------------------------------------------------------------------

enum Inbound {
    Frame(Result<Envelope, FrameError>),
    TimedOut,
    /// The dispatch loop ended the session.
    SessionClosed,
}

/// Forward frames to the dispatch loop until the connection or the session
/// ends.
async fn receive<R>(reader: &mut R, outbox: &Outbox, session: Authenticated, ctx: &ServerContext)
where
    R: AsyncRead + Unpin,
{
    let Authenticated {
        username,
        session_id,
        mut deadline,
    } = session;

    loop {
        let inbound = {
            // `read_envelope` is not cancel-safe, so the same read future is
            // kept across deadline refreshes.
            let read = read_envelope(reader);
            tokio::pin!(read);
            loop {
                let expires = *deadline.borrow_and_update();
                tokio::select! {
                    result = &mut read => break Inbound::Frame(result),
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            break Inbound::SessionClosed;
                        }
                    }
                    _ = tokio::time::sleep_until(expires) => break Inbound::TimedOut,
                }
            }
        };

        let reason = match inbound {
            Inbound::Frame(Ok(envelope)) => {
                if ctx.dispatch.submit(&username, session_id, envelope).await.is_err() {
                    return;
                }
                continue;
            }
            Inbound::Frame(Err(e)) if e.is_recoverable() => {
                let _ = outbox.notify(MessageKind::PublicMsg, notice::MALFORMED);
                continue;
            }
            Inbound::SessionClosed => {
                debug!(user = %username, "Session closed by server");
                return;
            }
            Inbound::TimedOut => {
                info!(user = %username, "Heartbeat timeout");
                QuitReason::HeartbeatTimeout
            }
            Inbound::Frame(Err(FrameError::Closed)) => QuitReason::Disconnected,
            Inbound::Frame(Err(e)) => {
                debug!(user = %username, error = %e, "Read failed");
                QuitReason::Disconnected
            }
        };

        let _ = ctx.dispatch.quit(&username, session_id, reason).await;
        return;
    }
}
