//! Text the server sends to clients.

use netchat_shared::{Envelope, UsernameError};
use netchat_store::{LogEntry, RankItem};

pub const OK: &str = "ok";
pub const USERNAME_TAKEN: &str = "username already exists";
pub const REGISTRATION_FAILED: &str = "registration failed, try again later";
pub const REGISTRATION_CLOSED: &str = "registration is closed";
pub const UNKNOWN_USERNAME: &str = "unknown username, please register";
pub const WRONG_PASSWORD: &str = "wrong password";
pub const ALREADY_LOGGED_IN: &str = "already logged in";
pub const LOGIN_FAILED: &str = "login failed, try again later";
pub const SERVER_FULL: &str = "server is full";
pub const TOO_MANY_ATTEMPTS: &str = "too many attempts, slow down";
pub const LOG_IN_FIRST: &str = "please log in first";
pub const MALFORMED: &str = "malformed message";
pub const MALFORMED_CREDENTIALS: &str = "malformed credentials, expected username/password";
pub const MISSING_RECIPIENT: &str = "private messages need a recipient";
pub const TRY_AGAIN: &str = "service unavailable, try again later";

pub fn invalid_username(err: &UsernameError) -> String {
    format!("invalid username: {err}")
}

pub fn unknown_user(name: &str) -> String {
    format!("unknown user: {name}")
}

pub fn invalid_count(raw: &str) -> String {
    format!("invalid history count: {raw:?}")
}

pub fn joined(name: &str) -> String {
    format!("[system] {name} joined the chat")
}

pub fn left(name: &str) -> String {
    format!("[system] {name} left the chat")
}

pub fn kicked(name: &str) -> String {
    format!("[system] {name} missed heartbeats and was kicked")
}

/// What a user sees for someone else's public message.
pub fn public_delivery(sender: &str, content: &str) -> String {
    format!("->{sender}:{content}")
}

/// What a recipient sees for a private message.
pub fn private_delivery(sender: &str, content: &str) -> String {
    format!("->{sender} (private):{content}")
}

pub fn online_users(names: &[String]) -> String {
    format!("online users ({}): {}", names.len(), names.join(" "))
}

pub fn rank_table(items: &[RankItem]) -> String {
    if items.is_empty() {
        return "rank list is empty".to_string();
    }
    let mut lines = vec!["rank list:".to_string()];
    for (i, item) in items.iter().enumerate() {
        lines.push(format!("{:>3}. {} ({})", i + 1, item.member, item.score));
    }
    lines.join("\n")
}

/// One history line per chat message; exit sentinels are skipped.
pub fn history(entries: &[LogEntry]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|entry| &entry.envelope)
        .filter(|envelope| !envelope.is_exit_signal())
        .map(history_line)
        .collect();
    if lines.is_empty() {
        return "no history yet".to_string();
    }
    lines.join("\n")
}

fn history_line(envelope: &Envelope) -> String {
    if envelope.is_system() {
        envelope.content.clone()
    } else if envelope.recipient.is_empty() {
        public_delivery(&envelope.sender, &envelope.content)
    } else {
        format!(
            "->{} to {}:{}",
            envelope.sender, envelope.recipient, envelope.content
        )
    }
}
