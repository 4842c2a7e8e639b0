use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{CREDENTIAL_SEPARATOR, EXIT_SIGNAL_SENDER};
use crate::error::ProtocolError;

/// Every kind of envelope exchanged between clients, the server and the
/// durable logs. Encoded on the wire as its declaration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum MessageKind {
    Register = 0,
    Login = 1,
    Join = 2,
    Quit = 3,
    CheckUser = 4,
    CheckRankList = 5,
    PrivateMsg = 6,
    PublicMsg = 7,
    HeartMsg = 8,
    PublicHistory = 9,
    PrivateHistory = 10,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        MessageKind::Register,
        MessageKind::Login,
        MessageKind::Join,
        MessageKind::Quit,
        MessageKind::CheckUser,
        MessageKind::CheckRankList,
        MessageKind::PrivateMsg,
        MessageKind::PublicMsg,
        MessageKind::HeartMsg,
        MessageKind::PublicHistory,
        MessageKind::PrivateHistory,
    ];
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(ProtocolError::UnknownKind(value))
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as u8
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The unit of communication on the wire and in the durable logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating username; empty for system messages.
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
    pub kind: MessageKind,
    /// Addressee, only meaningful for private messages and private history.
    #[serde(default)]
    pub recipient: String,
}

impl Envelope {
    pub fn new(
        sender: impl Into<String>,
        content: impl Into<String>,
        kind: MessageKind,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            kind,
            recipient: recipient.into(),
        }
    }

    /// A server-originated message with no sender.
    pub fn system(kind: MessageKind, content: impl Into<String>) -> Self {
        Self::new(String::new(), content, kind, String::new())
    }

    pub fn public(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(sender, content, MessageKind::PublicMsg, String::new())
    }

    pub fn private(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(sender, content, MessageKind::PrivateMsg, recipient)
    }

    pub fn heartbeat(sender: impl Into<String>) -> Self {
        Self::new(sender, String::new(), MessageKind::HeartMsg, String::new())
    }

    /// Sentinel appended to a user's logs to stop the consumer workers of
    /// one specific session.
    pub fn exit_signal(username: impl Into<String>, session_id: Uuid) -> Self {
        Self::new(
            EXIT_SIGNAL_SENDER,
            session_id.to_string(),
            MessageKind::Quit,
            username,
        )
    }

    pub fn is_system(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn is_exit_signal(&self) -> bool {
        self.kind == MessageKind::Quit && self.sender == EXIT_SIGNAL_SENDER
    }

    /// Session id carried by an exit sentinel.
    pub fn exit_session(&self) -> Option<Uuid> {
        if !self.is_exit_signal() {
            return None;
        }
        Uuid::parse_str(&self.content).ok()
    }

    /// Split a `username/password` payload carried by Register and Login.
    pub fn credentials(&self) -> Result<(&str, &str), ProtocolError> {
        let (username, password) = self
            .content
            .split_once(CREDENTIAL_SEPARATOR)
            .ok_or(ProtocolError::MalformedCredentials)?;
        if username.is_empty() || password.is_empty() {
            return Err(ProtocolError::MalformedCredentials);
        }
        Ok((username, password))
    }

    /// Number of entries requested by a history query.
    pub fn history_count(&self) -> Result<usize, ProtocolError> {
        self.content
            .trim()
            .parse::<usize>()
            .map_err(|_| ProtocolError::InvalidCount(self.content.clone()))
    }

    /// Serialize to the JSON payload used by frames and log entries
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}
