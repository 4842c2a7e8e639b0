use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetchatError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Username error: {0}")]
    Username(#[from] UsernameError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Password error: {0}")]
    Password(#[from] PasswordError),
}

/// Failures of the length-prefixed framing layer.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The peer closed the stream cleanly between frames.
    #[error("Connection closed by peer")]
    Closed,

    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A complete frame arrived but its payload is not a valid envelope.
    #[error("Malformed envelope: {0}")]
    Decode(serde_json::Error),

    #[error("Failed to encode envelope: {0}")]
    Encode(serde_json::Error),
}

impl FrameError {
    /// True when the stream is still aligned on a frame boundary and the
    /// reader may keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FrameError::Decode(_))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username must be between {min} and {max} characters")]
    Length { min: usize, max: usize },

    #[error("username may only contain letters, digits, '_' and '-'")]
    InvalidCharacter(char),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Credentials must look like 'username/password'")]
    MalformedCredentials,

    #[error("Private messages need a recipient")]
    MissingRecipient,

    #[error("Invalid history count: {0}")]
    InvalidCount(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PasswordError {
    #[error("Password must not be empty")]
    Empty,

    #[error("Stored password record is malformed")]
    MalformedRecord,
}
