//! # netchat-shared
//!
//! Types shared by the netchat server and its clients: the message
//! envelope, the length-prefixed wire framing, username rules and the
//! naming of durable streams.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod types;

pub use error::{FrameError, NetchatError, PasswordError, ProtocolError, UsernameError};
pub use frame::{read_envelope, write_envelope};
pub use protocol::{Envelope, MessageKind};
pub use types::Username;
