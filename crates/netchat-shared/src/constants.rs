/// Default chat TCP listen port
pub const DEFAULT_CHAT_PORT: u16 = 8888;

/// Default HTTP status API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum framed payload size in bytes (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Length of the big-endian frame length prefix
pub const FRAME_HEADER_LEN: usize = 4;

/// Seconds a session may stay silent before it is kicked
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 50;

/// Retained entries per durable stream
pub const STREAM_MAX_LEN: usize = 1000;

/// Shared broadcast inbox
pub const PUBLIC_STREAM: &str = "chat:public";

/// Consumer group used on every private inbox
pub const INBOX_GROUP: &str = "inbox";

/// Sender marker carried by exit sentinels. Never a valid username.
pub const EXIT_SIGNAL_SENDER: &str = "[exit]";

/// Username length bounds
pub const USERNAME_MIN_LEN: usize = 1;
pub const USERNAME_MAX_LEN: usize = 32;

/// Separator between username and password in credential payloads
pub const CREDENTIAL_SEPARATOR: char = '/';

/// BLAKE3 derive-key context for password digests
pub const KDF_CONTEXT_PASSWORD: &str = "netchat-password-v1";

/// Random salt length in bytes
pub const PASSWORD_SALT_LEN: usize = 16;
