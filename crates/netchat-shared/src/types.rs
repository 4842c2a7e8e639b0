use serde::{Deserialize, Serialize};

use crate::constants::{INBOX_GROUP, USERNAME_MAX_LEN, USERNAME_MIN_LEN};
use crate::error::UsernameError;

/// A validated username: 1-32 characters from `[A-Za-z0-9_-]`.
///
/// The restricted alphabet guarantees that `:` never appears inside a name,
/// which keeps the stream names built below unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, UsernameError> {
        let len = raw.chars().count();
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
            return Err(UsernameError::Length {
                min: USERNAME_MIN_LEN,
                max: USERNAME_MAX_LEN,
            });
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(UsernameError::InvalidCharacter(bad));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Username {
    type Error = UsernameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Username> for String {
    fn from(name: Username) -> Self {
        name.0
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Stream names. The broadcast log is `PUBLIC_STREAM`.

/// A user's private-message inbox.
pub fn inbox_stream(user: &str) -> String {
    format!("inbox:{user}")
}

/// Conversation history between two users. The pair is ordered so both
/// directions share one stream.
pub fn history_stream(a: &str, b: &str) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("history:{lo}:{hi}")
}

/// Consumer group on a user's inbox.
pub fn inbox_group() -> &'static str {
    INBOX_GROUP
}

/// Consumer group a user reads the broadcast log with. One group per user
/// keeps every user's read cursor independent.
pub fn broadcast_group(user: &str) -> String {
    format!("public:{user}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::PUBLIC_STREAM;

    #[test]
    fn test_valid_usernames() {
        let longest = "z".repeat(32);
        for name in ["alice", "Bob_42", "x", "a-b", longest.as_str()] {
            assert!(Username::parse(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_usernames() {
        assert!(matches!(
            Username::parse(""),
            Err(UsernameError::Length { .. })
        ));
        assert!(matches!(
            Username::parse(&"z".repeat(33)),
            Err(UsernameError::Length { .. })
        ));
        assert_eq!(
            Username::parse("al:ice"),
            Err(UsernameError::InvalidCharacter(':'))
        );
        assert_eq!(
            Username::parse("a/b"),
            Err(UsernameError::InvalidCharacter('/'))
        );
        assert_eq!(
            Username::parse("bad name"),
            Err(UsernameError::InvalidCharacter(' '))
        );
    }

    #[test]
    fn test_history_stream_is_direction_independent() {
        assert_eq!(history_stream("alice", "bob"), "history:alice:bob");
        assert_eq!(history_stream("bob", "alice"), "history:alice:bob");
    }

    #[test]
    fn test_stream_names_do_not_collide() {
        assert_ne!(history_stream("a", "b-c"), history_stream("a-b", "c"));
        assert_eq!(inbox_stream("bob"), "inbox:bob");
        assert_ne!(inbox_stream("public"), PUBLIC_STREAM);
        assert_ne!(broadcast_group("bob"), inbox_group());
    }

    #[test]
    fn test_username_serde_validates() {
        let ok: Username = serde_json::from_str("\"carol\"").unwrap();
        assert_eq!(ok.as_str(), "carol");
        assert!(serde_json::from_str::<Username>("\"no spaces\"").is_err());
    }
}
