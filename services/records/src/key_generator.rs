use serde::{Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound on key length, matching the `users.key` column width
pub const MAX_KEY_LEN: usize = 254;

/// Rejected user key
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidKey {
    #[error("key is empty")]
    Empty,
    #[error("key is longer than {} bytes", MAX_KEY_LEN)]
    TooLong,
    #[error("key contains forbidden character {0:?}")]
    ForbiddenChar(char),
}

/// Opaque identity of a user record and the name of its storage directory.
///
/// A `UserKey` only ever holds ASCII letters, digits, `-` and `_`, so it can
/// be joined onto a filesystem path or embedded in a URL without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserKey(String);

impl UserKey {
    /// Validate an externally supplied key
    pub fn parse(raw: &str) -> Result<Self, InvalidKey> {
        if raw.is_empty() {
            return Err(InvalidKey::Empty);
        }
        if raw.len() > MAX_KEY_LEN {
            return Err(InvalidKey::TooLong);
        }
        if let Some(c) = raw.chars().find(|c| !is_key_char(*c)) {
            return Err(InvalidKey::ForbiddenChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for UserKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Source of fresh user keys
#[cfg_attr(test, mockall::automock)]
pub trait KeyGenerator: Send + Sync {
    fn new_key(&self) -> UserKey;
}

/// Random 128-bit keys rendered as 32 lowercase hex characters
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidKeyGenerator;

impl KeyGenerator for UuidKeyGenerator {
    fn new_key(&self) -> UserKey {
        UserKey(Uuid::new_v4().simple().to_string())
    }
}
