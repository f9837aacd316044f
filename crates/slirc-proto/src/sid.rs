//! Server and user identifiers.
//!
//! A SID is three characters: a digit followed by two uppercase letters or
//! digits. A UID is the owning server's SID followed by six more such
//! characters, so the owner of any user can be read off its identifier.

use std::fmt;
use std::str::FromStr;

use crate::error::MessageParseError;

/// Length of a server identifier.
pub const SID_LEN: usize = 3;

/// Length of a user identifier.
pub const UID_LEN: usize = 9;

/// A network-unique server identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(String);

impl ServerId {
    /// Wrap a SID string without validating it.
    pub fn new(sid: impl Into<String>) -> Self {
        Self(sid.into())
    }

    /// Get the inner SID string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The server owning a user identifier.
    ///
    /// Returns `None` if `uid` is not a well-formed UID.
    #[must_use]
    pub fn from_uid(uid: &str) -> Option<Self> {
        is_valid_uid(uid).then(|| Self(uid[..SID_LEN].to_string()))
    }

    /// Whether this identifier is well-formed.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_sid(&self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerId {
    type Err = MessageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_valid_sid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(MessageParseError::InvalidServerId(s.to_string()))
        }
    }
}

impl AsRef<str> for ServerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_id_char(b: u8) -> bool {
    b.is_ascii_digit() || b.is_ascii_uppercase()
}

/// Check the `[0-9][A-Z0-9][A-Z0-9]` SID format.
pub fn is_valid_sid(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == SID_LEN && b[0].is_ascii_digit() && is_id_char(b[1]) && is_id_char(b[2])
}

/// Check the UID format: a SID followed by six identifier characters.
pub fn is_valid_uid(s: &str) -> bool {
    s.len() == UID_LEN
        && is_valid_sid(&s[..SID_LEN])
        && s.as_bytes()[SID_LEN..].iter().all(|&b| is_id_char(b))
}
