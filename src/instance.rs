//! Container instance identifiers.

use std::fmt;
use std::str::FromStr;

/// Length of a full Docker container ID.
pub const FULL_ID_LEN: usize = 64;
/// Length of the abbreviated form Docker prints in listings.
pub const SHORT_ID_LEN: usize = 12;

/// Identifier of one launched database container.
///
/// Always holds the full 64-character form; [`short`](Self::short) is for
/// logs only. Runtime calls use the full form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    /// Full identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 12-character prefix, as shown by `docker ps`.
    pub fn short(&self) -> &str {
        &self.0[..SHORT_ID_LEN]
    }

    /// Whether `prefix` names this instance (full or abbreviated form).
    pub fn matches(&self, prefix: &str) -> bool {
        prefix.len() >= SHORT_ID_LEN && self.0.starts_with(prefix)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Why launcher output could not be parsed as an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidInstanceId {
    #[error("launcher produced no identifier")]
    Empty,
    #[error("expected one identifier, got {0} tokens")]
    MultipleTokens(usize),
    #[error("identifier has length {0}, expected {FULL_ID_LEN}")]
    WrongLength(usize),
    #[error("identifier contains non-hex characters")]
    NotHex,
}

impl FromStr for InstanceId {
    type Err = InvalidInstanceId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let token = match tokens.as_slice() {
            [] => return Err(InvalidInstanceId::Empty),
            [one] => *one,
            many => return Err(InvalidInstanceId::MultipleTokens(many.len())),
        };
        if token.len() != FULL_ID_LEN {
            return Err(InvalidInstanceId::WrongLength(token.len()));
        }
        if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidInstanceId::NotHex);
        }
        Ok(Self(token.to_ascii_lowercase()))
    }
}
