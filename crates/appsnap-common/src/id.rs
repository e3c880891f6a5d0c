//! Snapshot set and revision identity types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a snapshot set.
///
/// Allocated outside this workspace; a valid set ID is always positive.
/// Zero is used by queries to mean "any set".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SetId(pub u64);

impl SetId {
    /// Whether this is a real set ID (non-zero).
    pub fn is_set(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SetId {
    fn from(id: u64) -> Self {
        SetId(id)
    }
}

/// Errors parsing a revision string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid revision {0:?}")]
pub struct RevisionParseError(pub String);

/// Application revision.
///
/// Positive values are store revisions and render as plain numbers.
/// Negative values are local revisions and render as `x<N>`.
/// Zero means the revision is unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Revision(pub i64);

impl Revision {
    /// A store revision.
    pub fn store(n: i64) -> Self {
        Revision(n)
    }

    /// A locally installed revision (`x<n>`).
    pub fn local(n: i64) -> Self {
        Revision(-n)
    }

    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }

    pub fn is_local(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "unset"),
            n if n < 0 => write!(f, "x{}", n.unsigned_abs()),
            n => write!(f, "{}", n),
        }
    }
}

impl FromStr for Revision {
    type Err = RevisionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || RevisionParseError(s.to_string());
        if s.is_empty() || s == "unset" {
            return Ok(Revision(0));
        }
        if let Some(local) = s.strip_prefix('x') {
            let n: i64 = local.parse().map_err(|_| err())?;
            if n <= 0 {
                return Err(err());
            }
            return Ok(Revision(-n));
        }
        if !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        s.parse::<i64>().map(Revision).map_err(|_| err())
    }
}

impl TryFrom<String> for Revision {
    type Error = RevisionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Revision> for String {
    fn from(rev: Revision) -> Self {
        rev.to_string()
    }
}
