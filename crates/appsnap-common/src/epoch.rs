//! Epoch descriptor.
//!
//! An epoch lists the data-format generations an application revision can
//! read and write. The shorthand `N` reads and writes `N`; `N*` additionally
//! reads `N-1`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid epoch {0:?}")]
pub struct EpochParseError(pub String);

/// Data-format epoch of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub read: Vec<u32>,
    pub write: Vec<u32>,
}

impl Default for Epoch {
    fn default() -> Self {
        Epoch {
            read: vec![0],
            write: vec![0],
        }
    }
}

impl FromStr for Epoch {
    type Err = EpochParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Epoch::default());
        }
        let (digits, star) = match s.strip_suffix('*') {
            Some(d) => (d, true),
            None => (s, false),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(EpochParseError(s.to_string()));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(EpochParseError(s.to_string()));
        }
        let n: u32 = digits
            .parse()
            .map_err(|_| EpochParseError(s.to_string()))?;

        let read = if star && n > 0 { vec![n - 1, n] } else { vec![n] };
        Ok(Epoch {
            read,
            write: vec![n],
        })
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [w] = self.write.as_slice() {
            if self.read.as_slice() == [*w] {
                return write!(f, "{}", w);
            }
            if *w > 0 && self.read.as_slice() == [*w - 1, *w] {
                return write!(f, "{}*", w);
            }
        }
        write!(f, "read={:?} write={:?}", self.read, self.write)
    }
}
