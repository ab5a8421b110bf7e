//! Directed-route path buffer.
//!
//! A directed route is a bounded sequence of egress port numbers, walked hop
//! by hop from the local port outward. Slot 0 is always 0 and stands for the
//! local start; it is never removed by [`DrPath::retract`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::MAXHOPS;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrPathError {
    #[error("directed route exceeds {MAXHOPS} hops")]
    Overflow,
    #[error("invalid directed route string: {0}")]
    Parse(String),
}

/// Mutable cursor of the discovery walk. Every successful [`extend`] during
/// a probe must be matched by a [`retract`] on every exit path.
///
/// [`extend`]: DrPath::extend
/// [`retract`]: DrPath::retract
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrPath {
    p: Vec<u8>,
}

impl Default for DrPath {
    fn default() -> Self {
        DrPath { p: vec![0] }
    }
}

impl DrPath {
    /// The zero path: the local port itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of hops, excluding the local start slot.
    pub fn cnt(&self) -> usize {
        self.p.len() - 1
    }

    /// All slots including the leading 0.
    pub fn hops(&self) -> &[u8] {
        &self.p
    }

    /// Append one egress port. On overflow the buffer is left untouched.
    /// Returns the new hop count.
    pub fn extend(&mut self, portnum: u8) -> Result<usize, DrPathError> {
        if self.cnt() >= MAXHOPS {
            return Err(DrPathError::Overflow);
        }
        self.p.push(portnum);
        Ok(self.cnt())
    }

    /// Drop the most recent hop. The local start slot stays.
    pub fn retract(&mut self) {
        if self.p.len() > 1 {
            self.p.pop();
        }
    }
}

impl fmt::Display for DrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for hop in &self.p {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{hop}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for DrPath {
    type Err = DrPathError;

    /// Parses decimal hops separated by commas, with or without the leading
    /// local-start 0 (`"0,1,7"` and `"1,7"` denote the same route).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(DrPath::new());
        }
        let mut p = Vec::new();
        for part in s.split(',') {
            let hop: u8 = part
                .trim()
                .parse()
                .map_err(|_| DrPathError::Parse(s.to_string()))?;
            p.push(hop);
        }
        if p.first() != Some(&0) {
            p.insert(0, 0);
        }
        if p.len() - 1 > MAXHOPS {
            return Err(DrPathError::Overflow);
        }
        Ok(DrPath { p })
    }
}
