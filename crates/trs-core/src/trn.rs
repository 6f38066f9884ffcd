//! Teacher Reference Numbers and the ranges they are issued from.
//!
//! A TRN is a 7-digit identifier assigned once per person. TRNs are handed out
//! from administratively provisioned, disjoint [`TrnRange`]s; each range
//! tracks the next value to issue and moves one-way from
//! [`RangeState::Active`] to [`RangeState::Exhausted`].

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Trn ─────────────────────────────────────────────────────────────────────

/// A Teacher Reference Number.
///
/// Always rendered as a zero-padded 7-digit decimal string.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct Trn(u32);

impl Trn {
  pub const MAX: u32 = 9_999_999;

  pub fn new(value: u32) -> Result<Self> {
    if value > Self::MAX {
      return Err(Error::TrnOutOfBounds(value as u64));
    }
    Ok(Self(value))
  }

  pub fn value(self) -> u32 { self.0 }
}

impl fmt::Display for Trn {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:07}", self.0)
  }
}

impl FromStr for Trn {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    if s.len() != 7 || !s.bytes().all(|b| b.is_ascii_digit()) {
      return Err(Error::InvalidTrn(s.to_owned()));
    }
    let value = s.parse::<u32>().map_err(|_| Error::InvalidTrn(s.to_owned()))?;
    Ok(Self(value))
  }
}

impl TryFrom<String> for Trn {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<Trn> for String {
  fn from(trn: Trn) -> Self { trn.to_string() }
}

// ─── TrnRange ────────────────────────────────────────────────────────────────

/// Lifecycle of a range. The only transition is `Active → Exhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeState {
  Active,
  Exhausted,
}

/// One contiguous block of issuable TRNs, keyed by `from_trn`.
///
/// Invariant: `from_trn <= next_trn <= to_trn + 1` and
/// `is_exhausted == (next_trn > to_trn)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrnRange {
  pub from_trn:     u32,
  pub to_trn:       u32,
  pub next_trn:     u32,
  pub is_exhausted: bool,
}

impl TrnRange {
  /// A freshly provisioned range with nothing issued yet.
  pub fn new(from_trn: u32, to_trn: u32) -> Result<Self> {
    if from_trn > to_trn {
      return Err(Error::InvalidRange { from: from_trn, to: to_trn });
    }
    if to_trn > Trn::MAX {
      return Err(Error::TrnOutOfBounds(to_trn as u64));
    }
    Ok(Self { from_trn, to_trn, next_trn: from_trn, is_exhausted: false })
  }

  pub fn state(&self) -> RangeState {
    if self.is_exhausted {
      RangeState::Exhausted
    } else {
      RangeState::Active
    }
  }

  /// Number of TRNs still available in this range.
  pub fn remaining(&self) -> u32 {
    if self.is_exhausted {
      0
    } else {
      self.to_trn + 1 - self.next_trn
    }
  }

  /// Number of TRNs already handed out.
  pub fn issued(&self) -> u32 { self.next_trn - self.from_trn }

  pub fn overlaps(&self, from_trn: u32, to_trn: u32) -> bool {
    self.from_trn <= to_trn && from_trn <= self.to_trn
  }

  /// Claim the next value, returning it together with the successor state.
  ///
  /// The successor is exhausted when the claimed value was the last one.
  /// Returns `None` if the range is already exhausted.
  pub fn claim(&self) -> Option<(Trn, TrnRange)> {
    if self.is_exhausted || self.next_trn > self.to_trn {
      return None;
    }
    let next_trn = self.next_trn + 1;
    let successor = TrnRange {
      next_trn,
      is_exhausted: next_trn > self.to_trn,
      ..self.clone()
    };
    Some((Trn(self.next_trn), successor))
  }
}
