//! Error types for `trs-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid TRN {0:?}: expected exactly 7 digits")]
  InvalidTrn(String),

  #[error("TRN {0} is outside the 7-digit range")]
  TrnOutOfBounds(u64),

  #[error("invalid TRN range {from}..={to}: start is after end")]
  InvalidRange { from: u32, to: u32 },

  #[error("unknown attribute type: {0:?}")]
  UnknownAttributeType(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
