//! Error type for `trs-store-sqlite`.

use rusqlite::ErrorCode;
use thiserror::Error;
use trs_core::trn::Trn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] trs_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("undecodable column value: {0}")]
  Decode(String),

  /// No unexhausted TRN range remains. Needs a new range to be provisioned.
  #[error("all TRN ranges are exhausted")]
  RangeExhausted,

  /// Every claim attempt lost a race. Transient; the unit of work is retried.
  #[error("TRN claim lost {attempts} consecutive races")]
  ClaimContention { attempts: u32 },

  #[error("TRN range {from_trn}..={to_trn} overlaps range starting at {existing}")]
  OverlappingRange { from_trn: u32, to_trn: u32, existing: u32 },

  #[error("TRN {0} is already assigned to another person")]
  DuplicateTrn(Trn),

  #[error("person {person_id} already has TRN {trn}")]
  TrnAlreadyAssigned { person_id: Uuid, trn: Trn },

  #[error("person not found: {0}")]
  PersonNotFound(Uuid),

  #[error("person {0} is deleted")]
  PersonDeleted(Uuid),

  #[error("previous name not found: {0}")]
  PreviousNameNotFound(Uuid),

  #[error("employment not found: {0:?}")]
  EmploymentNotFound(String),

  #[error("employment key {key:?} belongs to person {person_id}")]
  EmploymentKeyConflict { key: String, person_id: Uuid },
}

impl Error {
  /// Whether retrying the whole unit of work may succeed: lock contention
  /// with another connection or a lost claim race.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::ClaimContention { .. } => true,
      Self::Sqlite(e) => is_busy(e),
      Self::Database(tokio_rusqlite::Error::Rusqlite(e)) => is_busy(e),
      _ => false,
    }
  }
}

fn is_busy(e: &rusqlite::Error) -> bool {
  matches!(
    e.sqlite_error_code(),
    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
  )
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
