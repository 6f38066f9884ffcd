//! Person aggregate: the identity-bearing subset the search index is
//! derived from.
//!
//! A person owns zero or more previous names and employment records. None of
//! these are hard-deleted in normal operation; each carries a soft-delete
//! marker instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trn::Trn;

// ─── Names ───────────────────────────────────────────────────────────────────

/// A canonical (first, middle, last) name triple. Any field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonName {
  pub first:  String,
  pub middle: String,
  pub last:   String,
}

impl PersonName {
  pub fn new(
    first: impl Into<String>,
    middle: impl Into<String>,
    last: impl Into<String>,
  ) -> Self {
    Self { first: first.into(), middle: middle.into(), last: last.into() }
  }

  /// The non-empty parts joined with single spaces.
  pub fn full(&self) -> String {
    [&self.first, &self.middle, &self.last]
      .into_iter()
      .filter(|p| !p.is_empty())
      .map(String::as_str)
      .collect::<Vec<_>>()
      .join(" ")
  }

  pub fn is_empty(&self) -> bool {
    self.first.is_empty() && self.middle.is_empty() && self.last.is_empty()
  }
}

/// How a caller supplies a name on the write path.
///
/// Both forms pass through [`crate::name::NameNormalizer`] before they are
/// stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum NameInput {
  /// Free text to be split into first / middle / last.
  Full(String),
  /// Already-structured parts; only whitespace is tidied.
  Parts(PersonName),
}

// ─── Person ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
  pub person_id:                 Uuid,
  /// Globally unique and immutable once set.
  pub trn:                       Option<Trn>,
  pub name:                      PersonName,
  pub national_insurance_number: Option<String>,
  pub created_at:                DateTime<Utc>,
  pub deleted_at:                Option<DateTime<Utc>>,
}

impl Person {
  pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }
}

/// Where a new person's TRN comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrnRequest {
  /// Allocate one in the same unit of work as the insert.
  #[default]
  Allocate,
  /// The person already holds this TRN (e.g. a migrated record).
  Existing(Trn),
  /// Create the person without a TRN; one can be assigned later.
  Deferred,
}

/// Input to [`crate::store::PersonRepository::create_person`].
#[derive(Debug, Clone)]
pub struct NewPerson {
  pub trn:                       TrnRequest,
  pub name:                      NameInput,
  pub national_insurance_number: Option<String>,
}

impl NewPerson {
  /// Convenience constructor for a person that needs a TRN allocated.
  pub fn new(name: NameInput) -> Self {
    Self { trn: TrnRequest::Allocate, name, national_insurance_number: None }
  }
}

// ─── Previous names ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousName {
  pub previous_name_id: Uuid,
  pub person_id:        Uuid,
  pub name:             PersonName,
  pub created_at:       DateTime<Utc>,
  pub deleted_at:       Option<DateTime<Utc>>,
}

// ─── Employment ──────────────────────────────────────────────────────────────

/// An employment record imported from a periodic external extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employment {
  pub employment_id:             Uuid,
  pub person_id:                 Uuid,
  /// Natural key from the extract; re-imports upsert on it.
  pub key:                       String,
  pub postcode:                  Option<String>,
  pub email:                     Option<String>,
  /// The NI number the employer reported, which may differ from the one held
  /// on the person.
  pub national_insurance_number: Option<String>,
  pub updated_at:                DateTime<Utc>,
  pub deleted_at:                Option<DateTime<Utc>>,
}

/// Input to [`crate::store::PersonRepository::upsert_employment`].
#[derive(Debug, Clone)]
pub struct NewEmployment {
  pub person_id:                 Uuid,
  pub key:                       String,
  pub postcode:                  Option<String>,
  pub email:                     Option<String>,
  pub national_insurance_number: Option<String>,
}

impl NewEmployment {
  pub fn new(person_id: Uuid, key: impl Into<String>) -> Self {
    Self {
      person_id,
      key: key.into(),
      postcode: None,
      email: None,
      national_insurance_number: None,
    }
  }
}
