//! Store traits for TRN allocation, the person write path and the search
//! index.
//!
//! The traits are implemented by storage backends (e.g. `trs-store-sqlite`).
//! Person-creation workflows, importers and matching features depend on these
//! abstractions, not on any concrete backend.

use std::{collections::BTreeSet, future::Future};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  attribute::{AttributeType, PersonSearchAttribute, ResyncOutcome},
  person::{
    Employment, NameInput, NewEmployment, NewPerson, Person, PreviousName,
  },
  synonym::NameSynonymEntry,
  trn::{Trn, TrnRange},
};

/// Totals from a full index rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReindexSummary {
  pub persons:  usize,
  pub inserted: usize,
  pub updated:  usize,
  pub deleted:  usize,
}

impl ReindexSummary {
  pub fn record(&mut self, outcome: ResyncOutcome) {
    self.persons += 1;
    self.inserted += outcome.inserted;
    self.updated += outcome.updated;
    self.deleted += outcome.deleted;
  }
}

// ─── TRN allocation ──────────────────────────────────────────────────────────

/// Issues unique TRNs from provisioned ranges.
///
/// Allocation must be safe under any number of concurrent callers, across
/// processes. Within one range, issued values are dense and increasing.
pub trait TrnAllocator: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Register a new range `[from_trn, to_trn]`. Ranges must be disjoint.
  fn provision_range(
    &self,
    from_trn: u32,
    to_trn: u32,
  ) -> impl Future<Output = Result<TrnRange, Self::Error>> + Send + '_;

  /// All ranges ordered by `from_trn`.
  fn list_ranges(
    &self,
  ) -> impl Future<Output = Result<Vec<TrnRange>, Self::Error>> + Send + '_;

  /// Claim the next TRN from the lowest unexhausted range.
  ///
  /// Fails only when no unexhausted range remains; transient contention is
  /// retried internally.
  fn allocate(&self) -> impl Future<Output = Result<Trn, Self::Error>> + Send + '_;
}

// ─── Person write path ───────────────────────────────────────────────────────

/// Writes to identity-bearing source data.
///
/// Every mutating method normalises names and resynchronises the person's
/// search attributes in the same atomic unit of work as the write. If the
/// resync fails, the write fails with it.
pub trait PersonRepository: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Person ────────────────────────────────────────────────────────────

  /// Insert a person, allocating a TRN when none is supplied.
  fn create_person(
    &self,
    input: NewPerson,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  /// Retrieve a person by id, including soft-deleted ones.
  fn get_person(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Option<Person>, Self::Error>> + Send + '_;

  /// Allocate and store a TRN for a person that has none.
  fn assign_trn(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Trn, Self::Error>> + Send + '_;

  fn update_person_name(
    &self,
    person_id: Uuid,
    name: NameInput,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  fn set_national_insurance_number(
    &self,
    person_id: Uuid,
    nino: Option<String>,
  ) -> impl Future<Output = Result<Person, Self::Error>> + Send + '_;

  /// Soft-delete a person. Their search attributes are removed.
  fn delete_person(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Previous names ────────────────────────────────────────────────────

  fn add_previous_name(
    &self,
    person_id: Uuid,
    name: NameInput,
  ) -> impl Future<Output = Result<PreviousName, Self::Error>> + Send + '_;

  /// Soft-delete a previous name.
  fn delete_previous_name(
    &self,
    previous_name_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Live previous names of a person, oldest first.
  fn list_previous_names(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PreviousName>, Self::Error>> + Send + '_;

  // ── Employment ────────────────────────────────────────────────────────

  /// Insert or update an employment record by its natural key.
  ///
  /// Re-importing an unchanged record is a no-op for the index. A record
  /// previously soft-deleted is revived.
  fn upsert_employment(
    &self,
    input: NewEmployment,
  ) -> impl Future<Output = Result<Employment, Self::Error>> + Send + '_;

  /// Soft-delete the employment record with natural key `key`.
  fn delete_employment<'a>(
    &'a self,
    key: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Live employment records of a person.
  fn list_employments(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Employment>, Self::Error>> + Send + '_;
}

// ─── Search index ────────────────────────────────────────────────────────────

/// The denormalised person search index and its synchroniser.
pub trait PersonSearchIndex: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Recompute a person's attributes from current source state and apply the
  /// minimal patch. A second call with no intervening change writes nothing.
  fn resync(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<ResyncOutcome, Self::Error>> + Send + '_;

  /// Resync every person, e.g. after the synonym list or particle
  /// configuration changed.
  fn resync_all(
    &self,
  ) -> impl Future<Output = Result<ReindexSummary, Self::Error>> + Send + '_;

  /// Ids of live persons holding an attribute of `attribute_type` equal to
  /// `value` once normalised for that type.
  fn find_by_attribute<'a>(
    &'a self,
    attribute_type: AttributeType,
    value: &'a str,
  ) -> impl Future<Output = Result<BTreeSet<Uuid>, Self::Error>> + Send + 'a;

  /// Stored attribute rows of a person.
  fn person_attributes(
    &self,
    person_id: Uuid,
  ) -> impl Future<Output = Result<Vec<PersonSearchAttribute>, Self::Error>> + Send + '_;

  /// Persist a new synonym reference list and swap it into the live
  /// dictionary. Existing attributes are not recomputed; call
  /// [`PersonSearchIndex::resync_all`] for that.
  fn replace_synonyms(
    &self,
    entries: Vec<NameSynonymEntry>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
