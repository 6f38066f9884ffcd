//! [`UnitOfWork`]: one `BEGIN IMMEDIATE` transaction carrying source writes,
//! TRN claims and the search-index resync they trigger.
//!
//! Immediate transactions take SQLite's write lock up front, which serialises
//! writers across connections and processes. That lock is what keeps two
//! resyncs of the same person from computing against stale snapshots, and
//! what makes the allocator's compare-and-swap claim exclusive.

use chrono::Utc;
use rusqlite::{Transaction, params};
use tracing::{debug, error, info, warn};
use trs_core::{
  attribute::{AttributeDiff, PersonSource, ResyncOutcome, desired_attributes, diff_attributes},
  name::NameNormalizer,
  person::{
    Employment, NameInput, NewEmployment, NewPerson, Person, PreviousName,
    TrnRequest,
  },
  synonym::{NameSynonymEntry, merge_entries},
  trn::{Trn, TrnRange},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{encode_attribute_type, encode_dt, encode_tags, encode_trn, encode_uuid},
  queries,
};

pub struct UnitOfWork<'c> {
  tx:             Transaction<'c>,
  normalizer:     &'c NameNormalizer,
  claim_attempts: u32,
}

impl<'c> UnitOfWork<'c> {
  pub(crate) fn new(
    tx: Transaction<'c>,
    normalizer: &'c NameNormalizer,
    claim_attempts: u32,
  ) -> Self {
    Self { tx, normalizer, claim_attempts: claim_attempts.max(1) }
  }

  pub(crate) fn commit(self) -> Result<()> {
    self.tx.commit()?;
    Ok(())
  }

  // ── TRN ranges ────────────────────────────────────────────────────────────

  pub fn provision_range(&mut self, from_trn: u32, to_trn: u32) -> Result<TrnRange> {
    let range = TrnRange::new(from_trn, to_trn)?;

    if let Some(existing) = queries::select_overlapping_range(&self.tx, from_trn, to_trn)? {
      return Err(Error::OverlappingRange { from_trn, to_trn, existing });
    }

    self.tx.execute(
      "INSERT INTO trn_ranges (from_trn, to_trn, next_trn, is_exhausted)
       VALUES (?1, ?2, ?3, ?4)",
      params![range.from_trn, range.to_trn, range.next_trn, range.is_exhausted],
    )?;

    info!(from_trn, to_trn, capacity = range.remaining(), "provisioned TRN range");
    Ok(range)
  }

  /// Claim the next TRN from the lowest unexhausted range.
  ///
  /// The claim is a compare-and-swap on `next_trn`: it only lands if the row
  /// still holds the value that was read. A lost race moves on to whatever
  /// range is now lowest, up to `claim_attempts` times.
  ///
  /// A claimed value already held by a person (stored with an existing TRN)
  /// stays consumed and the next one is claimed, so such values never block
  /// a range.
  pub fn allocate_trn(&mut self) -> Result<Trn> {
    let mut lost = 0;
    loop {
      if lost >= self.claim_attempts {
        return Err(Error::ClaimContention { attempts: lost });
      }

      let Some(range) = queries::select_lowest_active_range(&self.tx)? else {
        error!("no unexhausted TRN range remains; a new range must be provisioned");
        return Err(Error::RangeExhausted);
      };

      let Some((trn, claimed)) = range.claim() else {
        // Flag disagrees with the counter; settle it and look again.
        self.tx.execute(
          "UPDATE trn_ranges SET is_exhausted = 1
           WHERE from_trn = ?1 AND next_trn > to_trn",
          params![range.from_trn],
        )?;
        lost += 1;
        continue;
      };

      let changed = self.tx.execute(
        "UPDATE trn_ranges
         SET next_trn = ?1, is_exhausted = ?2
         WHERE from_trn = ?3 AND next_trn = ?4 AND is_exhausted = 0",
        params![claimed.next_trn, claimed.is_exhausted, range.from_trn, range.next_trn],
      )?;

      if changed != 1 {
        lost += 1;
        debug!(attempt = lost, from_trn = range.from_trn, "lost TRN claim race");
        continue;
      }

      if claimed.is_exhausted {
        warn!(
          from_trn = claimed.from_trn,
          to_trn = claimed.to_trn,
          "TRN range exhausted"
        );
      }

      if queries::trn_in_use(&self.tx, &encode_trn(trn))? {
        debug!(%trn, "skipping TRN already held by a person");
        continue;
      }

      debug!(%trn, from_trn = range.from_trn, "allocated TRN");
      return Ok(trn);
    }
  }

  // ── Persons ───────────────────────────────────────────────────────────────

  pub fn get_person(&self, person_id: Uuid) -> Result<Person> {
    queries::select_person(&self.tx, person_id)?.ok_or(Error::PersonNotFound(person_id))
  }

  fn live_person(&self, person_id: Uuid) -> Result<Person> {
    let person = self.get_person(person_id)?;
    if person.is_deleted() {
      return Err(Error::PersonDeleted(person_id));
    }
    Ok(person)
  }

  pub fn create_person(&mut self, input: NewPerson) -> Result<Person> {
    let trn = match input.trn {
      TrnRequest::Allocate => Some(self.allocate_trn()?),
      TrnRequest::Existing(trn) => {
        if queries::trn_in_use(&self.tx, &encode_trn(trn))? {
          return Err(Error::DuplicateTrn(trn));
        }
        Some(trn)
      }
      TrnRequest::Deferred => None,
    };

    let person = Person {
      person_id:                 Uuid::new_v4(),
      trn,
      name:                      self.normalizer.normalize(&input.name),
      national_insurance_number: tidy(input.national_insurance_number),
      created_at:                Utc::now(),
      deleted_at:                None,
    };

    self.tx.execute(
      "INSERT INTO persons (
         person_id, trn, first_name, middle_name, last_name,
         national_insurance_number, created_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        encode_uuid(person.person_id),
        trn.map(encode_trn),
        person.name.first,
        person.name.middle,
        person.name.last,
        person.national_insurance_number,
        encode_dt(person.created_at),
      ],
    )?;

    info!(person_id = %person.person_id, trn = ?trn.map(|t| t.to_string()), "created person");
    self.resync(person.person_id)?;
    Ok(person)
  }

  /// Allocate a TRN for a person created without one.
  pub fn assign_trn(&mut self, person_id: Uuid) -> Result<Trn> {
    let person = self.live_person(person_id)?;
    if let Some(trn) = person.trn {
      return Err(Error::TrnAlreadyAssigned { person_id, trn });
    }

    let trn = self.allocate_trn()?;
    self.tx.execute(
      "UPDATE persons SET trn = ?1 WHERE person_id = ?2 AND trn IS NULL",
      params![encode_trn(trn), encode_uuid(person_id)],
    )?;

    info!(%person_id, %trn, "assigned TRN");
    self.resync(person_id)?;
    Ok(trn)
  }

  pub fn update_person_name(&mut self, person_id: Uuid, name: &NameInput) -> Result<Person> {
    let mut person = self.live_person(person_id)?;
    person.name = self.normalizer.normalize(name);

    self.tx.execute(
      "UPDATE persons SET first_name = ?1, middle_name = ?2, last_name = ?3
       WHERE person_id = ?4",
      params![
        person.name.first,
        person.name.middle,
        person.name.last,
        encode_uuid(person_id),
      ],
    )?;

    self.resync(person_id)?;
    Ok(person)
  }

  pub fn set_national_insurance_number(
    &mut self,
    person_id: Uuid,
    nino: Option<String>,
  ) -> Result<Person> {
    let mut person = self.live_person(person_id)?;
    person.national_insurance_number = tidy(nino);

    self.tx.execute(
      "UPDATE persons SET national_insurance_number = ?1 WHERE person_id = ?2",
      params![person.national_insurance_number, encode_uuid(person_id)],
    )?;

    self.resync(person_id)?;
    Ok(person)
  }

  /// Soft-delete a person. Deleting an already deleted person is a no-op.
  pub fn delete_person(&mut self, person_id: Uuid) -> Result<()> {
    let person = self.get_person(person_id)?;
    if !person.is_deleted() {
      self.tx.execute(
        "UPDATE persons SET deleted_at = ?1 WHERE person_id = ?2",
        params![encode_dt(Utc::now()), encode_uuid(person_id)],
      )?;
      info!(%person_id, "deleted person");
    }
    self.resync(person_id)?;
    Ok(())
  }

  // ── Previous names ────────────────────────────────────────────────────────

  pub fn add_previous_name(&mut self, person_id: Uuid, name: &NameInput) -> Result<PreviousName> {
    self.live_person(person_id)?;

    let previous = PreviousName {
      previous_name_id: Uuid::new_v4(),
      person_id,
      name: self.normalizer.normalize(name),
      created_at: Utc::now(),
      deleted_at: None,
    };

    self.tx.execute(
      "INSERT INTO previous_names (
         previous_name_id, person_id, first_name, middle_name, last_name, created_at
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
      params![
        encode_uuid(previous.previous_name_id),
        encode_uuid(person_id),
        previous.name.first,
        previous.name.middle,
        previous.name.last,
        encode_dt(previous.created_at),
      ],
    )?;

    self.resync(person_id)?;
    Ok(previous)
  }

  pub fn delete_previous_name(&mut self, previous_name_id: Uuid) -> Result<()> {
    let previous = queries::select_previous_name(&self.tx, previous_name_id)?
      .ok_or(Error::PreviousNameNotFound(previous_name_id))?;

    if previous.deleted_at.is_none() {
      self.tx.execute(
        "UPDATE previous_names SET deleted_at = ?1 WHERE previous_name_id = ?2",
        params![encode_dt(Utc::now()), encode_uuid(previous_name_id)],
      )?;
    }
    self.resync(previous.person_id)?;
    Ok(())
  }

  // ── Employment ────────────────────────────────────────────────────────────

  pub fn upsert_employment(&mut self, input: NewEmployment) -> Result<Employment> {
    self.live_person(input.person_id)?;

    let postcode = tidy(input.postcode);
    let email = tidy(input.email);
    let nino = tidy(input.national_insurance_number);

    let existing = queries::select_employment_by_key(&self.tx, &input.key)?;
    let employment = match existing {
      Some(e) if e.person_id != input.person_id => {
        return Err(Error::EmploymentKeyConflict { key: input.key, person_id: e.person_id });
      }
      Some(e)
        if e.deleted_at.is_none()
          && e.postcode == postcode
          && e.email == email
          && e.national_insurance_number == nino =>
      {
        // Re-import of an unchanged record.
        e
      }
      Some(e) => {
        let updated = Employment {
          postcode,
          email,
          national_insurance_number: nino,
          updated_at: Utc::now(),
          deleted_at: None,
          ..e
        };
        self.tx.execute(
          "UPDATE employments
           SET postcode = ?1, email = ?2, national_insurance_number = ?3,
               updated_at = ?4, deleted_at = NULL
           WHERE employment_id = ?5",
          params![
            updated.postcode,
            updated.email,
            updated.national_insurance_number,
            encode_dt(updated.updated_at),
            encode_uuid(updated.employment_id),
          ],
        )?;
        updated
      }
      None => {
        let created = Employment {
          employment_id: Uuid::new_v4(),
          person_id: input.person_id,
          key: input.key,
          postcode,
          email,
          national_insurance_number: nino,
          updated_at: Utc::now(),
          deleted_at: None,
        };
        self.tx.execute(
          "INSERT INTO employments (
             employment_id, person_id, employment_key, postcode, email,
             national_insurance_number, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
          params![
            encode_uuid(created.employment_id),
            encode_uuid(created.person_id),
            created.key,
            created.postcode,
            created.email,
            created.national_insurance_number,
            encode_dt(created.updated_at),
          ],
        )?;
        created
      }
    };

    self.resync(employment.person_id)?;
    Ok(employment)
  }

  pub fn delete_employment(&mut self, key: &str) -> Result<()> {
    let employment = queries::select_employment_by_key(&self.tx, key)?
      .ok_or_else(|| Error::EmploymentNotFound(key.to_owned()))?;

    if employment.deleted_at.is_none() {
      self.tx.execute(
        "UPDATE employments SET deleted_at = ?1 WHERE employment_id = ?2",
        params![encode_dt(Utc::now()), encode_uuid(employment.employment_id)],
      )?;
    }
    self.resync(employment.person_id)?;
    Ok(())
  }

  // ── Search index ──────────────────────────────────────────────────────────

  /// Bring the person's stored attributes in line with current source state.
  pub fn resync(&mut self, person_id: Uuid) -> Result<ResyncOutcome> {
    let person = self.get_person(person_id)?;
    let previous_names = queries::select_previous_names(&self.tx, person_id)?;
    let employments = queries::select_employments(&self.tx, person_id)?;

    let desired = desired_attributes(self.normalizer, PersonSource {
      person:         &person,
      previous_names: &previous_names,
      employments:    &employments,
    });
    let stored = queries::select_attributes(&self.tx, person_id)?;

    let diff = diff_attributes(&stored, &desired);
    let outcome = diff.outcome();
    if !diff.is_empty() {
      self.apply(person_id, diff)?;
    }

    debug!(
      %person_id,
      inserted = outcome.inserted,
      updated = outcome.updated,
      deleted = outcome.deleted,
      "resynced person search attributes"
    );
    Ok(outcome)
  }

  /// Deletes run first so a slot freed in this patch can be reused by an
  /// insert without tripping the unique slot indexes.
  fn apply(&mut self, person_id: Uuid, diff: AttributeDiff) -> Result<()> {
    let person_id_str = encode_uuid(person_id);

    for attribute_id in diff.deletes {
      self.tx.execute(
        "DELETE FROM person_search_attributes WHERE attribute_id = ?1",
        params![encode_uuid(attribute_id)],
      )?;
    }

    for (attribute_id, d) in diff.updates {
      self.tx.execute(
        "UPDATE person_search_attributes
         SET attribute_value = ?1, tags = ?2
         WHERE attribute_id = ?3",
        params![d.attribute_value, encode_tags(&d.tags)?, encode_uuid(attribute_id)],
      )?;
    }

    for d in diff.inserts {
      self.tx.execute(
        "INSERT INTO person_search_attributes (
           attribute_id, person_id, attribute_type, attribute_value, tags, attribute_key
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
          encode_uuid(Uuid::new_v4()),
          person_id_str,
          encode_attribute_type(d.attribute_type),
          d.attribute_value,
          encode_tags(&d.tags)?,
          d.attribute_key,
        ],
      )?;
    }

    Ok(())
  }

  // ── Synonyms ──────────────────────────────────────────────────────────────

  /// Replace the persisted synonym list and return it as stored. Entries
  /// whose names differ only by case are merged first, so the returned list
  /// is exactly what a later `open` loads.
  pub fn replace_synonyms(
    &mut self,
    entries: &[NameSynonymEntry],
  ) -> Result<Vec<NameSynonymEntry>> {
    let merged = merge_entries(entries);

    self.tx.execute("DELETE FROM name_synonyms", [])?;
    for entry in &merged {
      self.tx.execute(
        "INSERT INTO name_synonyms (name, synonyms) VALUES (?1, ?2)",
        params![entry.name, serde_json::to_string(&entry.synonyms)?],
      )?;
    }

    info!(
      entries = entries.len(),
      persisted = merged.len(),
      "replaced name synonym list"
    );
    queries::select_synonyms(&self.tx)
  }
}

/// Trim a free-text value; blank becomes `None`.
fn tidy(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_owned())
    .filter(|v| !v.is_empty())
}
