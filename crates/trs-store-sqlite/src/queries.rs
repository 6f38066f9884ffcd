//! Read queries shared by the read path and by [`crate::UnitOfWork`].
//!
//! Each function takes a plain [`rusqlite::Connection`]; a transaction derefs
//! to one, so the same code reads inside and outside a unit of work.

use std::collections::BTreeSet;

use rusqlite::{Connection, OptionalExtension as _, params};
use trs_core::{
  attribute::{AttributeType, PersonSearchAttribute},
  person::{Employment, Person, PreviousName},
  synonym::NameSynonymEntry,
  trn::TrnRange,
};
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    RawAttribute, RawEmployment, RawPerson, RawPreviousName, RawRange,
    decode_uuid, encode_attribute_type, encode_uuid,
  },
};

// ─── Ranges ──────────────────────────────────────────────────────────────────

pub fn select_ranges(conn: &Connection) -> Result<Vec<TrnRange>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM trn_ranges ORDER BY from_trn",
    RawRange::COLUMNS
  ))?;
  let rows = stmt
    .query_map([], RawRange::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows.into_iter().map(RawRange::into_range).collect())
}

/// The unexhausted range with the smallest `from_trn`.
pub fn select_lowest_active_range(conn: &Connection) -> Result<Option<TrnRange>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {} FROM trn_ranges WHERE is_exhausted = 0
         ORDER BY from_trn LIMIT 1",
        RawRange::COLUMNS
      ),
      [],
      RawRange::from_row,
    )
    .optional()?;
  Ok(raw.map(RawRange::into_range))
}

/// `from_trn` of any range intersecting `[from_trn, to_trn]`.
pub fn select_overlapping_range(
  conn: &Connection,
  from_trn: u32,
  to_trn: u32,
) -> Result<Option<u32>> {
  Ok(
    conn
      .query_row(
        "SELECT from_trn FROM trn_ranges
         WHERE from_trn <= ?2 AND ?1 <= to_trn
         ORDER BY from_trn LIMIT 1",
        params![from_trn, to_trn],
        |row| row.get(0),
      )
      .optional()?,
  )
}

// ─── Persons ─────────────────────────────────────────────────────────────────

pub fn select_person(conn: &Connection, person_id: Uuid) -> Result<Option<Person>> {
  let raw = conn
    .query_row(
      &format!("SELECT {} FROM persons WHERE person_id = ?1", RawPerson::COLUMNS),
      params![encode_uuid(person_id)],
      RawPerson::from_row,
    )
    .optional()?;
  raw.map(RawPerson::into_person).transpose()
}

pub fn trn_in_use(conn: &Connection, trn: &str) -> Result<bool> {
  Ok(
    conn
      .query_row("SELECT 1 FROM persons WHERE trn = ?1", params![trn], |_| {
        Ok(true)
      })
      .optional()?
      .unwrap_or(false),
  )
}

pub fn select_person_ids(conn: &Connection) -> Result<Vec<Uuid>> {
  let mut stmt = conn.prepare("SELECT person_id FROM persons ORDER BY created_at")?;
  let ids = stmt
    .query_map([], |row| row.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  ids.iter().map(|s| decode_uuid(s)).collect()
}

// ─── Previous names ──────────────────────────────────────────────────────────

pub fn select_previous_name(
  conn: &Connection,
  previous_name_id: Uuid,
) -> Result<Option<PreviousName>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {} FROM previous_names WHERE previous_name_id = ?1",
        RawPreviousName::COLUMNS
      ),
      params![encode_uuid(previous_name_id)],
      RawPreviousName::from_row,
    )
    .optional()?;
  raw.map(RawPreviousName::into_previous_name).transpose()
}

/// Live previous names of a person, oldest first.
pub fn select_previous_names(
  conn: &Connection,
  person_id: Uuid,
) -> Result<Vec<PreviousName>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM previous_names
     WHERE person_id = ?1 AND deleted_at IS NULL
     ORDER BY created_at",
    RawPreviousName::COLUMNS
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(person_id)], RawPreviousName::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawPreviousName::into_previous_name).collect()
}

// ─── Employment ──────────────────────────────────────────────────────────────

pub fn select_employment_by_key(
  conn: &Connection,
  key: &str,
) -> Result<Option<Employment>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {} FROM employments WHERE employment_key = ?1",
        RawEmployment::COLUMNS
      ),
      params![key],
      RawEmployment::from_row,
    )
    .optional()?;
  raw.map(RawEmployment::into_employment).transpose()
}

/// Live employment records of a person, ordered by natural key.
pub fn select_employments(conn: &Connection, person_id: Uuid) -> Result<Vec<Employment>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM employments
     WHERE person_id = ?1 AND deleted_at IS NULL
     ORDER BY employment_key",
    RawEmployment::COLUMNS
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(person_id)], RawEmployment::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawEmployment::into_employment).collect()
}

// ─── Search attributes ───────────────────────────────────────────────────────

pub fn select_attributes(
  conn: &Connection,
  person_id: Uuid,
) -> Result<Vec<PersonSearchAttribute>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {} FROM person_search_attributes
     WHERE person_id = ?1
     ORDER BY attribute_type, attribute_key, attribute_value",
    RawAttribute::COLUMNS
  ))?;
  let rows = stmt
    .query_map(params![encode_uuid(person_id)], RawAttribute::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows.into_iter().map(RawAttribute::into_attribute).collect()
}

/// Served by `attributes_lookup_idx`; `value` must already be normalised.
pub fn find_person_ids(
  conn: &Connection,
  attribute_type: AttributeType,
  value: &str,
) -> Result<BTreeSet<Uuid>> {
  let mut stmt = conn.prepare(
    "SELECT DISTINCT a.person_id
     FROM person_search_attributes a
     JOIN persons p ON p.person_id = a.person_id
     WHERE a.attribute_type = ?1
       AND a.attribute_value = ?2
       AND p.deleted_at IS NULL",
  )?;
  let ids = stmt
    .query_map(params![encode_attribute_type(attribute_type), value], |row| {
      row.get::<_, String>(0)
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  ids.iter().map(|s| decode_uuid(s)).collect()
}

// ─── Synonyms ────────────────────────────────────────────────────────────────

pub fn select_synonyms(conn: &Connection) -> Result<Vec<NameSynonymEntry>> {
  let mut stmt = conn.prepare("SELECT name, synonyms FROM name_synonyms ORDER BY name")?;
  let rows = stmt
    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows
    .into_iter()
    .map(|(name, synonyms)| -> Result<NameSynonymEntry> {
      Ok(NameSynonymEntry { name, synonyms: serde_json::from_str(&synonyms)? })
    })
    .collect()
}
