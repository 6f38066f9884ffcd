//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings, UUIDs as hyphenated
//! lowercase strings, TRNs as their 7-digit form and tag lists as compact
//! JSON.

use chrono::{DateTime, Utc};
use trs_core::{
  attribute::{AttributeType, PersonSearchAttribute},
  person::{Employment, Person, PersonName, PreviousName},
  trn::{Trn, TrnRange},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── Trn ─────────────────────────────────────────────────────────────────────

pub fn encode_trn(trn: Trn) -> String { trn.to_string() }

pub fn decode_trn(s: &str) -> Result<Trn> { Ok(s.parse()?) }

// ─── AttributeType ───────────────────────────────────────────────────────────

pub fn encode_attribute_type(t: AttributeType) -> &'static str { t.into() }

pub fn decode_attribute_type(s: &str) -> Result<AttributeType> {
  AttributeType::parse(s).map_err(|_| Error::Decode(format!("attribute type {s:?}")))
}

// ─── Tags ────────────────────────────────────────────────────────────────────

pub fn encode_tags(tags: &[String]) -> Result<String> {
  Ok(serde_json::to_string(tags)?)
}

pub fn decode_tags(s: &str) -> Result<Vec<String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `trn_ranges` row.
pub struct RawRange {
  pub from_trn:     u32,
  pub to_trn:       u32,
  pub next_trn:     u32,
  pub is_exhausted: bool,
}

impl RawRange {
  pub const COLUMNS: &'static str = "from_trn, to_trn, next_trn, is_exhausted";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      from_trn:     row.get(0)?,
      to_trn:       row.get(1)?,
      next_trn:     row.get(2)?,
      is_exhausted: row.get(3)?,
    })
  }

  pub fn into_range(self) -> TrnRange {
    TrnRange {
      from_trn:     self.from_trn,
      to_trn:       self.to_trn,
      next_trn:     self.next_trn,
      is_exhausted: self.is_exhausted,
    }
  }
}

/// Raw strings read directly from a `persons` row.
pub struct RawPerson {
  pub person_id:                 String,
  pub trn:                       Option<String>,
  pub first_name:                String,
  pub middle_name:               String,
  pub last_name:                 String,
  pub national_insurance_number: Option<String>,
  pub created_at:                String,
  pub deleted_at:                Option<String>,
}

impl RawPerson {
  pub const COLUMNS: &'static str = "person_id, trn, first_name, middle_name, \
     last_name, national_insurance_number, created_at, deleted_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      person_id:                 row.get(0)?,
      trn:                       row.get(1)?,
      first_name:                row.get(2)?,
      middle_name:               row.get(3)?,
      last_name:                 row.get(4)?,
      national_insurance_number: row.get(5)?,
      created_at:                row.get(6)?,
      deleted_at:                row.get(7)?,
    })
  }

  pub fn into_person(self) -> Result<Person> {
    Ok(Person {
      person_id:                 decode_uuid(&self.person_id)?,
      trn:                       self.trn.as_deref().map(decode_trn).transpose()?,
      name:                      PersonName::new(
        self.first_name,
        self.middle_name,
        self.last_name,
      ),
      national_insurance_number: self.national_insurance_number,
      created_at:                decode_dt(&self.created_at)?,
      deleted_at:                decode_opt_dt(self.deleted_at)?,
    })
  }
}

/// Raw strings read directly from a `previous_names` row.
pub struct RawPreviousName {
  pub previous_name_id: String,
  pub person_id:        String,
  pub first_name:       String,
  pub middle_name:      String,
  pub last_name:        String,
  pub created_at:       String,
  pub deleted_at:       Option<String>,
}

impl RawPreviousName {
  pub const COLUMNS: &'static str = "previous_name_id, person_id, first_name, \
     middle_name, last_name, created_at, deleted_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      previous_name_id: row.get(0)?,
      person_id:        row.get(1)?,
      first_name:       row.get(2)?,
      middle_name:      row.get(3)?,
      last_name:        row.get(4)?,
      created_at:       row.get(5)?,
      deleted_at:       row.get(6)?,
    })
  }

  pub fn into_previous_name(self) -> Result<PreviousName> {
    Ok(PreviousName {
      previous_name_id: decode_uuid(&self.previous_name_id)?,
      person_id:        decode_uuid(&self.person_id)?,
      name:             PersonName::new(
        self.first_name,
        self.middle_name,
        self.last_name,
      ),
      created_at:       decode_dt(&self.created_at)?,
      deleted_at:       decode_opt_dt(self.deleted_at)?,
    })
  }
}

/// Raw strings read directly from an `employments` row.
pub struct RawEmployment {
  pub employment_id:             String,
  pub person_id:                 String,
  pub employment_key:            String,
  pub postcode:                  Option<String>,
  pub email:                     Option<String>,
  pub national_insurance_number: Option<String>,
  pub updated_at:                String,
  pub deleted_at:                Option<String>,
}

impl RawEmployment {
  pub const COLUMNS: &'static str = "employment_id, person_id, employment_key, \
     postcode, email, national_insurance_number, updated_at, deleted_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      employment_id:             row.get(0)?,
      person_id:                 row.get(1)?,
      employment_key:            row.get(2)?,
      postcode:                  row.get(3)?,
      email:                     row.get(4)?,
      national_insurance_number: row.get(5)?,
      updated_at:                row.get(6)?,
      deleted_at:                row.get(7)?,
    })
  }

  pub fn into_employment(self) -> Result<Employment> {
    Ok(Employment {
      employment_id:             decode_uuid(&self.employment_id)?,
      person_id:                 decode_uuid(&self.person_id)?,
      key:                       self.employment_key,
      postcode:                  self.postcode,
      email:                     self.email,
      national_insurance_number: self.national_insurance_number,
      updated_at:                decode_dt(&self.updated_at)?,
      deleted_at:                decode_opt_dt(self.deleted_at)?,
    })
  }
}

/// Raw strings read directly from a `person_search_attributes` row.
pub struct RawAttribute {
  pub attribute_id:    String,
  pub person_id:       String,
  pub attribute_type:  String,
  pub attribute_value: String,
  pub tags:            String,
  pub attribute_key:   Option<String>,
}

impl RawAttribute {
  pub const COLUMNS: &'static str = "attribute_id, person_id, attribute_type, \
     attribute_value, tags, attribute_key";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      attribute_id:    row.get(0)?,
      person_id:       row.get(1)?,
      attribute_type:  row.get(2)?,
      attribute_value: row.get(3)?,
      tags:            row.get(4)?,
      attribute_key:   row.get(5)?,
    })
  }

  pub fn into_attribute(self) -> Result<PersonSearchAttribute> {
    Ok(PersonSearchAttribute {
      attribute_id:    decode_uuid(&self.attribute_id)?,
      person_id:       decode_uuid(&self.person_id)?,
      attribute_type:  decode_attribute_type(&self.attribute_type)?,
      attribute_value: self.attribute_value,
      tags:            decode_tags(&self.tags)?,
      attribute_key:   self.attribute_key,
    })
  }
}
