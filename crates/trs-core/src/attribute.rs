//! Person search attributes: the denormalised `(type, value)` facts that
//! matching and deduplication query instead of the source tables.
//!
//! Attributes are wholly derived. [`desired_attributes`] computes the full set
//! a person should have from current source state, and [`diff_attributes`]
//! turns that into the minimal patch against what is stored. Rows that do not
//! change keep their identity.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};
use uuid::Uuid;

use crate::{
  Error, Result,
  name::NameNormalizer,
  person::{Employment, Person, PersonName, PreviousName},
};

// ─── Attribute type ──────────────────────────────────────────────────────────

/// Discriminant stored in the `attribute_type` column.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  AsRefStr,
  IntoStaticStr,
  EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AttributeType {
  Trn,
  NameToken,
  SynonymToken,
  PreviousNameToken,
  NationalInsuranceNumber,
  EmploymentPostcode,
  EmploymentEmail,
}

impl AttributeType {
  pub fn parse(s: &str) -> Result<Self> {
    s.parse().map_err(|_| Error::UnknownAttributeType(s.to_owned()))
  }

  /// Whether rows of this type occupy a named single-valued slot
  /// (`attribute_key` populated) rather than forming a free set.
  pub fn is_keyed(self) -> bool {
    matches!(
      self,
      Self::Trn
        | Self::NationalInsuranceNumber
        | Self::EmploymentPostcode
        | Self::EmploymentEmail
    )
  }

  /// Bring a raw value into the single comparable form stored for this type.
  /// Used both when deriving attributes and when querying them.
  pub fn normalize(self, raw: &str) -> String {
    match self {
      Self::Trn => raw.trim().to_owned(),
      Self::NameToken | Self::SynonymToken | Self::PreviousNameToken => {
        raw.trim().to_lowercase()
      }
      Self::NationalInsuranceNumber => raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase(),
      Self::EmploymentPostcode => raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase(),
      Self::EmploymentEmail => raw.trim().to_lowercase(),
    }
  }
}

/// Provenance labels carried in an attribute's `tags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Provenance {
  Trn,
  CurrentName,
  PreviousName,
  NationalInsuranceNumber,
  Employment,
}

/// `attribute_key` of the TRN slot.
pub const TRN_KEY: &str = "trn";
/// `attribute_key` of the NI number held on the person itself.
pub const PERSON_KEY: &str = "person";

/// `attribute_key` for slots fed by one employment record.
pub fn employment_key(key: &str) -> String { format!("employment:{key}") }

// ─── Rows ────────────────────────────────────────────────────────────────────

/// A stored index row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonSearchAttribute {
  pub attribute_id:    Uuid,
  pub person_id:       Uuid,
  pub attribute_type:  AttributeType,
  pub attribute_value: String,
  pub tags:            Vec<String>,
  pub attribute_key:   Option<String>,
}

impl PersonSearchAttribute {
  fn slot(&self) -> Slot {
    Slot::of(self.attribute_type, self.attribute_key.as_deref(), &self.attribute_value)
  }
}

/// A row as the recomputation wants it, before it has an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredAttribute {
  pub attribute_type:  AttributeType,
  pub attribute_value: String,
  /// Sorted and deduplicated.
  pub tags:            Vec<String>,
  pub attribute_key:   Option<String>,
}

impl DesiredAttribute {
  fn slot(&self) -> Slot {
    Slot::of(self.attribute_type, self.attribute_key.as_deref(), &self.attribute_value)
  }

  fn matches(&self, stored: &PersonSearchAttribute) -> bool {
    self.attribute_value == stored.attribute_value && self.tags == stored.tags
  }
}

/// Identity of a row for diffing: keyed types by `(type, key)`, set-valued
/// types by `(type, value)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Slot {
  Keyed { attribute_type: AttributeType, key: String },
  Valued { attribute_type: AttributeType, value: String },
}

impl Slot {
  fn of(attribute_type: AttributeType, key: Option<&str>, value: &str) -> Self {
    match key {
      Some(key) => Self::Keyed { attribute_type, key: key.to_owned() },
      None => Self::Valued { attribute_type, value: value.to_owned() },
    }
  }
}

// ─── Derivation ──────────────────────────────────────────────────────────────

/// Current source state of one person aggregate.
#[derive(Debug, Clone, Copy)]
pub struct PersonSource<'a> {
  pub person:         &'a Person,
  pub previous_names: &'a [PreviousName],
  pub employments:    &'a [Employment],
}

/// Accumulates desired rows, merging rows that share a slot.
#[derive(Default)]
struct AttributeSet {
  rows: BTreeMap<Slot, (String, BTreeSet<String>)>,
}

impl AttributeSet {
  fn add(
    &mut self,
    attribute_type: AttributeType,
    raw: &str,
    key: Option<String>,
    tags: &[Provenance],
  ) {
    let value = attribute_type.normalize(raw);
    if value.is_empty() {
      return;
    }
    let key = attribute_type.is_keyed().then_some(key).flatten();
    let slot = Slot::of(attribute_type, key.as_deref(), &value);
    let (_, merged) = self
      .rows
      .entry(slot)
      .or_insert_with(|| (value, BTreeSet::new()));
    merged.extend(tags.iter().map(|t| t.to_string()));
  }

  fn add_name(
    &mut self,
    normalizer: &NameNormalizer,
    name: &PersonName,
    token_type: AttributeType,
    provenance: Provenance,
  ) {
    let expanded = normalizer.tokens(&name.full());
    for token in &expanded.tokens {
      self.add(token_type, token, None, &[provenance]);
    }
    for synonym in &expanded.synonyms {
      self.add(AttributeType::SynonymToken, synonym, None, &[provenance]);
    }
  }

  fn into_vec(self) -> Vec<DesiredAttribute> {
    self
      .rows
      .into_iter()
      .map(|(slot, (value, tags))| {
        let (attribute_type, attribute_key) = match slot {
          Slot::Keyed { attribute_type, key } => (attribute_type, Some(key)),
          Slot::Valued { attribute_type, .. } => (attribute_type, None),
        };
        DesiredAttribute {
          attribute_type,
          attribute_value: value,
          tags: tags.into_iter().collect(),
          attribute_key,
        }
      })
      .collect()
  }
}

/// Recompute the complete attribute set for a person.
///
/// A soft-deleted person yields nothing. Soft-deleted previous names and
/// employment records contribute nothing. The result is sorted by slot, so
/// equal sources always produce equal output.
pub fn desired_attributes(
  normalizer: &NameNormalizer,
  source: PersonSource<'_>,
) -> Vec<DesiredAttribute> {
  let person = source.person;
  if person.is_deleted() {
    return Vec::new();
  }

  let mut set = AttributeSet::default();

  if let Some(trn) = person.trn {
    set.add(
      AttributeType::Trn,
      &trn.to_string(),
      Some(TRN_KEY.to_owned()),
      &[Provenance::Trn],
    );
  }

  set.add_name(
    normalizer,
    &person.name,
    AttributeType::NameToken,
    Provenance::CurrentName,
  );

  for previous in source.previous_names.iter().filter(|p| p.deleted_at.is_none()) {
    set.add_name(
      normalizer,
      &previous.name,
      AttributeType::PreviousNameToken,
      Provenance::PreviousName,
    );
  }

  if let Some(nino) = &person.national_insurance_number {
    set.add(
      AttributeType::NationalInsuranceNumber,
      nino,
      Some(PERSON_KEY.to_owned()),
      &[Provenance::NationalInsuranceNumber],
    );
  }

  for employment in source.employments.iter().filter(|e| e.deleted_at.is_none()) {
    let key = employment_key(&employment.key);
    if let Some(nino) = &employment.national_insurance_number {
      set.add(
        AttributeType::NationalInsuranceNumber,
        nino,
        Some(key.clone()),
        &[Provenance::NationalInsuranceNumber, Provenance::Employment],
      );
    }
    if let Some(postcode) = &employment.postcode {
      set.add(
        AttributeType::EmploymentPostcode,
        postcode,
        Some(key.clone()),
        &[Provenance::Employment],
      );
    }
    if let Some(email) = &employment.email {
      set.add(
        AttributeType::EmploymentEmail,
        email,
        Some(key),
        &[Provenance::Employment],
      );
    }
  }

  set.into_vec()
}

// ─── Diff ────────────────────────────────────────────────────────────────────

/// The minimal patch that makes stored rows equal the desired set.
#[derive(Debug, Default)]
pub struct AttributeDiff {
  pub inserts: Vec<DesiredAttribute>,
  /// Existing row ids rewritten in place: a keyed slot whose value changed,
  /// or any row whose tags changed.
  pub updates: Vec<(Uuid, DesiredAttribute)>,
  pub deletes: Vec<Uuid>,
}

impl AttributeDiff {
  pub fn is_empty(&self) -> bool {
    self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
  }

  pub fn outcome(&self) -> ResyncOutcome {
    ResyncOutcome {
      inserted: self.inserts.len(),
      updated:  self.updates.len(),
      deleted:  self.deletes.len(),
    }
  }
}

/// Compute the patch from `stored` to `desired`.
///
/// Keyed slots are upserted by key; set-valued types are replaced as a set.
/// Stored rows that duplicate an already-matched slot are deleted.
pub fn diff_attributes(
  stored: &[PersonSearchAttribute],
  desired: &[DesiredAttribute],
) -> AttributeDiff {
  let mut wanted: BTreeMap<Slot, &DesiredAttribute> =
    desired.iter().map(|d| (d.slot(), d)).collect();

  let mut diff = AttributeDiff::default();

  for row in stored {
    match wanted.remove(&row.slot()) {
      Some(d) if d.matches(row) => {}
      Some(d) => diff.updates.push((row.attribute_id, d.clone())),
      None => diff.deletes.push(row.attribute_id),
    }
  }

  diff.inserts = wanted.into_values().cloned().collect();
  diff
}

/// Row counts written by one resync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResyncOutcome {
  pub inserted: usize,
  pub updated:  usize,
  pub deleted:  usize,
}

impl ResyncOutcome {
  pub fn is_noop(&self) -> bool { *self == Self::default() }

  pub fn total(&self) -> usize { self.inserted + self.updated + self.deleted }
}
