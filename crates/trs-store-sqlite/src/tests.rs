//! Integration tests for `SqliteStore` against in-memory and file databases.

use std::{collections::BTreeSet, path::PathBuf};

use trs_core::{
  attribute::{AttributeType, PersonSearchAttribute, PersonSource, desired_attributes},
  person::{NameInput, NewEmployment, NewPerson, PersonName, TrnRequest},
  store::{PersonRepository, PersonSearchIndex, TrnAllocator},
  synonym::NameSynonymEntry,
  trn::Trn,
};
use tempfile::TempDir;
use uuid::Uuid;

use crate::{Error, SqliteStore, StoreConfig};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn store_with_range(from_trn: u32, to_trn: u32) -> SqliteStore {
  let s = store().await;
  s.provision_range(from_trn, to_trn).await.unwrap();
  s
}

fn full(name: &str) -> NameInput { NameInput::Full(name.into()) }

fn trn(value: u32) -> Trn { Trn::new(value).unwrap() }

/// A database file in its own temporary directory, removed on drop along
/// with its WAL and shared-memory files.
struct TempDb {
  dir: TempDir,
}

impl TempDb {
  fn new() -> Self { Self { dir: tempfile::tempdir().expect("create tempdir") } }

  fn path(&self) -> PathBuf { self.dir.path().join("trs.db") }
}

async fn open_file(db: &TempDb) -> SqliteStore {
  SqliteStore::open(db.path(), StoreConfig::default(), &Default::default())
    .await
    .expect("file store")
}

/// The index must equal what a fresh recomputation from source would give.
async fn assert_index_matches_source(s: &SqliteStore, person_id: Uuid) {
  let person = s.get_person(person_id).await.unwrap().unwrap();
  let previous_names = s.list_previous_names(person_id).await.unwrap();
  let employments = s.list_employments(person_id).await.unwrap();

  let desired = desired_attributes(s.normalizer(), PersonSource {
    person:         &person,
    previous_names: &previous_names,
    employments:    &employments,
  });
  let stored = s.person_attributes(person_id).await.unwrap();

  let desired: BTreeSet<_> = desired
    .into_iter()
    .map(|d| (d.attribute_type, d.attribute_key, d.attribute_value, d.tags))
    .collect();
  let stored: BTreeSet<_> = stored
    .into_iter()
    .map(|a| (a.attribute_type, a.attribute_key, a.attribute_value, a.tags))
    .collect();
  assert_eq!(stored, desired);
}

// ─── Range provisioning ──────────────────────────────────────────────────────

#[tokio::test]
async fn provision_and_list_ranges() {
  let s = store().await;
  s.provision_range(2_000_000, 2_000_999).await.unwrap();
  s.provision_range(1_000_000, 1_000_099).await.unwrap();

  let ranges = s.list_ranges().await.unwrap();
  assert_eq!(ranges.len(), 2);
  assert_eq!(ranges[0].from_trn, 1_000_000);
  assert_eq!(ranges[0].next_trn, 1_000_000);
  assert!(!ranges[0].is_exhausted);
  assert_eq!(ranges[1].remaining(), 1_000);
}

#[tokio::test]
async fn provision_rejects_overlapping_range() {
  let s = store_with_range(1_000_000, 1_000_099).await;

  let err = s.provision_range(1_000_050, 1_000_200).await.unwrap_err();
  assert!(matches!(
    err,
    Error::OverlappingRange { existing: 1_000_000, .. }
  ));

  // Adjacent is fine.
  s.provision_range(1_000_100, 1_000_200).await.unwrap();
}

#[tokio::test]
async fn provision_rejects_inverted_range() {
  let s = store().await;
  let err = s.provision_range(10, 9).await.unwrap_err();
  assert!(matches!(err, Error::Core(_)));
  assert!(s.list_ranges().await.unwrap().is_empty());
}

// ─── Allocation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn allocate_without_ranges_is_exhausted() {
  let s = store().await;
  let err = s.allocate().await.unwrap_err();
  assert!(matches!(err, Error::RangeExhausted));
}

#[tokio::test]
async fn allocate_is_dense_then_exhausts() {
  let s = store_with_range(1_000_000, 1_000_002).await;

  let issued = [
    s.allocate().await.unwrap(),
    s.allocate().await.unwrap(),
    s.allocate().await.unwrap(),
  ];
  assert_eq!(issued, [trn(1_000_000), trn(1_000_001), trn(1_000_002)]);
  assert_eq!(issued[0].to_string(), "1000000");

  let range = &s.list_ranges().await.unwrap()[0];
  assert!(range.is_exhausted);
  assert_eq!(range.next_trn, 1_000_003);

  assert!(matches!(s.allocate().await.unwrap_err(), Error::RangeExhausted));
}

#[tokio::test]
async fn allocate_prefers_lowest_range_then_moves_on() {
  let s = store().await;
  s.provision_range(3_000_000, 3_000_009).await.unwrap();
  s.provision_range(1_000_000, 1_000_000).await.unwrap();

  assert_eq!(s.allocate().await.unwrap(), trn(1_000_000));
  assert_eq!(s.allocate().await.unwrap(), trn(3_000_000));
  assert_eq!(s.allocate().await.unwrap(), trn(3_000_001));
}

#[tokio::test]
async fn exhausted_range_is_never_selected_again() {
  let s = store_with_range(1_000_000, 1_000_000).await;
  s.allocate().await.unwrap();

  // A lower range provisioned later is used; the exhausted one is skipped.
  s.provision_range(500_000, 500_001).await.unwrap();
  s.provision_range(2_000_000, 2_000_001).await.unwrap();

  let next: Vec<_> = [
    s.allocate().await.unwrap(),
    s.allocate().await.unwrap(),
    s.allocate().await.unwrap(),
  ]
  .into_iter()
  .map(Trn::value)
  .collect();
  assert_eq!(next, [500_000, 500_001, 2_000_000]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_are_distinct() {
  let s = store_with_range(1_000_000, 1_000_002).await;

  let (a, b, c) = tokio::join!(s.allocate(), s.allocate(), s.allocate());
  let mut issued = vec![a.unwrap().value(), b.unwrap().value(), c.unwrap().value()];
  issued.sort_unstable();
  assert_eq!(issued, [1_000_000, 1_000_001, 1_000_002]);

  assert!(s.list_ranges().await.unwrap()[0].is_exhausted);
  assert!(matches!(s.allocate().await.unwrap_err(), Error::RangeExhausted));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_callers_consume_range_exactly() {
  let s = store_with_range(2_000_000, 2_000_063).await;

  let tasks: Vec<_> = (0..64)
    .map(|_| {
      let s = s.clone();
      tokio::spawn(async move { s.allocate().await })
    })
    .collect();

  let mut issued = Vec::new();
  for task in tasks {
    issued.push(task.await.unwrap().unwrap().value());
  }
  issued.sort_unstable();

  let expected: Vec<u32> = (2_000_000..=2_000_063).collect();
  assert_eq!(issued, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_connections_never_issue_the_same_trn() {
  let db = TempDb::new();
  let first = open_file(&db).await;
  let second = open_file(&db).await;
  first.provision_range(4_000_000, 4_000_039).await.unwrap();

  let tasks: Vec<_> = (0..40)
    .map(|i| {
      let s = if i % 2 == 0 { first.clone() } else { second.clone() };
      tokio::spawn(async move { s.allocate().await })
    })
    .collect();

  let mut issued = BTreeSet::new();
  for task in tasks {
    assert!(issued.insert(task.await.unwrap().unwrap().value()));
  }

  let expected: BTreeSet<u32> = (4_000_000..=4_000_039).collect();
  assert_eq!(issued, expected);
  assert!(matches!(second.allocate().await.unwrap_err(), Error::RangeExhausted));
}

#[tokio::test]
async fn rolled_back_claim_is_issued_again() {
  let s = store_with_range(1_000_000, 1_000_009).await;

  let err = s
    .transact(|uow| {
      uow.allocate_trn()?;
      Err::<(), _>(Error::PersonNotFound(Uuid::nil()))
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::PersonNotFound(_)));

  assert_eq!(s.allocate().await.unwrap(), trn(1_000_000));
}

// ─── Person write path ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_person_allocates_trn_and_indexes_name() {
  let s = store_with_range(1_000_000, 1_000_009).await;

  let person = s.create_person(NewPerson::new(full("John Smith"))).await.unwrap();
  assert_eq!(person.trn, Some(trn(1_000_000)));
  assert_eq!(person.name, PersonName::new("John", "", "Smith"));

  let found = s.find_by_attribute(AttributeType::NameToken, "SMITH").await.unwrap();
  assert_eq!(found, BTreeSet::from([person.person_id]));

  let by_trn = s.find_by_attribute(AttributeType::Trn, "1000000").await.unwrap();
  assert_eq!(by_trn, BTreeSet::from([person.person_id]));

  assert_index_matches_source(&s, person.person_id).await;
}

#[tokio::test]
async fn create_person_splits_particle_surnames() {
  let s = store_with_range(1_000_000, 1_000_009).await;

  let person = s
    .create_person(NewPerson::new(full("Mary Anne de la Cruz")))
    .await
    .unwrap();
  assert_eq!(person.name, PersonName::new("Mary", "Anne", "de la Cruz"));

  let prince = s.create_person(NewPerson::new(full("Prince"))).await.unwrap();
  assert_eq!(prince.name, PersonName::new("", "", "Prince"));

  let stored = s.get_person(person.person_id).await.unwrap().unwrap();
  assert_eq!(stored.name.last, "de la Cruz");
}

#[tokio::test]
async fn create_person_with_existing_trn() {
  let s = store().await;

  let input = NewPerson {
    trn: TrnRequest::Existing(trn(1_234_567)),
    ..NewPerson::new(full("Ada Lovelace"))
  };
  let person = s.create_person(input.clone()).await.unwrap();
  assert_eq!(person.trn, Some(trn(1_234_567)));

  let err = s.create_person(input).await.unwrap_err();
  assert!(matches!(err, Error::DuplicateTrn(t) if t == trn(1_234_567)));
}

#[tokio::test]
async fn deferred_trn_can_be_assigned_once() {
  let s = store_with_range(1_000_000, 1_000_009).await;

  let person = s
    .create_person(NewPerson {
      trn: TrnRequest::Deferred,
      ..NewPerson::new(full("Grace Hopper"))
    })
    .await
    .unwrap();
  assert_eq!(person.trn, None);
  assert!(
    s.find_by_attribute(AttributeType::Trn, "1000000")
      .await
      .unwrap()
      .is_empty()
  );

  let assigned = s.assign_trn(person.person_id).await.unwrap();
  assert_eq!(assigned, trn(1_000_000));
  assert_eq!(
    s.find_by_attribute(AttributeType::Trn, "1000000").await.unwrap(),
    BTreeSet::from([person.person_id])
  );

  let err = s.assign_trn(person.person_id).await.unwrap_err();
  assert!(matches!(err, Error::TrnAlreadyAssigned { .. }));
}

#[tokio::test]
async fn failed_creation_leaves_no_trace() {
  let s = store().await;

  let err = s
    .create_person(NewPerson::new(full("Nobody Here")))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RangeExhausted));

  assert!(
    s.find_by_attribute(AttributeType::NameToken, "nobody")
      .await
      .unwrap()
      .is_empty()
  );
  assert_eq!(s.resync_all().await.unwrap().persons, 0);
}

#[tokio::test]
async fn source_write_and_index_roll_back_together() {
  let s = store_with_range(1_000_000, 1_000_009).await;

  let err = s
    .transact(|uow| {
      let person = uow.create_person(NewPerson::new(full("Rolled Back")))?;
      Err::<(), _>(Error::PersonDeleted(person.person_id))
    })
    .await
    .unwrap_err();
  let Error::PersonDeleted(person_id) = err else {
    panic!("unexpected error variant");
  };

  assert!(s.get_person(person_id).await.unwrap().is_none());
  assert!(s.person_attributes(person_id).await.unwrap().is_empty());
  assert!(
    s.find_by_attribute(AttributeType::NameToken, "rolled")
      .await
      .unwrap()
      .is_empty()
  );
  // The TRN claimed inside the rolled-back unit of work is still free.
  assert_eq!(s.allocate().await.unwrap(), trn(1_000_000));
}

#[tokio::test]
async fn renaming_replaces_name_tokens() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();

  let renamed = s
    .update_person_name(person.person_id, full("Jane Roe"))
    .await
    .unwrap();
  assert_eq!(renamed.name, PersonName::new("Jane", "", "Roe"));

  assert!(
    s.find_by_attribute(AttributeType::NameToken, "doe")
      .await
      .unwrap()
      .is_empty()
  );
  assert_eq!(
    s.find_by_attribute(AttributeType::NameToken, "roe").await.unwrap(),
    BTreeSet::from([person.person_id])
  );
  assert_index_matches_source(&s, person.person_id).await;
}

#[tokio::test]
async fn structured_name_parts_are_tidied() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s
    .create_person(NewPerson::new(NameInput::Parts(PersonName::new(
      "  Jo ",
      "",
      "van  Dyke",
    ))))
    .await
    .unwrap();
  assert_eq!(person.name, PersonName::new("Jo", "", "van Dyke"));
}

#[tokio::test]
async fn national_insurance_number_is_normalised_for_lookup() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Alan Turing"))).await.unwrap();

  s.set_national_insurance_number(person.person_id, Some(" ab 12 34 56 c ".into()))
    .await
    .unwrap();

  let found = s
    .find_by_attribute(AttributeType::NationalInsuranceNumber, "AB123456C")
    .await
    .unwrap();
  assert_eq!(found, BTreeSet::from([person.person_id]));

  let stored = s.get_person(person.person_id).await.unwrap().unwrap();
  assert_eq!(stored.national_insurance_number.as_deref(), Some("ab 12 34 56 c"));

  s.set_national_insurance_number(person.person_id, None)
    .await
    .unwrap();
  assert!(
    s.find_by_attribute(AttributeType::NationalInsuranceNumber, "AB123456C")
      .await
      .unwrap()
      .is_empty()
  );
}

// ─── Previous names ──────────────────────────────────────────────────────────

#[tokio::test]
async fn previous_names_are_indexed_until_deleted() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Roe"))).await.unwrap();

  let previous = s
    .add_previous_name(person.person_id, full("Jane Doe"))
    .await
    .unwrap();
  assert_eq!(previous.name, PersonName::new("Jane", "", "Doe"));

  assert_eq!(
    s.find_by_attribute(AttributeType::PreviousNameToken, "Doe").await.unwrap(),
    BTreeSet::from([person.person_id])
  );
  assert_index_matches_source(&s, person.person_id).await;

  s.delete_previous_name(previous.previous_name_id).await.unwrap();

  assert!(
    s.find_by_attribute(AttributeType::PreviousNameToken, "doe")
      .await
      .unwrap()
      .is_empty()
  );
  // The live person keeps their current-name attributes.
  assert_eq!(
    s.find_by_attribute(AttributeType::NameToken, "roe").await.unwrap(),
    BTreeSet::from([person.person_id])
  );
  assert!(s.list_previous_names(person.person_id).await.unwrap().is_empty());
  assert_index_matches_source(&s, person.person_id).await;
}

#[tokio::test]
async fn delete_unknown_previous_name_errors() {
  let s = store().await;
  let err = s.delete_previous_name(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::PreviousNameNotFound(_)));
}

// ─── Employment ──────────────────────────────────────────────────────────────

fn job(person_id: Uuid, key: &str, postcode: &str) -> NewEmployment {
  NewEmployment {
    postcode: Some(postcode.into()),
    email: Some("teacher@school.example".into()),
    national_insurance_number: Some("QQ123456A".into()),
    ..NewEmployment::new(person_id, key)
  }
}

#[tokio::test]
async fn employment_upsert_is_idempotent() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();

  let first = s
    .upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();
  let before = s.person_attributes(person.person_id).await.unwrap();

  let again = s
    .upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();
  assert_eq!(again.employment_id, first.employment_id);
  assert_eq!(again.updated_at, first.updated_at);

  let after = s.person_attributes(person.person_id).await.unwrap();
  assert_eq!(before, after);

  assert_eq!(
    s.find_by_attribute(AttributeType::EmploymentPostcode, "sw1a1aa")
      .await
      .unwrap(),
    BTreeSet::from([person.person_id])
  );
  assert_eq!(
    s.find_by_attribute(AttributeType::NationalInsuranceNumber, "qq 12 34 56 a")
      .await
      .unwrap(),
    BTreeSet::from([person.person_id])
  );
}

fn postcode_row(attrs: &[PersonSearchAttribute]) -> PersonSearchAttribute {
  attrs
    .iter()
    .find(|a| a.attribute_type == AttributeType::EmploymentPostcode)
    .cloned()
    .unwrap()
}

#[tokio::test]
async fn employment_change_updates_slot_in_place() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();

  s.upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();
  let before = postcode_row(&s.person_attributes(person.person_id).await.unwrap());

  s.upsert_employment(job(person.person_id, "E1", "M1 1AE"))
    .await
    .unwrap();
  let after = postcode_row(&s.person_attributes(person.person_id).await.unwrap());

  assert_eq!(after.attribute_id, before.attribute_id);
  assert_eq!(after.attribute_value, "M11AE");
  assert_eq!(after.attribute_key.as_deref(), Some("employment:E1"));
  assert!(
    s.find_by_attribute(AttributeType::EmploymentPostcode, "SW1A 1AA")
      .await
      .unwrap()
      .is_empty()
  );
  assert_index_matches_source(&s, person.person_id).await;
}

#[tokio::test]
async fn employment_delete_and_revive() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();
  s.upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();

  s.delete_employment("E1").await.unwrap();
  assert!(s.list_employments(person.person_id).await.unwrap().is_empty());
  assert!(
    s.find_by_attribute(AttributeType::EmploymentEmail, "teacher@school.example")
      .await
      .unwrap()
      .is_empty()
  );
  assert_index_matches_source(&s, person.person_id).await;

  let revived = s
    .upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();
  assert!(revived.deleted_at.is_none());
  assert_eq!(
    s.find_by_attribute(AttributeType::EmploymentEmail, "Teacher@School.example")
      .await
      .unwrap(),
    BTreeSet::from([person.person_id])
  );
}

#[tokio::test]
async fn employment_key_belongs_to_one_person() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let jane = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();
  let john = s.create_person(NewPerson::new(full("John Doe"))).await.unwrap();

  s.upsert_employment(job(jane.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();
  let err = s
    .upsert_employment(job(john.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::EmploymentKeyConflict { person_id, .. } if person_id == jane.person_id));

  let err = s.delete_employment("missing").await.unwrap_err();
  assert!(matches!(err, Error::EmploymentNotFound(_)));
}

#[tokio::test]
async fn shared_attribute_finds_every_person() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let jane = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();
  let john = s.create_person(NewPerson::new(full("John Doe"))).await.unwrap();

  let found = s.find_by_attribute(AttributeType::NameToken, "doe").await.unwrap();
  assert_eq!(found, BTreeSet::from([jane.person_id, john.person_id]));
}

// ─── Soft delete ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn soft_deleted_person_has_no_attributes() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();
  s.add_previous_name(person.person_id, full("Jane Roe"))
    .await
    .unwrap();
  s.upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();

  s.delete_person(person.person_id).await.unwrap();

  assert!(s.person_attributes(person.person_id).await.unwrap().is_empty());
  assert!(
    s.find_by_attribute(AttributeType::NameToken, "doe")
      .await
      .unwrap()
      .is_empty()
  );
  assert!(s.resync(person.person_id).await.unwrap().is_noop());

  let stored = s.get_person(person.person_id).await.unwrap().unwrap();
  assert!(stored.is_deleted());

  let err = s
    .update_person_name(person.person_id, full("Jane Smith"))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::PersonDeleted(_)));

  // Deleting again is harmless.
  s.delete_person(person.person_id).await.unwrap();
}

// ─── Resync ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn resync_twice_writes_nothing_the_second_time() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Jane Doe"))).await.unwrap();

  // The write path already resynced.
  assert!(s.resync(person.person_id).await.unwrap().is_noop());
  assert!(s.resync(person.person_id).await.unwrap().is_noop());
}

#[tokio::test]
async fn resync_unknown_person_errors() {
  let s = store().await;
  let err = s.resync(Uuid::new_v4()).await.unwrap_err();
  assert!(matches!(err, Error::PersonNotFound(_)));
}

#[tokio::test]
async fn blank_lookup_value_matches_nothing() {
  let s = store().await;
  let found = s.find_by_attribute(AttributeType::NameToken, "   ").await.unwrap();
  assert!(found.is_empty());
}

#[tokio::test]
async fn index_tracks_a_sequence_of_mutations() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  s.replace_synonyms(vec![NameSynonymEntry::new("Elizabeth", ["Liz", "Beth"])])
    .await
    .unwrap();

  let person = s.create_person(NewPerson::new(full("Liz Smith-Jones"))).await.unwrap();
  assert_index_matches_source(&s, person.person_id).await;

  let previous = s
    .add_previous_name(person.person_id, full("Beth Taylor"))
    .await
    .unwrap();
  assert_index_matches_source(&s, person.person_id).await;

  s.upsert_employment(job(person.person_id, "E1", "SW1A 1AA"))
    .await
    .unwrap();
  s.upsert_employment(job(person.person_id, "E2", "M1 1AE"))
    .await
    .unwrap();
  assert_index_matches_source(&s, person.person_id).await;

  s.set_national_insurance_number(person.person_id, Some("QQ123456A".into()))
    .await
    .unwrap();
  s.delete_previous_name(previous.previous_name_id).await.unwrap();
  s.delete_employment("E2").await.unwrap();
  s.update_person_name(person.person_id, full("Elizabeth Smith"))
    .await
    .unwrap();
  assert_index_matches_source(&s, person.person_id).await;

  assert!(s.resync(person.person_id).await.unwrap().is_noop());
}

// ─── Synonyms ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn synonyms_widen_name_lookup() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  s.replace_synonyms(vec![NameSynonymEntry::new("Robert", ["Bob", "Rob"])])
    .await
    .unwrap();

  let person = s.create_person(NewPerson::new(full("Bob Smith"))).await.unwrap();

  let found = s
    .find_by_attribute(AttributeType::SynonymToken, "Robert")
    .await
    .unwrap();
  assert_eq!(found, BTreeSet::from([person.person_id]));

  let attrs = s.person_attributes(person.person_id).await.unwrap();
  let robert = attrs
    .iter()
    .find(|a| a.attribute_value == "robert")
    .unwrap();
  assert_eq!(robert.tags, ["current-name"]);
}

#[tokio::test]
async fn synonym_change_applies_after_reindex() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let person = s.create_person(NewPerson::new(full("Bill Evans"))).await.unwrap();

  s.replace_synonyms(vec![NameSynonymEntry::new("William", ["Bill"])])
    .await
    .unwrap();
  assert!(
    s.find_by_attribute(AttributeType::SynonymToken, "william")
      .await
      .unwrap()
      .is_empty()
  );

  let summary = s.resync_all().await.unwrap();
  assert_eq!(summary.persons, 1);
  assert_eq!(summary.inserted, 1);
  assert_eq!(
    s.find_by_attribute(AttributeType::SynonymToken, "william")
      .await
      .unwrap(),
    BTreeSet::from([person.person_id])
  );

  assert_eq!(s.resync_all().await.unwrap().inserted, 0);
}

#[tokio::test]
async fn synonyms_persist_across_reopen() {
  let db = TempDb::new();
  {
    let s = open_file(&db).await;
    s.replace_synonyms(vec![NameSynonymEntry::new("Margaret", ["Peggy", "Maggie"])])
      .await
      .unwrap();
  }

  let reopened = open_file(&db).await;
  let dictionary = reopened.normalizer().dictionary();
  assert_eq!(dictionary.len(), 1);
  assert!(dictionary.lookup("peggy").contains("margaret"));
}

// ─── Held TRNs ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn allocation_skips_trns_already_held() {
  let s = store_with_range(1_000_000, 1_000_009).await;
  let migrated = s
    .create_person(NewPerson {
      trn: TrnRequest::Existing(trn(1_000_001)),
      ..NewPerson::new(full("Ada Lovelace"))
    })
    .await
    .unwrap();

  let mut issued = Vec::new();
  for name in ["Jane Doe", "John Doe", "Alan Turing"] {
    let person = s.create_person(NewPerson::new(full(name))).await.unwrap();
    issued.push(person.trn.unwrap().value());
  }
  assert_eq!(issued, [1_000_000, 1_000_002, 1_000_003]);

  assert_eq!(s.allocate().await.unwrap(), trn(1_000_004));
  assert_eq!(
    s.find_by_attribute(AttributeType::Trn, "1000001").await.unwrap(),
    BTreeSet::from([migrated.person_id])
  );
}

#[tokio::test]
async fn held_trn_at_end_of_range_exhausts_it() {
  let s = store_with_range(1_000_000, 1_000_001).await;
  s.create_person(NewPerson {
    trn: TrnRequest::Existing(trn(1_000_001)),
    ..NewPerson::new(full("Ada Lovelace"))
  })
  .await
  .unwrap();

  assert_eq!(s.allocate().await.unwrap(), trn(1_000_000));
  assert!(matches!(s.allocate().await.unwrap_err(), Error::RangeExhausted));

  s.provision_range(2_000_000, 2_000_009).await.unwrap();
  assert_eq!(s.allocate().await.unwrap(), trn(2_000_000));

  let ranges = s.list_ranges().await.unwrap();
  assert!(ranges[0].is_exhausted);
  assert_eq!(ranges[0].next_trn, 1_000_002);
}

// ─── Synonym persistence ─────────────────────────────────────────────────────

#[tokio::test]
async fn case_variant_synonym_names_survive_reopen() {
  let db = TempDb::new();
  let (live_bob, live_rob, person_id) = {
    let s = open_file(&db).await;
    s.provision_range(1_000_000, 1_000_009).await.unwrap();
    s.replace_synonyms(vec![
      NameSynonymEntry::new("Robert", ["Bob"]),
      NameSynonymEntry::new("robert", ["Rob"]),
    ])
    .await
    .unwrap();
    let person = s.create_person(NewPerson::new(full("Bob Smith"))).await.unwrap();

    let dictionary = s.normalizer().dictionary();
    assert_eq!(dictionary.len(), 1);
    (dictionary.lookup("bob"), dictionary.lookup("rob"), person.person_id)
  };
  assert!(live_bob.contains("robert"));
  assert!(live_rob.contains("robert"));

  let reopened = open_file(&db).await;
  let dictionary = reopened.normalizer().dictionary();
  assert_eq!(dictionary.len(), 1);
  assert_eq!(dictionary.lookup("bob"), live_bob);
  assert_eq!(dictionary.lookup("rob"), live_rob);

  // Rows derived before the restart match a recomputation after it.
  assert!(reopened.resync(person_id).await.unwrap().is_noop());
  assert_index_matches_source(&reopened, person_id).await;
}

// ─── Concurrent writes to one person ─────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_to_one_person_keep_index_in_step() {
  let db = TempDb::new();
  let first = open_file(&db).await;
  let second = open_file(&db).await;
  first.provision_range(1_000_000, 1_000_009).await.unwrap();
  let person_id = first
    .create_person(NewPerson::new(full("Jane Doe")))
    .await
    .unwrap()
    .person_id;

  let (renamed, previous, job_a, job_b, nino) = tokio::join!(
    first.update_person_name(person_id, full("Jane Roe")),
    second.add_previous_name(person_id, full("Jane Doe")),
    first.upsert_employment(job(person_id, "E1", "SW1A 1AA")),
    second.upsert_employment(job(person_id, "E2", "M1 1AE")),
    second.set_national_insurance_number(person_id, Some("AB123456C".into())),
  );
  renamed.unwrap();
  previous.unwrap();
  job_a.unwrap();
  job_b.unwrap();
  nino.unwrap();

  let tasks: Vec<_> = (0..16)
    .map(|i| {
      let s = if i % 2 == 0 { first.clone() } else { second.clone() };
      tokio::spawn(async move {
        s.update_person_name(person_id, full(&format!("Jane Name{i}")))
          .await?;
        s.upsert_employment(job(person_id, &format!("X{i}"), "EH1 1YZ"))
          .await?;
        Ok::<_, Error>(())
      })
    })
    .collect();
  for task in tasks {
    task.await.unwrap().unwrap();
  }

  assert_index_matches_source(&first, person_id).await;
  assert!(second.resync(person_id).await.unwrap().is_noop());

  assert_eq!(
    second
      .find_by_attribute(AttributeType::PreviousNameToken, "doe")
      .await
      .unwrap(),
    BTreeSet::from([person_id])
  );
  assert_eq!(
    first
      .find_by_attribute(AttributeType::NationalInsuranceNumber, "ab123456c")
      .await
      .unwrap(),
    BTreeSet::from([person_id])
  );
  let postcodes = first
    .person_attributes(person_id)
    .await
    .unwrap()
    .into_iter()
    .filter(|a| a.attribute_type == AttributeType::EmploymentPostcode)
    .count();
  assert_eq!(postcodes, 18);
}
