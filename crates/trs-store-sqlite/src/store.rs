//! [`SqliteStore`], the SQLite implementation of [`TrnAllocator`],
//! [`PersonRepository`] and [`PersonSearchIndex`].

use std::{collections::BTreeSet, path::Path, sync::Arc};

use rusqlite::{Connection, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use trs_core::{
  attribute::{AttributeType, PersonSearchAttribute, ResyncOutcome},
  name::{NameNormalizer, NormalizerConfig},
  person::{
    Employment, NameInput, NewEmployment, NewPerson, Person, PreviousName,
  },
  store::{PersonRepository, PersonSearchIndex, ReindexSummary, TrnAllocator},
  synonym::{NameSynonymDictionary, NameSynonymEntry},
  trn::{Trn, TrnRange},
};

use crate::{Error, Result, StoreConfig, UnitOfWork, queries, schema::SCHEMA};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A TRS identity store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection and normaliser are
/// reference-counted. Several stores (or processes) may open the same file;
/// the immediate transactions keep them consistent.
#[derive(Clone)]
pub struct SqliteStore {
  conn:       tokio_rusqlite::Connection,
  normalizer: Arc<NameNormalizer>,
  config:     Arc<StoreConfig>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(
    path: impl AsRef<Path>,
    config: StoreConfig,
    names: &NormalizerConfig,
  ) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, config, names).await
  }

  /// Open an in-memory store with default settings, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, StoreConfig::default(), &NormalizerConfig::default()).await
  }

  async fn init(
    conn: tokio_rusqlite::Connection,
    config: StoreConfig,
    names: &NormalizerConfig,
  ) -> Result<Self> {
    let busy_timeout = config.busy_timeout();
    conn
      .call(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;

    let dictionary = Arc::new(NameSynonymDictionary::empty());
    let store = Self {
      conn,
      normalizer: Arc::new(NameNormalizer::new(names, dictionary)),
      config: Arc::new(config),
    };

    let entries = store.read(queries::select_synonyms).await?;
    store.normalizer.dictionary().refresh(&entries);
    Ok(store)
  }

  pub fn normalizer(&self) -> &NameNormalizer { &self.normalizer }

  /// Run `f` inside one immediate transaction, committing only if it returns
  /// `Ok`. Any error rolls back every write `f` made, TRN claims included.
  ///
  /// Transient contention (a busy database or lost claim races) re-runs `f`
  /// with exponential backoff, up to `contention_retries` times.
  pub async fn transact<F, R>(&self, f: F) -> Result<R>
  where
    F: Fn(&mut UnitOfWork<'_>) -> Result<R> + Clone + Send + 'static,
    R: Send + 'static,
  {
    let mut retry = 0;
    loop {
      match self.transact_once(f.clone()).await {
        Err(e) if e.is_transient() && retry < self.config.contention_retries => {
          let delay = self.config.backoff(retry);
          warn!(retry, ?delay, error = %e, "transient contention; retrying unit of work");
          tokio::time::sleep(delay).await;
          retry += 1;
        }
        other => return other,
      }
    }
  }

  async fn transact_once<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut UnitOfWork<'_>) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let normalizer = self.normalizer.clone();
    let claim_attempts = self.config.claim_attempts;

    self
      .conn
      .call(move |conn| Ok(run_unit_of_work(conn, &normalizer, claim_attempts, f)))
      .await?
  }

  /// Run a read-only query on the connection thread.
  async fn read<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }
}

fn run_unit_of_work<F, R>(
  conn: &mut Connection,
  normalizer: &NameNormalizer,
  claim_attempts: u32,
  f: F,
) -> Result<R>
where
  F: FnOnce(&mut UnitOfWork<'_>) -> Result<R>,
{
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let mut uow = UnitOfWork::new(tx, normalizer, claim_attempts);
  // Dropping `uow` on error rolls the transaction back.
  let value = f(&mut uow)?;
  uow.commit()?;
  Ok(value)
}

// ─── TrnAllocator impl ───────────────────────────────────────────────────────

impl TrnAllocator for SqliteStore {
  type Error = Error;

  async fn provision_range(&self, from_trn: u32, to_trn: u32) -> Result<TrnRange> {
    self
      .transact(move |uow| uow.provision_range(from_trn, to_trn))
      .await
  }

  async fn list_ranges(&self) -> Result<Vec<TrnRange>> {
    self.read(queries::select_ranges).await
  }

  async fn allocate(&self) -> Result<Trn> {
    self.transact(|uow| uow.allocate_trn()).await
  }
}

// ─── PersonRepository impl ───────────────────────────────────────────────────

impl PersonRepository for SqliteStore {
  type Error = Error;

  // ── Person ────────────────────────────────────────────────────────────────

  async fn create_person(&self, input: NewPerson) -> Result<Person> {
    self
      .transact(move |uow| uow.create_person(input.clone()))
      .await
  }

  async fn get_person(&self, person_id: Uuid) -> Result<Option<Person>> {
    self
      .read(move |conn| queries::select_person(conn, person_id))
      .await
  }

  async fn assign_trn(&self, person_id: Uuid) -> Result<Trn> {
    self.transact(move |uow| uow.assign_trn(person_id)).await
  }

  async fn update_person_name(&self, person_id: Uuid, name: NameInput) -> Result<Person> {
    self
      .transact(move |uow| uow.update_person_name(person_id, &name))
      .await
  }

  async fn set_national_insurance_number(
    &self,
    person_id: Uuid,
    nino:      Option<String>,
  ) -> Result<Person> {
    self
      .transact(move |uow| uow.set_national_insurance_number(person_id, nino.clone()))
      .await
  }

  async fn delete_person(&self, person_id: Uuid) -> Result<()> {
    self.transact(move |uow| uow.delete_person(person_id)).await
  }

  // ── Previous names ────────────────────────────────────────────────────────

  async fn add_previous_name(&self, person_id: Uuid, name: NameInput) -> Result<PreviousName> {
    self
      .transact(move |uow| uow.add_previous_name(person_id, &name))
      .await
  }

  async fn delete_previous_name(&self, previous_name_id: Uuid) -> Result<()> {
    self
      .transact(move |uow| uow.delete_previous_name(previous_name_id))
      .await
  }

  async fn list_previous_names(&self, person_id: Uuid) -> Result<Vec<PreviousName>> {
    self
      .read(move |conn| queries::select_previous_names(conn, person_id))
      .await
  }

  // ── Employment ────────────────────────────────────────────────────────────

  async fn upsert_employment(&self, input: NewEmployment) -> Result<Employment> {
    self
      .transact(move |uow| uow.upsert_employment(input.clone()))
      .await
  }

  async fn delete_employment(&self, key: &str) -> Result<()> {
    let key = key.to_owned();
    self.transact(move |uow| uow.delete_employment(&key)).await
  }

  async fn list_employments(&self, person_id: Uuid) -> Result<Vec<Employment>> {
    self
      .read(move |conn| queries::select_employments(conn, person_id))
      .await
  }
}

// ─── PersonSearchIndex impl ──────────────────────────────────────────────────

impl PersonSearchIndex for SqliteStore {
  type Error = Error;

  async fn resync(&self, person_id: Uuid) -> Result<ResyncOutcome> {
    self.transact(move |uow| uow.resync(person_id)).await
  }

  async fn resync_all(&self) -> Result<ReindexSummary> {
    let person_ids = self.read(queries::select_person_ids).await?;

    // One unit of work per person keeps each write lock short.
    let mut summary = ReindexSummary::default();
    for person_id in person_ids {
      let outcome = self.transact(move |uow| uow.resync(person_id)).await?;
      summary.record(outcome);
    }

    info!(
      persons = summary.persons,
      inserted = summary.inserted,
      updated = summary.updated,
      deleted = summary.deleted,
      "rebuilt person search index"
    );
    Ok(summary)
  }

  async fn find_by_attribute(
    &self,
    attribute_type: AttributeType,
    value:          &str,
  ) -> Result<BTreeSet<Uuid>> {
    let value = attribute_type.normalize(value);
    if value.is_empty() {
      return Ok(BTreeSet::new());
    }
    self
      .read(move |conn| queries::find_person_ids(conn, attribute_type, &value))
      .await
  }

  async fn person_attributes(&self, person_id: Uuid) -> Result<Vec<PersonSearchAttribute>> {
    self
      .read(move |conn| queries::select_attributes(conn, person_id))
      .await
  }

  async fn replace_synonyms(&self, entries: Vec<NameSynonymEntry>) -> Result<()> {
    let entries = Arc::new(entries);
    let persisted = self
      .transact(move |uow| uow.replace_synonyms(&entries))
      .await?;

    // Swap only once the new list is durable, and build it from the stored
    // rows so a reopened store sees the same dictionary.
    self.normalizer.dictionary().refresh(&persisted);
    Ok(())
  }
}
