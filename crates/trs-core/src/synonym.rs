//! Name synonym dictionary.
//!
//! Reference data mapping a personal name to its accepted alternate forms
//! (e.g. "Robert" ↔ "Bob"). Lookups read an immutable snapshot; a refresh
//! builds a new snapshot and swaps it in atomically, so a concurrent lookup
//! sees either the old list or the new one, never a mix.

use std::{
  collections::{BTreeSet, HashMap},
  sync::Arc,
};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// One administratively maintained row: a canonical name and its synonyms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSynonymEntry {
  pub name:     String,
  pub synonyms: Vec<String>,
}

impl NameSynonymEntry {
  pub fn new<I, S>(name: impl Into<String>, synonyms: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      name:     name.into(),
      synonyms: synonyms.into_iter().map(Into::into).collect(),
    }
  }
}

/// Fold entries whose names differ only by case (or surrounding whitespace)
/// into one, keeping the first spelling and the union of their synonyms in
/// first-seen order. Blank names and synonyms are dropped.
pub fn merge_entries(entries: &[NameSynonymEntry]) -> Vec<NameSynonymEntry> {
  let mut merged: Vec<NameSynonymEntry> = Vec::new();
  let mut by_name: HashMap<String, usize> = HashMap::new();

  for entry in entries {
    let name = entry.name.trim();
    if name.is_empty() {
      continue;
    }
    let slot = *by_name.entry(name.to_lowercase()).or_insert_with(|| {
      merged.push(NameSynonymEntry { name: name.to_owned(), synonyms: Vec::new() });
      merged.len() - 1
    });
    let target = &mut merged[slot];
    for synonym in &entry.synonyms {
      let synonym = synonym.trim();
      let folded = synonym.to_lowercase();
      if synonym.is_empty() || target.synonyms.iter().any(|s| s.to_lowercase() == folded) {
        continue;
      }
      target.synonyms.push(synonym.to_owned());
    }
  }

  merged
}

/// Lowercased name → every other name it is interchangeable with.
#[derive(Debug, Default)]
struct Snapshot {
  groups:      HashMap<String, BTreeSet<String>>,
  entry_count: usize,
}

impl Snapshot {
  fn build(entries: &[NameSynonymEntry]) -> Self {
    let mut groups: HashMap<String, BTreeSet<String>> = HashMap::new();

    for entry in entries {
      // The canonical name and its synonyms form one equivalence group.
      let members: BTreeSet<String> = std::iter::once(&entry.name)
        .chain(entry.synonyms.iter())
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

      for member in &members {
        let others = groups.entry(member.clone()).or_default();
        others.extend(members.iter().filter(|m| *m != member).cloned());
      }
    }

    Self { groups, entry_count: entries.len() }
  }
}

/// Read-mostly synonym lookup, safe to share across threads.
#[derive(Debug)]
pub struct NameSynonymDictionary {
  snapshot: ArcSwap<Snapshot>,
}

impl Default for NameSynonymDictionary {
  fn default() -> Self { Self::empty() }
}

impl NameSynonymDictionary {
  pub fn empty() -> Self {
    Self { snapshot: ArcSwap::from_pointee(Snapshot::default()) }
  }

  pub fn from_entries(entries: &[NameSynonymEntry]) -> Self {
    Self { snapshot: ArcSwap::from_pointee(Snapshot::build(entries)) }
  }

  /// Replace the whole dictionary.
  pub fn refresh(&self, entries: &[NameSynonymEntry]) {
    self.snapshot.store(Arc::new(Snapshot::build(entries)));
  }

  /// Every accepted alternate form of `name`, lowercased, excluding `name`
  /// itself. Comparison is case-insensitive.
  pub fn lookup(&self, name: &str) -> BTreeSet<String> {
    let key = name.trim().to_lowercase();
    self
      .snapshot
      .load()
      .groups
      .get(&key)
      .cloned()
      .unwrap_or_default()
  }

  /// Number of reference rows the current snapshot was built from.
  pub fn len(&self) -> usize { self.snapshot.load().entry_count }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}
