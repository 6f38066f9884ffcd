//! Name normalisation: splitting free text into a canonical triple and
//! expanding names into searchable tokens.
//!
//! Every function here is pure and total. Legacy free-text names must always
//! be storable, so odd input degrades to a best-effort split instead of an
//! error. The rules are deterministic because resynchronisation relies on
//! recomputing identical output from identical input.

use std::{collections::BTreeSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
  person::{NameInput, PersonName},
  synonym::NameSynonymDictionary,
};

/// Surname particles kept attached to the final token when splitting.
pub const DEFAULT_PARTICLES: &[&str] = &[
  "al", "ap", "bin", "da", "das", "de", "del", "della", "den", "der", "di",
  "dos", "du", "el", "ibn", "la", "le", "san", "st", "ten", "ter", "van",
  "von",
];

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
  /// Compound-surname particles, matched case-insensitively.
  pub particles: Vec<String>,
}

impl Default for NormalizerConfig {
  fn default() -> Self {
    Self {
      particles: DEFAULT_PARTICLES.iter().map(|p| (*p).to_owned()).collect(),
    }
  }
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

/// Searchable forms of one name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameTokens {
  /// Lowercased tokens that literally occur in the name.
  pub tokens:   BTreeSet<String>,
  /// Dictionary synonyms of those tokens that are not tokens themselves.
  pub synonyms: BTreeSet<String>,
}

impl NameTokens {
  /// Tokens and synonyms together.
  pub fn all(&self) -> BTreeSet<String> {
    self.tokens.union(&self.synonyms).cloned().collect()
  }
}

// ─── Normalizer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NameNormalizer {
  particles:  BTreeSet<String>,
  dictionary: Arc<NameSynonymDictionary>,
}

impl Default for NameNormalizer {
  fn default() -> Self {
    Self::new(
      &NormalizerConfig::default(),
      Arc::new(NameSynonymDictionary::empty()),
    )
  }
}

impl NameNormalizer {
  pub fn new(
    config: &NormalizerConfig,
    dictionary: Arc<NameSynonymDictionary>,
  ) -> Self {
    let particles = config
      .particles
      .iter()
      .map(|p| p.trim().to_lowercase())
      .filter(|p| !p.is_empty())
      .collect();
    Self { particles, dictionary }
  }

  pub fn dictionary(&self) -> &Arc<NameSynonymDictionary> { &self.dictionary }

  fn is_particle(&self, token: &str) -> bool {
    self.particles.contains(&token.to_lowercase())
  }

  /// Split a raw full name into `(first, middle, last)`.
  ///
  /// - no tokens: all fields empty
  /// - one token: last name only
  /// - two tokens: first and last
  /// - three or more: first token, then the final token together with any
  ///   run of particles directly before it as the last name, and everything
  ///   in between as the middle name
  pub fn split(&self, raw: &str) -> PersonName {
    let tokens: Vec<&str> = raw.split_whitespace().collect();

    match tokens.as_slice() {
      [] => PersonName::default(),
      [last] => PersonName::new("", "", *last),
      [first, last] => PersonName::new(*first, "", *last),
      [first, rest @ ..] => {
        // `rest` has at least two tokens; the final one always belongs to
        // the surname. The first name is never read as a particle.
        let mut surname_start = rest.len() - 1;
        while surname_start > 0 && self.is_particle(rest[surname_start - 1]) {
          surname_start -= 1;
        }
        PersonName::new(
          *first,
          rest[..surname_start].join(" "),
          rest[surname_start..].join(" "),
        )
      }
    }
  }

  /// Normalise a name supplied on the write path.
  pub fn normalize(&self, input: &NameInput) -> PersonName {
    match input {
      NameInput::Full(raw) => self.split(raw),
      NameInput::Parts(parts) => PersonName::new(
        collapse_whitespace(&parts.first),
        collapse_whitespace(&parts.middle),
        collapse_whitespace(&parts.last),
      ),
    }
  }

  /// Tokens and synonyms for a name, kept apart so callers can index them
  /// under different attribute types.
  pub fn tokens(&self, name: &str) -> NameTokens {
    let tokens = tokenize(name);
    let synonyms = tokens
      .iter()
      .flat_map(|t| self.dictionary.lookup(t))
      .filter(|s| !tokens.contains(s))
      .collect();
    NameTokens { tokens, synonyms }
  }

  /// Every lowercased token of `name` plus every dictionary synonym of those
  /// tokens, so that "Bob" also indexes under "robert".
  pub fn expand_tokens(&self, name: &str) -> BTreeSet<String> {
    self.tokens(name).all()
  }
}

/// Lowercased whitespace tokens. A hyphenated token is kept whole and each
/// of its non-empty parts is added as well.
pub fn tokenize(name: &str) -> BTreeSet<String> {
  let mut out = BTreeSet::new();
  for token in name.split_whitespace() {
    let token = token.to_lowercase();
    if token.contains('-') {
      out.extend(
        token
          .split('-')
          .filter(|part| !part.is_empty())
          .map(str::to_owned),
      );
    }
    if token.chars().any(char::is_alphanumeric) {
      out.insert(token);
    }
  }
  out
}

fn collapse_whitespace(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}
