//! Runtime tuning for [`crate::SqliteStore`].

use std::time::Duration;

use serde::Deserialize;

/// Deserialised from the `[store]` table of the admin configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// How long a connection waits on another connection's write lock.
  pub busy_timeout_ms:    u64,
  /// Range claims tried inside one unit of work before giving up on it.
  pub claim_attempts:     u32,
  /// Times a unit of work is re-run after transient contention.
  pub contention_retries: u32,
  pub backoff_base_ms:    u64,
  pub backoff_max_ms:     u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      busy_timeout_ms:    5_000,
      claim_attempts:     5,
      contention_retries: 5,
      backoff_base_ms:    10,
      backoff_max_ms:     500,
    }
  }
}

impl StoreConfig {
  pub fn busy_timeout(&self) -> Duration { Duration::from_millis(self.busy_timeout_ms) }

  /// Exponential backoff before retry number `attempt` (zero-based).
  pub fn backoff(&self, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(
      self.backoff_base_ms.saturating_mul(factor).min(self.backoff_max_ms),
    )
  }
}
