//! Counter store capability and the primary/fallback supervisor.
//!
//! A store answers two questions for a `UsageKey`: what is the count, and
//! "increment it unless it already reached the ceiling, then expire it at X".
//! The second one must be atomic per key.
//!
//! `FailoverStore` always tries the networked primary first. Any transport
//! fault (or a call that exceeds the timeout) is logged once at `warn` and the
//! same operation is repeated on the in-process fallback. Counts are never
//! reconciled between the two.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::memory::MemoryCounterStore;
use super::UsageKey;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("store unreachable: {0}")]
  Unavailable(String),
  #[error("store call timed out after {0:?}")]
  Timeout(Duration),
  #[error("unexpected store reply: {0}")]
  Protocol(String),
}

/// Result of the atomic gated increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Increment {
  /// Count was below the ceiling and is now this value.
  Applied(u32),
  /// Count was already at (or above) the ceiling; nothing changed.
  AtCeiling(u32),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
  /// Current count, 0 when the key does not exist.
  async fn get(&self, key: &UsageKey) -> Result<u32, StoreError>;

  /// Atomically: if count < ceiling, add one and make the key expire at `expire_at`.
  async fn increment_with_expiry(
    &self,
    key: &UsageKey,
    ceiling: u32,
    expire_at: DateTime<Utc>,
  ) -> Result<Increment, StoreError>;

  /// Short name for logs.
  fn name(&self) -> &'static str;
}

/// Which tier answered a call. Exposed for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tier {
  Primary,
  Fallback,
}

pub struct FailoverStore {
  primary: Option<Arc<dyn CounterStore>>,
  fallback: MemoryCounterStore,
  timeout: Duration,
}

impl FailoverStore {
  pub fn new(primary: Option<Arc<dyn CounterStore>>, fallback: MemoryCounterStore, timeout: Duration) -> Self {
    Self { primary, fallback, timeout }
  }

  /// Fallback only; used when no networked store could be set up.
  pub fn fallback_only(fallback: MemoryCounterStore) -> Self {
    Self { primary: None, fallback, timeout: Duration::from_millis(0) }
  }

  pub fn has_primary(&self) -> bool { self.primary.is_some() }

  #[cfg(test)]
  pub fn fallback(&self) -> &MemoryCounterStore { &self.fallback }

  pub async fn get(&self, key: &UsageKey) -> (u32, Tier) {
    if let Some(primary) = &self.primary {
      match self.bounded(primary.get(key)).await {
        Ok(count) => return (count, Tier::Primary),
        Err(e) => {
          warn!(target: "quota", store = primary.name(), key = %key, error = %e, "Primary counter store failed on read; using in-process fallback");
        }
      }
    }
    let count = self.fallback.count(key).await;
    debug!(target: "quota", key = %key, count, "Read served by fallback store");
    (count, Tier::Fallback)
  }

  pub async fn increment_with_expiry(
    &self,
    key: &UsageKey,
    ceiling: u32,
    expire_at: DateTime<Utc>,
  ) -> (Increment, Tier) {
    if let Some(primary) = &self.primary {
      match self.bounded(primary.increment_with_expiry(key, ceiling, expire_at)).await {
        Ok(outcome) => return (outcome, Tier::Primary),
        Err(e) => {
          warn!(target: "quota", store = primary.name(), key = %key, error = %e, "Primary counter store failed on increment; using in-process fallback");
        }
      }
    }
    let outcome = self.fallback.increment_below(key, ceiling).await;
    debug!(target: "quota", key = %key, ?outcome, "Increment served by fallback store");
    (outcome, Tier::Fallback)
  }

  async fn bounded<T>(
    &self,
    call: impl std::future::Future<Output = Result<T, StoreError>>,
  ) -> Result<T, StoreError> {
    match tokio::time::timeout(self.timeout, call).await {
      Ok(res) => res,
      Err(_) => Err(StoreError::Timeout(self.timeout)),
    }
  }
}
