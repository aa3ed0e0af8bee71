//! In-process counter map, the fallback tier of the ledger.
//!
//! Not shared between processes: while the networked store is down each
//! instance enforces its own ceiling. Keys older than the retention window are
//! swept the first time a newer day is seen.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use super::store::{CounterStore, Increment, StoreError};
use super::UsageKey;

#[derive(Default)]
struct Counters {
  by_key: HashMap<UsageKey, u32>,
  newest_day: Option<NaiveDate>,
}

pub struct MemoryCounterStore {
  counters: Mutex<Counters>,
  retention_days: u64,
}

impl MemoryCounterStore {
  /// `retention_days` is how many of the most recent days are kept (at least 1).
  pub fn new(retention_days: u64) -> Self {
    Self { counters: Mutex::new(Counters::default()), retention_days: retention_days.max(1) }
  }

  pub async fn count(&self, key: &UsageKey) -> u32 {
    let counters = self.counters.lock().await;
    counters.by_key.get(key).copied().unwrap_or(0)
  }

  /// Check and increment under one lock.
  pub async fn increment_below(&self, key: &UsageKey, ceiling: u32) -> Increment {
    let mut counters = self.counters.lock().await;
    self.sweep_if_new_day(&mut counters, key.day);

    let count = counters.by_key.entry(key.clone()).or_insert(0);
    if *count >= ceiling {
      return Increment::AtCeiling(*count);
    }
    *count += 1;
    Increment::Applied(*count)
  }

  #[cfg(test)]
  pub async fn len(&self) -> usize {
    self.counters.lock().await.by_key.len()
  }

  fn sweep_if_new_day(&self, counters: &mut Counters, day: NaiveDate) {
    if counters.newest_day.is_some_and(|newest| newest >= day) {
      return;
    }
    counters.newest_day = Some(day);

    let Some(oldest_kept) = day.checked_sub_days(Days::new(self.retention_days - 1)) else { return };
    let before = counters.by_key.len();
    counters.by_key.retain(|k, _| k.day >= oldest_kept);
    let swept = before - counters.by_key.len();
    if swept > 0 {
      debug!(target: "quota", swept, %oldest_kept, "Swept stale fallback counters");
    }
  }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
  async fn get(&self, key: &UsageKey) -> Result<u32, StoreError> {
    Ok(self.count(key).await)
  }

  async fn increment_with_expiry(&self, key: &UsageKey, ceiling: u32, _expire_at: DateTime<Utc>) -> Result<Increment, StoreError> {
    Ok(self.increment_below(key, ceiling).await)
  }

  fn name(&self) -> &'static str { "memory" }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::quota::Action;

  fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
  }

  #[tokio::test]
  async fn missing_key_reads_zero() {
    let store = MemoryCounterStore::new(2);
    assert_eq!(store.count(&UsageKey::new(Action::Submit, "u", day(1))).await, 0);
    assert_eq!(store.len().await, 0);
  }

  #[tokio::test]
  async fn stops_at_ceiling() {
    let store = MemoryCounterStore::new(2);
    let key = UsageKey::new(Action::Generate, "u", day(1));
    assert_eq!(store.increment_below(&key, 2).await, Increment::Applied(1));
    assert_eq!(store.increment_below(&key, 2).await, Increment::Applied(2));
    assert_eq!(store.increment_below(&key, 2).await, Increment::AtCeiling(2));
    assert_eq!(store.count(&key).await, 2);
  }

  #[tokio::test]
  async fn sweeps_days_outside_retention() {
    let store = MemoryCounterStore::new(2);
    let d1 = UsageKey::new(Action::Generate, "u", day(1));
    let d2 = UsageKey::new(Action::Generate, "u", day(2));
    let d3 = UsageKey::new(Action::Generate, "u", day(3));

    store.increment_below(&d1, 5).await;
    store.increment_below(&d2, 5).await;
    assert_eq!(store.len().await, 2);

    store.increment_below(&d3, 5).await;
    assert_eq!(store.count(&d1).await, 0);
    assert_eq!(store.count(&d2).await, 1);
    assert_eq!(store.len().await, 2);
  }

  #[tokio::test]
  async fn late_write_for_older_day_does_not_sweep() {
    let store = MemoryCounterStore::new(1);
    let d2 = UsageKey::new(Action::Generate, "u", day(2));
    let d1 = UsageKey::new(Action::Generate, "u", day(1));
    store.increment_below(&d2, 5).await;
    store.increment_below(&d1, 5).await;
    assert_eq!(store.count(&d2).await, 1);
  }

  #[tokio::test]
  async fn works_through_the_store_trait() {
    let store: &dyn CounterStore = &MemoryCounterStore::new(2);
    let key = UsageKey::new(Action::Submit, "u", day(1));
    assert_eq!(store.increment_with_expiry(&key, 1, Utc::now()).await.unwrap(), Increment::Applied(1));
    assert_eq!(store.get(&key).await.unwrap(), 1);
    assert_eq!(store.name(), "memory");
  }
}
