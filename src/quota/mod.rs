//! Daily usage quota per (action, subject).
//!
//! `QuotaLedger` is built once at startup and shared by the request handlers.
//! It owns the counter stores and a clock; "today" is recomputed on every call
//! from the clock as a UTC date.
//!
//! Consumption is charged on attempt: a unit taken by `check_and_consume` is
//! not given back if the gated work fails afterwards.

pub mod clock;
pub mod memory;
pub mod redis_store;
pub mod store;

use std::{fmt, sync::Arc};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use self::clock::{next_day_start, reference_day, Clock};
use self::store::{FailoverStore, Increment};

/// Quota pools. Each action has its own counter per subject and day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
  Generate,
  Submit,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Action::Generate => "generate",
      Action::Submit => "submit",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UsageKey {
  pub action: Action,
  pub subject: String,
  pub day: NaiveDate,
}

impl UsageKey {
  pub fn new(action: Action, subject: &str, day: NaiveDate) -> Self {
    Self { action, subject: subject.to_string(), day }
  }

  /// Key text in the networked store, e.g. `generate_calls:uid:2024-05-01`.
  pub fn storage_key(&self) -> String {
    format!("{}_calls:{}:{}", self.action, self.subject, self.day.format("%Y-%m-%d"))
  }
}

impl fmt::Display for UsageKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.storage_key()) }
}

/// Daily ceilings per action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuotaLimits {
  pub generate: u32,
  pub submit: u32,
}

impl Default for QuotaLimits {
  fn default() -> Self { Self { generate: 5, submit: 5 } }
}

impl QuotaLimits {
  pub fn ceiling(&self, action: Action) -> u32 {
    match action {
      Action::Generate => self.generate,
      Action::Submit => self.submit,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
  /// Expected and user facing: the subject used all of today's units.
  #[error("Daily {action} limit ({ceiling}) reached. Try again tomorrow.")]
  Exceeded { action: Action, ceiling: u32, resets_at: DateTime<Utc> },
}

/// Remaining units for every action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RemainingByAction {
  pub generate: u32,
  pub submit: u32,
}

pub struct QuotaLedger {
  store: FailoverStore,
  clock: Arc<dyn Clock>,
  limits: QuotaLimits,
}

impl QuotaLedger {
  pub fn new(store: FailoverStore, clock: Arc<dyn Clock>, limits: QuotaLimits) -> Self {
    Self { store, clock, limits }
  }

  pub fn has_shared_store(&self) -> bool { self.store.has_primary() }

  /// Start of the next reference day, when every counter resets.
  pub fn resets_at(&self) -> DateTime<Utc> {
    next_day_start(reference_day(self.clock.now()))
  }

  /// Whole seconds until `resets_at`, never negative.
  pub fn seconds_until_reset(&self) -> i64 {
    self.seconds_until(self.resets_at())
  }

  /// Whole seconds from now until `at`, never negative.
  pub fn seconds_until(&self, at: DateTime<Utc>) -> i64 {
    (at - self.clock.now()).num_seconds().max(0)
  }

  /// Take one unit of `action` for `subject`, returning how many are left today.
  #[instrument(level = "debug", skip(self), fields(%action))]
  pub async fn check_and_consume(&self, action: Action, subject: &str) -> Result<u32, QuotaError> {
    let day = reference_day(self.clock.now());
    let key = UsageKey::new(action, subject, day);
    let ceiling = self.limits.ceiling(action);
    let resets_at = next_day_start(day);

    let (outcome, tier) = self.store.increment_with_expiry(&key, ceiling, resets_at).await;
    match outcome {
      Increment::Applied(count) => {
        let remaining = ceiling.saturating_sub(count);
        debug!(target: "quota", %key, count, remaining, ?tier, "Quota unit consumed");
        Ok(remaining)
      }
      Increment::AtCeiling(count) => {
        info!(target: "quota", %key, count, ceiling, ?tier, "Daily quota exhausted");
        Err(QuotaError::Exceeded { action, ceiling, resets_at })
      }
    }
  }

  /// Units left today without consuming any.
  #[instrument(level = "debug", skip(self), fields(%action))]
  pub async fn peek_remaining(&self, action: Action, subject: &str) -> u32 {
    let key = UsageKey::new(action, subject, reference_day(self.clock.now()));
    let (count, _) = self.store.get(&key).await;
    self.limits.ceiling(action).saturating_sub(count)
  }

  pub async fn remaining_all(&self, subject: &str) -> RemainingByAction {
    RemainingByAction {
      generate: self.peek_remaining(Action::Generate, subject).await,
      submit: self.peek_remaining(Action::Submit, subject).await,
    }
  }
}
