//! Time source for the quota ledger.
//!
//! The ledger asks the clock for "now" on every call and derives the reference
//! day (UTC date) from it. Tests swap in `ManualClock` to cross day boundaries.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// Reference day for a point in time. No timezone adjustment: usage is bucketed by UTC date.
pub fn reference_day(at: DateTime<Utc>) -> NaiveDate {
  at.date_naive()
}

/// Start of the day after `day`, i.e. the moment a counter for `day` stops being reachable.
pub fn next_day_start(day: NaiveDate) -> DateTime<Utc> {
  let next = day.checked_add_days(Days::new(1)).unwrap_or(NaiveDate::MAX);
  next.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
pub use manual::ManualClock;
