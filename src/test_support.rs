//! Fakes shared by the unit tests: a token table instead of Firebase and a
//! scripted model instead of OpenAI.

use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::auth::{AuthError, IdentityVerifier};
use crate::config::Prompts;
use crate::openai::{CompletionError, CompletionProvider};
use crate::quota::clock::ManualClock;
use crate::quota::memory::MemoryCounterStore;
use crate::quota::store::{CounterStore, FailoverStore};
use crate::quota::{QuotaLedger, QuotaLimits};
use crate::state::AppState;

/// Accepts `token-<uid>` and yields `<uid>`.
pub struct TokenTable;

#[async_trait]
impl IdentityVerifier for TokenTable {
  async fn verify(&self, token: &str) -> Result<String, AuthError> {
    token
      .strip_prefix("token-")
      .filter(|uid| !uid.is_empty())
      .map(String::from)
      .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
  }
}

enum Reply {
  Text(String),
  Unavailable,
  RateLimited,
}

pub struct ScriptedProvider {
  reply: Reply,
  calls: AtomicUsize,
}

impl ScriptedProvider {
  pub fn ok(text: &str) -> Self { Self { reply: Reply::Text(text.into()), calls: AtomicUsize::new(0) } }
  pub fn unavailable() -> Self { Self { reply: Reply::Unavailable, calls: AtomicUsize::new(0) } }
  pub fn rate_limited() -> Self { Self { reply: Reply::RateLimited, calls: AtomicUsize::new(0) } }
  pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
  async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match &self.reply {
      Reply::Text(t) => Ok(t.clone()),
      Reply::Unavailable => Err(CompletionError::Http("connection reset".into())),
      Reply::RateLimited => Err(CompletionError::RateLimited("slow down".into())),
    }
  }
}

pub fn test_clock() -> Arc<ManualClock> {
  Arc::new(ManualClock::at(Utc.with_ymd_and_hms(2024, 5, 1, 22, 0, 0).unwrap()))
}

pub fn test_state_with(
  provider: ScriptedProvider,
  primary: Option<Arc<dyn CounterStore>>,
  clock: Arc<ManualClock>,
) -> (AppState, Arc<ScriptedProvider>) {
  let provider = Arc::new(provider);
  let store = FailoverStore::new(primary, MemoryCounterStore::new(2), Duration::from_secs(1));
  let ledger = QuotaLedger::new(store, clock, QuotaLimits::default());
  let state = AppState::new(ledger, Arc::new(TokenTable), provider.clone(), Prompts::default());
  (state, provider)
}

pub fn test_state(provider: ScriptedProvider) -> (AppState, Arc<ScriptedProvider>) {
  test_state_with(provider, None, test_clock())
}
