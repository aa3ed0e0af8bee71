//! Application state: quota ledger, identity verifier, completion provider and prompts.
//!
//! Built once at startup and shared with every handler behind an `Arc`.
//! If Redis cannot be reached at startup the ledger serves from the in-process
//! fallback store and keeps trying Redis; counts taken meanwhile are per process.

use std::{sync::Arc, time::Duration};

use tracing::{info, instrument, warn};

use crate::auth::{FirebaseVerifier, IdentityVerifier};
use crate::config::{firebase_project_id_from_env, load_app_config_from_env, redis_url_from_env, Prompts, QuotaConfig};
use crate::openai::{CompletionProvider, OpenAI};
use crate::quota::clock::SystemClock;
use crate::quota::memory::MemoryCounterStore;
use crate::quota::redis_store::RedisCounterStore;
use crate::quota::store::{CounterStore, FailoverStore};
use crate::quota::QuotaLedger;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("OPENAI_API_KEY not set")]
    MissingOpenAiKey,
    #[error("Firebase project id not configured (FIREBASE_PROJECT_ID or FIREBASE_SERVICE_ACCOUNT_JSON)")]
    MissingFirebaseProject,
}

pub struct AppState {
    pub ledger: QuotaLedger,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub llm: Arc<dyn CompletionProvider>,
    pub prompts: Prompts,
}

impl AppState {
    pub fn new(
        ledger: QuotaLedger,
        verifier: Arc<dyn IdentityVerifier>,
        llm: Arc<dyn CompletionProvider>,
        prompts: Prompts,
    ) -> Self {
        Self { ledger, verifier, llm, prompts }
    }

    /// Build state from env: load config, connect the counter store, init OpenAI and Firebase.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env() -> Result<Self, StartupError> {
        let cfg = load_app_config_from_env().unwrap_or_default();

        let openai = OpenAI::from_env().ok_or(StartupError::MissingOpenAiKey)?;
        info!(target: "arcade_backend", base_url = %openai.base_url, model = %openai.model, "OpenAI enabled.");

        let project_id = firebase_project_id_from_env().ok_or(StartupError::MissingFirebaseProject)?;
        info!(target: "arcade_backend", %project_id, "Firebase token verification enabled.");
        let verifier = FirebaseVerifier::new(project_id, openai.client.clone());

        let ledger = build_ledger(&cfg.quota).await;

        Ok(Self::new(ledger, Arc::new(verifier), Arc::new(openai), cfg.prompts))
    }
}

/// Between connection attempts while Redis is unreachable.
const REDIS_RECONNECT_EVERY: Duration = Duration::from_secs(5);

async fn build_ledger(cfg: &QuotaConfig) -> QuotaLedger {
    let fallback = MemoryCounterStore::new(cfg.fallback_retention_days);
    let timeout = Duration::from_millis(cfg.store_timeout_ms);

    let primary: Option<Arc<dyn CounterStore>> = match redis_url_from_env() {
        Some(url) => match RedisCounterStore::new(&url, timeout, REDIS_RECONNECT_EVERY) {
            Ok(store) => {
                if let Err(e) = store.warm_up().await {
                    warn!(target: "quota", error = %e, "Redis not reachable yet; serving from in-process counters until it is");
                }
                Some(Arc::new(store))
            }
            Err(e) => {
                warn!(target: "quota", error = %e, "Invalid Redis configuration; using in-process quota counters only");
                None
            }
        },
        None => {
            warn!(target: "quota", "No Redis configured; using in-process quota counters (single-instance only)");
            None
        }
    };

    let store = match primary {
        Some(p) => FailoverStore::new(Some(p), fallback, timeout),
        None => FailoverStore::fallback_only(fallback),
    };

    let limits = cfg.limits();
    info!(target: "quota", generate = limits.generate, submit = limits.submit, shared = store.has_primary(), "Quota ledger ready");
    QuotaLedger::new(store, Arc::new(SystemClock), limits)
}
