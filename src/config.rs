//! Configuration: optional TOML file (prompts + quota tuning) and environment lookups.
//!
//! See `AppConfig`, `Prompts` and `QuotaConfig` for the expected schema. Secrets
//! and endpoints come from the environment only.

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::quota::QuotaLimits;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub quota: QuotaConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
  pub generate_daily_limit: u32,
  pub submit_daily_limit: u32,
  /// Upper bound for a single call to the shared store before falling back.
  pub store_timeout_ms: u64,
  /// Most recent days kept by the in-process fallback store.
  pub fallback_retention_days: u64,
}

impl Default for QuotaConfig {
  fn default() -> Self {
    Self { generate_daily_limit: 5, submit_daily_limit: 5, store_timeout_ms: 500, fallback_retention_days: 2 }
  }
}

impl QuotaConfig {
  pub fn limits(&self) -> QuotaLimits {
    QuotaLimits { generate: self.generate_daily_limit, submit: self.submit_daily_limit }
  }
}

/// Prompt templates. `{name}` placeholders are filled by `util::fill_template`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  /// Placeholders: teacher, teacher_style, level, skill, reason_context, age_group, age,
  /// module_lesson, exercises, avoid_phrases, avoid_vocab.
  pub lesson_template: String,
  /// Placeholders: level, skill, reason, answer, class_plan.
  pub feedback_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      lesson_template: "You are {teacher}, an ESL teacher known for {teacher_style}. \
Write a {level} lesson on {skill} for a {age_group} (age {age}) {reason_context}. Module lesson: {module_lesson}.\n\
Reply in markdown with the sections: ## Welcome, ## Mini-lesson (a 3-column table), ## Quick Check, \
## Interactive Practice, ## Role-Play Challenge, ## Practice Task, ## Exercises, ## Vocabulary (8+ words), \
## Badge (one line: 🏅 **Badge Name**), ## Feedback.\n\
Exercises to adapt:\n{exercises}\n\
Do not reuse these phrases: {avoid_phrases}. Do not reuse these words: {avoid_vocab}.".into(),
      feedback_template: "A {level} learner working on {skill} ({reason}) answered:\n{answer}\n\n\
Lesson context:\n{class_plan}\n\n\
Give 2-3 sentences of constructive feedback in markdown about their {skill}.".into(),
    }
  }
}

/// Attempt to load `AppConfig` from ARCADE_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_app_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("ARCADE_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "arcade_backend", %path, "Loaded app config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "arcade_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "arcade_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

/// Redis connection URL: REDIS_URL as-is, otherwise assembled from REDIS_HOST/PORT/USERNAME/PASSWORD.
/// TLS is on unless REDIS_TLS is "false" or "0". None when neither REDIS_URL nor REDIS_HOST is set.
pub fn redis_url_from_env() -> Option<String> {
  if let Ok(url) = std::env::var("REDIS_URL") {
    if !url.is_empty() { return Some(url); }
  }
  let host = std::env::var("REDIS_HOST").ok().filter(|h| !h.is_empty())?;
  let port = std::env::var("REDIS_PORT").ok().and_then(|p| p.parse::<u16>().ok()).unwrap_or(6379);
  let username = std::env::var("REDIS_USERNAME").unwrap_or_else(|_| "default".into());
  let password = std::env::var("REDIS_PASSWORD").ok();
  let tls = !matches!(std::env::var("REDIS_TLS").as_deref(), Ok("false") | Ok("0"));
  Some(build_redis_url(&host, port, &username, password.as_deref(), tls))
}

pub fn build_redis_url(host: &str, port: u16, username: &str, password: Option<&str>, tls: bool) -> String {
  let scheme = if tls { "rediss" } else { "redis" };
  match password {
    Some(pw) if !pw.is_empty() => format!("{}://{}:{}@{}:{}", scheme, username, pw, host, port),
    _ => format!("{}://{}:{}", scheme, host, port),
  }
}

/// FIREBASE_PROJECT_ID, else `project_id` from the FIREBASE_SERVICE_ACCOUNT_JSON blob.
pub fn firebase_project_id_from_env() -> Option<String> {
  if let Ok(id) = std::env::var("FIREBASE_PROJECT_ID") {
    if !id.is_empty() { return Some(id); }
  }
  let blob = std::env::var("FIREBASE_SERVICE_ACCOUNT_JSON").ok()?;
  let id = project_id_from_service_account(&blob);
  if id.is_none() {
    warn!(target: "arcade_backend", "FIREBASE_SERVICE_ACCOUNT_JSON has no usable project_id");
  }
  id
}

pub fn project_id_from_service_account(json: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct ServiceAccount { project_id: String }
  serde_json::from_str::<ServiceAccount>(json).ok().map(|sa| sa.project_id).filter(|id| !id.is_empty())
}

pub const DEFAULT_CORS_ORIGINS: &str = "http://localhost:3000,http://127.0.0.1:3000";

/// CORS_ALLOWED_ORIGINS as a list (comma separated).
pub fn cors_origins_from_env() -> Vec<String> {
  let raw = std::env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.into());
  parse_origins(&raw)
}

pub fn parse_origins(raw: &str) -> Vec<String> {
  raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg: AppConfig = toml::from_str("[quota]\ngenerate_daily_limit = 10\n").unwrap();
    assert_eq!(cfg.quota.generate_daily_limit, 10);
    assert_eq!(cfg.quota.submit_daily_limit, 5);
    assert_eq!(cfg.quota.fallback_retention_days, 2);
    assert!(cfg.prompts.lesson_template.contains("{teacher}"));
  }

  #[test]
  fn prompts_can_be_overridden() {
    let cfg: AppConfig = toml::from_str("[prompts]\nfeedback_template = \"Rate: {answer}\"\n").unwrap();
    assert_eq!(cfg.prompts.feedback_template, "Rate: {answer}");
    assert!(cfg.prompts.lesson_template.contains("## Badge"));
  }

  #[test]
  fn redis_urls() {
    assert_eq!(build_redis_url("cache.local", 6380, "default", Some("pw"), true), "rediss://default:pw@cache.local:6380");
    assert_eq!(build_redis_url("localhost", 6379, "default", None, false), "redis://localhost:6379");
  }

  #[test]
  fn service_account_project_id() {
    assert_eq!(project_id_from_service_account(r#"{"type":"service_account","project_id":"arcade-1"}"#).as_deref(), Some("arcade-1"));
    assert_eq!(project_id_from_service_account("{}"), None);
  }

  #[test]
  fn origins_are_split_and_trimmed() {
    assert_eq!(parse_origins(" https://a.com , ,https://b.com"), vec!["https://a.com", "https://b.com"]);
    assert_eq!(parse_origins(DEFAULT_CORS_ORIGINS).len(), 2);
  }
}
