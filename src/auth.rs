//! Bearer-token authentication.
//!
//! `FirebaseVerifier` checks Firebase ID tokens (RS256 JWTs) against Google's
//! published securetoken keys, cached for the response's `max-age`. Handlers receive the
//! verified subject through the `AuthUser` extractor.

use std::{sync::Arc, time::{Duration, Instant}};

use async_trait::async_trait;
use axum::{
  extract::FromRequestParts,
  http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::ApiError;
use crate::state::AppState;

pub const FIREBASE_JWKS_URL: &str =
  "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
  #[error("Invalid or missing Authorization header. Expected 'Bearer <token>'")]
  MissingToken,
  #[error("Invalid or expired token")]
  InvalidToken(String),
  #[error("Could not fetch signing keys")]
  KeysUnavailable(String),
}

/// Maps a bearer credential to a stable subject id.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
  async fn verify(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
  sub: String,
}

#[derive(Clone, Debug, Deserialize)]
struct Jwk {
  kid: String,
  n: String,
  e: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
  keys: Vec<Jwk>,
}

struct CachedKeys {
  keys: Vec<Jwk>,
  fetched_at: Instant,
  ttl: Duration,
}

impl CachedKeys {
  fn fresh(&self) -> bool { self.fetched_at.elapsed() < self.ttl }
}

pub struct FirebaseVerifier {
  project_id: String,
  jwks_url: String,
  client: reqwest::Client,
  default_ttl: Duration,
  /// Unknown `kid`s force a refetch only when the cached set is older than this.
  min_refresh: Duration,
  cache: RwLock<Option<CachedKeys>>,
}

impl FirebaseVerifier {
  pub fn new(project_id: String, client: reqwest::Client) -> Self {
    Self {
      project_id,
      jwks_url: FIREBASE_JWKS_URL.to_string(),
      client,
      default_ttl: Duration::from_secs(3600),
      min_refresh: Duration::from_secs(60),
      cache: RwLock::new(None),
    }
  }

  fn validation(&self) -> Validation {
    let mut v = Validation::new(Algorithm::RS256);
    v.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
    v.set_audience(&[&self.project_id]);
    v
  }

  async fn keys(&self) -> Result<Vec<Jwk>, AuthError> {
    {
      let cache = self.cache.read().await;
      if let Some(c) = cache.as_ref().filter(|c| c.fresh()) {
        return Ok(c.keys.clone());
      }
    }

    let mut cache = self.cache.write().await;
    if let Some(c) = cache.as_ref().filter(|c| c.fresh()) {
      return Ok(c.keys.clone());
    }
    let fetched = self.fetch().await?;
    let keys = fetched.keys.clone();
    *cache = Some(fetched);
    Ok(keys)
  }

  /// Refetch after a `kid` miss, unless the cached set was fetched very recently.
  async fn refresh_for_unknown_kid(&self, kid: &str) -> Result<Option<Vec<Jwk>>, AuthError> {
    let mut cache = self.cache.write().await;
    if let Some(c) = cache.as_ref() {
      if c.keys.iter().any(|k| k.kid == kid) {
        return Ok(Some(c.keys.clone()));
      }
      if c.fetched_at.elapsed() < self.min_refresh {
        return Ok(None);
      }
    }
    debug!(target: "auth", %kid, "Unknown signing key id; refetching keys");
    let fetched = self.fetch().await?;
    let keys = fetched.keys.clone();
    *cache = Some(fetched);
    Ok(Some(keys))
  }

  async fn fetch(&self) -> Result<CachedKeys, AuthError> {
    let res = self.client.get(&self.jwks_url).send().await
      .and_then(|r| r.error_for_status())
      .map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;
    let ttl = res.headers()
      .get(reqwest::header::CACHE_CONTROL)
      .and_then(|v| v.to_str().ok())
      .and_then(max_age)
      .unwrap_or(self.default_ttl);
    let set = res.json::<JwkSet>().await.map_err(|e| AuthError::KeysUnavailable(e.to_string()))?;

    debug!(target: "auth", count = set.keys.len(), ttl_secs = ttl.as_secs(), "Refreshed Firebase signing keys");
    Ok(CachedKeys { keys: set.keys, fetched_at: Instant::now(), ttl })
  }
}

/// `max-age` of a Cache-Control value.
fn max_age(cache_control: &str) -> Option<Duration> {
  cache_control
    .split(',')
    .find_map(|d| d.trim().strip_prefix("max-age=")?.trim().parse::<u64>().ok())
    .map(Duration::from_secs)
}

#[async_trait]
impl IdentityVerifier for FirebaseVerifier {
  #[instrument(level = "debug", skip_all)]
  async fn verify(&self, token: &str) -> Result<String, AuthError> {
    let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    let kid = header.kid.ok_or_else(|| AuthError::InvalidToken("missing kid".into()))?;

    let mut keys = self.keys().await?;
    if !keys.iter().any(|k| k.kid == kid) {
      if let Some(refreshed) = self.refresh_for_unknown_kid(&kid).await? {
        keys = refreshed;
      }
    }
    let jwk = keys.iter().find(|k| k.kid == kid)
      .ok_or_else(|| AuthError::InvalidToken(format!("unknown kid {}", kid)))?;
    let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
      .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

    let data = decode::<FirebaseClaims>(token, &key, &self.validation())
      .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    if data.claims.sub.is_empty() {
      return Err(AuthError::InvalidToken("empty subject".into()));
    }
    Ok(data.claims.sub)
  }
}

/// Extract the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(value: &str) -> Option<&str> {
  let token = value.strip_prefix("Bearer ")?.trim();
  if token.is_empty() { None } else { Some(token) }
}

/// The verified caller of a request.
#[derive(Clone, Debug)]
pub struct AuthUser {
  pub user_id: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
  type Rejection = ApiError;

  async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
    let token = parts.headers.get(AUTHORIZATION)
      .and_then(|v| v.to_str().ok())
      .and_then(bearer_token)
      .ok_or(AuthError::MissingToken)?;

    match state.verifier.verify(token).await {
      Ok(user_id) => Ok(AuthUser { user_id }),
      Err(e) => {
        warn!(target: "auth", error = ?e, "Token verification failed");
        Err(e.into())
      }
    }
  }
}
