//! HTTP-facing error type. Every handler failure ends up here and is rendered
//! as `{"detail": "..."}` with the matching status and headers.

use axum::{
  extract::{rejection::JsonRejection, FromRequest},
  http::{header, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;

use crate::auth::AuthError;
use crate::openai::CompletionError;
use crate::quota::QuotaError;

pub const REMAINING_CALLS_HEADER: &str = "x-remaining-calls";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  #[error(transparent)]
  Unauthorized(#[from] AuthError),

  #[error("{error}")]
  QuotaExceeded { error: QuotaError, retry_after_secs: i64 },

  #[error("{0}")]
  Validation(String),

  /// Body could not be read as JSON at all (syntax, content type, size).
  #[error("{detail}")]
  BadBody { status: StatusCode, detail: String },

  #[error("Language model rate limit exceeded. Try again later.")]
  UpstreamRateLimited,

  #[error("Language model service unavailable: {0}")]
  UpstreamUnavailable(String),
}

impl From<CompletionError> for ApiError {
  fn from(e: CompletionError) -> Self {
    match e {
      CompletionError::RateLimited(_) => ApiError::UpstreamRateLimited,
      other => ApiError::UpstreamUnavailable(other.to_string()),
    }
  }
}

impl From<JsonRejection> for ApiError {
  fn from(rejection: JsonRejection) -> Self {
    match rejection {
      JsonRejection::JsonDataError(e) => ApiError::Validation(e.body_text()),
      other => ApiError::BadBody { status: other.status(), detail: other.body_text() },
    }
  }
}

/// `Json` whose rejection is rendered like every other `ApiError`.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Serialize)]
struct ErrorBody {
  detail: String,
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self {
      ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
      ApiError::QuotaExceeded { .. } | ApiError::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
      ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ApiError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::BadBody { status, .. } => *status,
    };

    let mut res = (status, Json(ErrorBody { detail: self.to_string() })).into_response();
    let headers = res.headers_mut();
    match &self {
      ApiError::Unauthorized(_) => {
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
      }
      ApiError::QuotaExceeded { retry_after_secs, .. } => {
        headers.insert(REMAINING_CALLS_HEADER, HeaderValue::from(0));
        headers.insert(header::RETRY_AFTER, HeaderValue::from((*retry_after_secs).max(0)));
      }
      _ => {}
    }
    res
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::quota::Action;
  use chrono::Utc;

  #[test]
  fn quota_denial_carries_reset_headers() {
    let err = ApiError::QuotaExceeded {
      error: QuotaError::Exceeded { action: Action::Generate, ceiling: 5, resets_at: Utc::now() },
      retry_after_secs: 3600,
    };
    let res = err.into_response();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.headers()[REMAINING_CALLS_HEADER], "0");
    assert_eq!(res.headers()[header::RETRY_AFTER], "3600");
  }

  #[test]
  fn auth_failure_asks_for_bearer() {
    let res = ApiError::Unauthorized(AuthError::MissingToken).into_response();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(res.headers()[header::WWW_AUTHENTICATE], "Bearer");
  }

  #[test]
  fn provider_errors_map_by_kind() {
    assert!(matches!(ApiError::from(CompletionError::RateLimited("slow down".into())), ApiError::UpstreamRateLimited));
    assert!(matches!(ApiError::from(CompletionError::Http("boom".into())), ApiError::UpstreamUnavailable(_)));
  }
}
