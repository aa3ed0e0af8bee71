//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs the caller and basic result info.

use std::sync::Arc;
use axum::{
  extract::State,
  http::{HeaderMap, HeaderValue},
  response::IntoResponse,
  Json,
};
use tracing::{info, instrument};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiJson, REMAINING_CALLS_HEADER};
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;

const ABOUT_TEXT: &str = "Welcome to the Language Learning Arcade! 🎮\n\n\
We make language learning fun, engaging and effective. AI-generated lessons, gamified progress \
and personalized feedback help you master English for travel, business or personal growth. \
Join the arcade and level up your skills! 🚀";

fn remaining_header(remaining: u32) -> HeaderMap {
  let mut headers = HeaderMap::new();
  headers.insert(REMAINING_CALLS_HEADER, HeaderValue::from(remaining));
  headers
}

#[instrument(level = "info")]
pub async fn http_root() -> impl IntoResponse {
  Json(MessageOut { message: "Language Arcade Backend is running!".into() })
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, shared_quota_store: state.ledger.has_shared_store() })
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn http_about(user: AuthUser) -> impl IntoResponse {
  info!(target: "arcade_backend", user_id = %user.user_id, "Fetched About content");
  Json(AboutOut { content: ABOUT_TEXT.into() })
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn http_remaining_calls(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
) -> impl IntoResponse {
  let remaining_calls = logic::remaining_calls(&state, &user.user_id).await;
  Json(RemainingOut { remaining_calls })
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn http_generate_class(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  ApiJson(body): ApiJson<ClassRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let out = logic::generate_class(&state, &user.user_id, &body).await?;
  info!(target: "lesson", user_id = %user.user_id, remaining = out.remaining_calls, "HTTP generate-class served");
  Ok((remaining_header(out.remaining_calls), Json(out)))
}

#[instrument(level = "info", skip_all, fields(user_id = %user.user_id))]
pub async fn http_submit_answer(
  State(state): State<Arc<AppState>>,
  user: AuthUser,
  ApiJson(body): ApiJson<AnswerRequest>,
) -> Result<impl IntoResponse, ApiError> {
  let out = logic::submit_answer(&state, &user.user_id, &body).await?;
  info!(target: "lesson", user_id = %user.user_id, remaining = out.remaining_calls, "HTTP submit-answer served");
  Ok((remaining_header(out.remaining_calls), Json(out)))
}
