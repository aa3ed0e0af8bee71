//! Core behaviors behind the HTTP handlers.
//!
//! This includes:
//!   - Generating a lesson plan (quota "generate")
//!   - Feedback on a submitted answer (quota "submit")
//!   - Remaining-quota lookups
//!
//! A quota unit is taken before the model is called and is kept even when the
//! model call fails.

use std::sync::OnceLock;

use regex::Regex;
use tracing::{error, info, instrument};

use crate::domain::{AgeGroup, MAX_AGE, MAX_MODULE_LESSON, MIN_AGE};
use crate::error::ApiError;
use crate::protocol::{AnswerRequest, ClassOut, ClassRequest, FeedbackOut};
use crate::quota::{Action, QuotaError, RemainingByAction};
use crate::sanitize::{self, INLINE, LESSON, TEXT_ONLY};
use crate::state::AppState;
use crate::util::{fill_template, join_or_none, trunc_for_log};

pub const DEFAULT_BADGE: &str = "Lesson Star";

fn badge_re() -> &'static Regex {
  static RE: OnceLock<Regex> = OnceLock::new();
  RE.get_or_init(|| Regex::new(r"(?s)## Badge\s*\n.*?🏅\s*\*\*(.+?)\*\*").expect("static regex"))
}

/// Badge name from the plan's "## Badge" section, or the default.
pub fn extract_badge(plan: &str) -> String {
  badge_re()
    .captures(plan)
    .and_then(|c| c.get(1))
    .map(|m| m.as_str().trim().to_string())
    .filter(|b| !b.is_empty())
    .unwrap_or_else(|| DEFAULT_BADGE.to_string())
}

pub fn validate_class_request(req: &ClassRequest) -> Result<(), ApiError> {
  if !(MIN_AGE..=MAX_AGE).contains(&req.age) {
    return Err(ApiError::Validation(format!("age must be between {} and {}", MIN_AGE, MAX_AGE)));
  }
  if req.module_lesson > MAX_MODULE_LESSON {
    return Err(ApiError::Validation(format!("module_lesson must be between 0 and {}", MAX_MODULE_LESSON)));
  }
  Ok(())
}

fn reason_context(reason: &str) -> String {
  let r = reason.trim();
  if r.is_empty() { "for general improvement".into() } else { format!("learning English for {}", r.to_lowercase()) }
}

async fn consume(state: &AppState, action: Action, user_id: &str) -> Result<u32, ApiError> {
  state.ledger.check_and_consume(action, user_id).await.map_err(|error| quota_denied(state, error))
}

/// Retry hint counts down to the reset the denial was computed against.
fn quota_denied(state: &AppState, error: QuotaError) -> ApiError {
  let QuotaError::Exceeded { resets_at, .. } = &error;
  let retry_after_secs = state.ledger.seconds_until(*resets_at);
  ApiError::QuotaExceeded { error, retry_after_secs }
}

pub fn build_lesson_prompt(state: &AppState, req: &ClassRequest) -> String {
  let reason = sanitize::clean(&req.reason, TEXT_ONLY);
  let phrases: Vec<String> = req.used_phrases.iter().map(|p| sanitize::clean(p, TEXT_ONLY)).collect();
  let vocab: Vec<String> = req.used_vocab.iter().map(|w| sanitize::clean(w, TEXT_ONLY)).collect();
  let age = req.age.to_string();
  let module_lesson = req.module_lesson.to_string();

  fill_template(
    &state.prompts.lesson_template,
    &[
      ("teacher", req.teacher.as_str()),
      ("teacher_style", req.teacher.style()),
      ("level", req.student_level.as_str()),
      ("skill", req.skill_focus.as_str()),
      ("reason_context", &reason_context(&reason)),
      ("age_group", AgeGroup::from_age(req.age).as_str()),
      ("age", &age),
      ("module_lesson", &module_lesson),
      ("exercises", req.skill_focus.exercises()),
      ("avoid_phrases", &join_or_none(&phrases)),
      ("avoid_vocab", &join_or_none(&vocab)),
    ],
  )
}

pub fn build_feedback_prompt(state: &AppState, req: &AnswerRequest) -> String {
  let answer = sanitize::clean(&req.answer, INLINE);
  let class_plan = sanitize::clean(&req.class_plan, INLINE);
  let reason = sanitize::clean(&req.reason, INLINE);
  fill_template(
    &state.prompts.feedback_template,
    &[
      ("level", req.student_level.as_str()),
      ("skill", req.skill_focus.as_str()),
      ("reason", &reason),
      ("answer", &answer),
      ("class_plan", &class_plan),
    ],
  )
}

#[instrument(level = "info", skip(state, req), fields(level = %req.student_level, skill = %req.skill_focus, teacher = %req.teacher))]
pub async fn generate_class(state: &AppState, user_id: &str, req: &ClassRequest) -> Result<ClassOut, ApiError> {
  validate_class_request(req)?;
  let remaining_calls = consume(state, Action::Generate, user_id).await?;
  info!(target: "lesson", %user_id, remaining_calls, "Generating class");

  let prompt = build_lesson_prompt(state, req);
  let raw = state.llm.complete(&prompt).await.map_err(|e| {
    error!(target: "lesson", %user_id, error = %e, "Lesson generation failed");
    ApiError::from(e)
  })?;

  let raw = if raw.trim().is_empty() { "No lesson plan generated.".to_string() } else { raw };
  let class_plan = sanitize::clean(&raw, LESSON);
  let badge = extract_badge(&class_plan);
  info!(target: "lesson", %user_id, %badge, plan_len = class_plan.len(), "Class generated");

  Ok(ClassOut { class_plan, badge, remaining_calls })
}

#[instrument(level = "info", skip(state, req), fields(level = %req.student_level, skill = %req.skill_focus, answer_len = req.answer.len()))]
pub async fn submit_answer(state: &AppState, user_id: &str, req: &AnswerRequest) -> Result<FeedbackOut, ApiError> {
  let remaining_calls = consume(state, Action::Submit, user_id).await?;
  info!(target: "lesson", %user_id, remaining_calls, "Received answer submission");

  let prompt = build_feedback_prompt(state, req);
  let raw = state.llm.complete(&prompt).await.map_err(|e| {
    error!(target: "lesson", %user_id, error = %e, "Feedback generation failed");
    ApiError::from(e)
  })?;

  let raw = if raw.trim().is_empty() { "No feedback generated.".to_string() } else { raw };
  let feedback = sanitize::clean(&raw, INLINE);
  info!(target: "lesson", %user_id, preview = %trunc_for_log(&feedback, 50), "Feedback generated");

  Ok(FeedbackOut { feedback, remaining_calls })
}

#[instrument(level = "info", skip(state))]
pub async fn remaining_calls(state: &AppState, user_id: &str) -> RemainingByAction {
  let remaining = state.ledger.remaining_all(user_id).await;
  info!(target: "lesson", %user_id, generate = remaining.generate, submit = remaining.submit, "Remaining calls");
  remaining
}
