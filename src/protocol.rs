//! Public request/response structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{SkillFocus, StudentLevel, TeacherPersona};
use crate::quota::RemainingByAction;

#[derive(Debug, Deserialize)]
pub struct ClassRequest {
    pub student_level: StudentLevel,
    pub skill_focus: SkillFocus,
    pub teacher: TeacherPersona,
    pub reason: String,
    pub age: u8,
    #[serde(default)]
    pub module_lesson: u8,
    #[serde(default)]
    pub used_phrases: Vec<String>,
    #[serde(default)]
    pub used_vocab: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClassOut {
    pub class_plan: String,
    pub badge: String,
    pub remaining_calls: u32,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
    pub class_plan: String,
    pub student_level: StudentLevel,
    pub skill_focus: SkillFocus,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackOut {
    pub feedback: String,
    pub remaining_calls: u32,
}

#[derive(Serialize)]
pub struct RemainingOut {
    pub remaining_calls: RemainingByAction,
}

#[derive(Serialize)]
pub struct MessageOut {
    pub message: String,
}

#[derive(Serialize)]
pub struct AboutOut {
    pub content: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    /// False while quota counters live only in this process.
    pub shared_quota_store: bool,
}
