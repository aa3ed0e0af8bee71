//! Domain models: proficiency level, skill focus, teacher personas, and the learner's age group.

use std::fmt;

use serde::{Deserialize, Serialize};

/// CEFR proficiency level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudentLevel { A1, A2, B1, B2, C1, C2 }

impl StudentLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      StudentLevel::A1 => "A1",
      StudentLevel::A2 => "A2",
      StudentLevel::B1 => "B1",
      StudentLevel::B2 => "B2",
      StudentLevel::C1 => "C1",
      StudentLevel::C2 => "C2",
    }
  }
}

impl fmt::Display for StudentLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkillFocus { Speaking, Grammar, Vocabulary, Writing, Reading }

impl SkillFocus {
  pub fn as_str(&self) -> &'static str {
    match self {
      SkillFocus::Speaking => "Speaking",
      SkillFocus::Grammar => "Grammar",
      SkillFocus::Vocabulary => "Vocabulary",
      SkillFocus::Writing => "Writing",
      SkillFocus::Reading => "Reading",
    }
  }

  /// Exercise outline for the skill, handed to the model as guidance.
  pub fn exercises(&self) -> &'static str {
    match self {
      SkillFocus::Speaking => "- Conversation starter with a target tone\n- Dialogue completion (5 responses)\n- Open-ended questions to answer aloud",
      SkillFocus::Grammar => "- Sentence correction (5 sentences)\n- Gap-fill with the correct forms\n- Free sentences using the grammar point",
      SkillFocus::Vocabulary => "- Synonym matching (4 words)\n- Sentence creation for new words\n- One sentence per vocabulary item",
      SkillFocus::Writing => "- Short paragraph\n- Short email\n- Purpose-driven sentences",
      SkillFocus::Reading => "- Short passage (50-100 words) at the learner's level\n- 2-3 sentence summary\n- 5 comprehension questions",
    }
  }
}

impl fmt::Display for SkillFocus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Virtual teachers the learner can pick from. Each has a teaching style.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeacherPersona { Emma, Liam, Olivia, Noah, Sophia }

impl TeacherPersona {
  pub fn as_str(&self) -> &'static str {
    match self {
      TeacherPersona::Emma => "Emma",
      TeacherPersona::Liam => "Liam",
      TeacherPersona::Olivia => "Olivia",
      TeacherPersona::Noah => "Noah",
      TeacherPersona::Sophia => "Sophia",
    }
  }

  pub fn style(&self) -> &'static str {
    match self {
      TeacherPersona::Emma => "narrative-driven lessons with characters and plots",
      TeacherPersona::Liam => "interactive challenges and puzzles",
      TeacherPersona::Olivia => "practical real-world scenarios",
      TeacherPersona::Noah => "conversational practice with role-play scenarios",
      TeacherPersona::Sophia => "lessons built around songs and rhymes, engaging for younger learners",
    }
  }
}

impl fmt::Display for TeacherPersona {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgeGroup { YoungLearner, Teenager, Adult }

impl AgeGroup {
  pub fn from_age(age: u8) -> Self {
    match age {
      0..=11 => AgeGroup::YoungLearner,
      12..=17 => AgeGroup::Teenager,
      _ => AgeGroup::Adult,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      AgeGroup::YoungLearner => "young learner",
      AgeGroup::Teenager => "teenager",
      AgeGroup::Adult => "adult",
    }
  }
}

pub const MIN_AGE: u8 = 5;
pub const MAX_AGE: u8 = 100;
pub const MAX_MODULE_LESSON: u8 = 5;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn age_groups() {
    assert_eq!(AgeGroup::from_age(5), AgeGroup::YoungLearner);
    assert_eq!(AgeGroup::from_age(11), AgeGroup::YoungLearner);
    assert_eq!(AgeGroup::from_age(12), AgeGroup::Teenager);
    assert_eq!(AgeGroup::from_age(17), AgeGroup::Teenager);
    assert_eq!(AgeGroup::from_age(18), AgeGroup::Adult);
  }

  #[test]
  fn enums_use_their_display_names_on_the_wire() {
    let level: StudentLevel = serde_json::from_str("\"B2\"").unwrap();
    assert_eq!(level, StudentLevel::B2);
    let skill: SkillFocus = serde_json::from_str("\"Reading\"").unwrap();
    assert_eq!(skill.to_string(), "Reading");
    assert!(serde_json::from_str::<TeacherPersona>("\"Bob\"").is_err());
    assert!(serde_json::from_str::<StudentLevel>("\"a1\"").is_err());
  }
}
