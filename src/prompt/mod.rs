//! Evaluation instruction set - the evolving prompt given to the evaluator
//!
//! Exactly one version is live at a time. It is read once at the start of a
//! scoring run and passed in explicitly, and replaced wholesale when the
//! refinement engine folds a batch's human verdicts into it.

pub mod store;

pub use store::PromptStore;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Instructions used when no refined version has been written yet
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are a news evaluation agent. Your task is to analyze the article details you are given \
and assess how worthy the story is of being shared onward to a general audience.

Consider:
- Relevance: does the story concern a real, specific event with public impact?
- Timeliness: is it current news rather than background or evergreen material?
- Clarity: can the event be understood from the article without extra context?
- Public interest: would a broad audience care, beyond a narrow local or trade readership?

Score on an integer scale from 1 (not worth sharing) to 10 (must share). \
Reserve 9 and 10 for stories with clear, wide-reaching impact.";

/// A versioned evaluation instruction set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstructionSet {
    pub version: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Batch whose verdicts produced this version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_from: Option<NaiveDate>,
}

impl InstructionSet {
    pub fn new(version: u32, text: impl Into<String>) -> Self {
        Self {
            version,
            text: text.into(),
            updated_at: None,
            refined_from: None,
        }
    }

    /// Successor version carrying `text`
    pub fn next(&self, text: impl Into<String>, refined_from: Option<NaiveDate>) -> Self {
        Self {
            version: self.version + 1,
            text: text.into(),
            updated_at: Some(Utc::now()),
            refined_from,
        }
    }

    /// Older templates embed the article through a `{state}` placeholder
    pub fn is_template(&self) -> bool {
        self.text.contains("{state}")
    }
}

impl Default for InstructionSet {
    fn default() -> Self {
        Self::new(0, DEFAULT_INSTRUCTIONS)
    }
}
