//! Structured correctness judgments returned by the generator.
//!
//! The evaluation prompts ask for `{"is_correct": bool, "feedback": string}`,
//! but models often wrap the object in reasoning or a code fence. The parser
//! first tries the whole reply as a judgment and then falls back to the text
//! between the first `{` and the last `}`, so an object wrapped in an array
//! or other JSON still parses.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Feedback used when the judgment omits it.
pub const DEFAULT_FEEDBACK: &str = "Thanks for your answer!";

/// A graded answer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Judgment {
    /// Whether the student's answer was correct.
    pub is_correct: bool,
    /// Short feedback for the student.
    #[serde(default = "default_feedback")]
    pub feedback: String,
}

fn default_feedback() -> String {
    DEFAULT_FEEDBACK.to_string()
}

/// Why a generator reply could not be read as a [`Judgment`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JudgmentError {
    /// The reply contains no `{ ... }` span.
    #[error("no JSON object found in evaluation")]
    MissingObject,

    /// The `{ ... }` span is not valid JSON.
    #[error("evaluation object is not valid JSON: {0}")]
    InvalidJson(String),

    /// The JSON parsed but does not match `{is_correct: bool, feedback?: string}`.
    #[error("evaluation object has the wrong shape: {0}")]
    SchemaMismatch(String),
}

impl Judgment {
    /// Parses a judgment out of raw generator text.
    pub fn parse(raw: &str) -> Result<Self, JudgmentError> {
        let trimmed = raw.trim();
        if let Some(judgment) = serde_json::from_str::<Value>(trimmed)
            .ok()
            .and_then(|value| Self::from_value(value).ok())
        {
            return Ok(judgment);
        }

        let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
            return Err(JudgmentError::MissingObject);
        };
        if end < start {
            return Err(JudgmentError::MissingObject);
        }

        let value: Value = serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| JudgmentError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Self, JudgmentError> {
        if !value.is_object() {
            return Err(JudgmentError::SchemaMismatch(
                "expected a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| JudgmentError::SchemaMismatch(e.to_string()))
    }
}
