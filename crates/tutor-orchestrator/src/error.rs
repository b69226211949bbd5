//! Error types for the tutoring orchestrator.
//!
//! Every variant maps to a reply the student sees; the HTTP layer also maps
//! it to a status code. Nothing here escapes a request as a panic.

use std::path::PathBuf;

use tutor_generator::GeneratorError;
use tutor_store::{SkillId, StoreError};

use crate::judgment::JudgmentError;

/// A specialized `Result` type for orchestrator operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Reply sent when the skill store cannot be reached.
pub const STORE_UNAVAILABLE_REPLY: &str = "Error: Could not connect to the database.";

/// Reply sent when the generator times out.
pub const GENERATOR_TIMEOUT_REPLY: &str =
    "Sorry, the request to the AI tutor timed out. Please try again.";

/// Reply sent when the generator fails for any other reason.
pub const GENERATOR_FAILURE_REPLY: &str =
    "Sorry, the AI tutor is unavailable right now. Please try again.";

/// Reply sent when an evaluation could not be parsed.
pub const MALFORMED_JUDGMENT_REPLY: &str =
    "I had trouble evaluating that answer because the evaluation was malformed. Let's try again: please send your answer once more.";

/// Errors that can occur while tutoring.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Store Errors
    // ========================================================================
    /// No store connection could be acquired; the request never started.
    #[error("Skill store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// A store query failed mid-request.
    #[error("Skill store error: {0}")]
    Store(#[source] StoreError),

    // ========================================================================
    // Generator Errors
    // ========================================================================
    /// The text generator failed or timed out. The session was discarded.
    #[error("Text generation failed: {0}")]
    Generator(#[from] GeneratorError),

    /// The generator's evaluation could not be turned into a judgment.
    #[error("Malformed evaluation: {0}")]
    MalformedJudgment(#[from] JudgmentError),

    // ========================================================================
    // Curriculum Errors
    // ========================================================================
    /// The prerequisite graph loops back on itself.
    #[error("Prerequisite cycle detected at skill {skill_id}\n\nSuggestion: Remove the cyclic row from the Prerequisites table")]
    PrerequisiteCycle {
        /// The skill reached twice.
        skill_id: SkillId,
    },

    /// The prerequisite chain below the goal is deeper than allowed.
    #[error("Prerequisite chain below skill {goal_skill_id} exceeds {max_depth} levels\n\nSuggestion: Raise maxPrerequisiteDepth in tutor.json or check the Prerequisites table")]
    PrerequisiteDepthExceeded {
        /// The goal the walk started from.
        goal_skill_id: SkillId,
        /// The configured depth limit.
        max_depth: usize,
    },
}

impl From<StoreError> for TutorError {
    fn from(err: StoreError) -> Self {
        if err.is_connection() {
            Self::StoreUnavailable(err)
        } else {
            Self::Store(err)
        }
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// The text shown to the student when this error ends a request.
    #[must_use]
    pub fn reply_text(&self) -> String {
        match self {
            Self::StoreUnavailable(_) => STORE_UNAVAILABLE_REPLY.to_string(),
            Self::Generator(GeneratorError::Timeout { .. }) => GENERATOR_TIMEOUT_REPLY.to_string(),
            Self::Generator(_) => GENERATOR_FAILURE_REPLY.to_string(),
            Self::MalformedJudgment(_) => MALFORMED_JUDGMENT_REPLY.to_string(),
            other => format!("A critical error occurred: {other}"),
        }
    }

    /// Returns `true` if the session was discarded because of this error.
    #[must_use]
    pub const fn discards_session(&self) -> bool {
        matches!(self, Self::Generator(_))
    }
}
