//! Tutor Text Generation
//!
//! The tutoring core asks a [`TextGenerator`] for explanations, questions,
//! and graded judgments. Every call carries a timeout; a call that fails for
//! any reason is reported as a [`GeneratorError`] and never retried here.
//!
//! - [`GeminiGenerator`] calls the Google Generative Language REST API.
//! - [`ScriptedGenerator`] replays queued replies, for tests.

mod gemini;
mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use gemini::{GeminiGenerator, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
pub use scripted::ScriptedGenerator;

/// A specialized `Result` type for generator operations.
pub type Result<T> = std::result::Result<T, GeneratorError>;

/// Errors that can occur while generating text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeneratorError {
    /// The backend did not answer within the timeout.
    #[error("text generation timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that expired, in milliseconds.
        timeout_ms: u64,
    },

    /// The backend rejected the request or could not be reached.
    #[error("text generation API error ({kind}): {message}\n\nSuggestion: {}", .kind.suggestion())]
    Api {
        /// Classification of the failure.
        kind: ApiErrorKind,
        /// Detail reported by the backend or transport.
        message: String,
    },

    /// The backend answered without any text.
    #[error("text generation returned no text")]
    EmptyResponse,
}

impl GeneratorError {
    /// Creates a new `Api` error.
    #[must_use]
    pub fn api(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self::Api {
            kind,
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Returns `true` if retrying the same request later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Api {
                    kind: ApiErrorKind::RateLimit | ApiErrorKind::Server | ApiErrorKind::Network,
                    ..
                }
        )
    }
}

/// Categories of generation API errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ApiErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check GOOGLE_API_KEY",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the generation service may be experiencing issues",
            Self::Network => "Check your network connection",
            Self::Other => "Check the generation provider's status page",
        }
    }
}

/// Shape the caller expects the generated text to have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Free-form Markdown.
    #[default]
    Text,
    /// A single JSON object and nothing else.
    Json,
}

/// A prompt sent to a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Full prompt text.
    pub text: String,
    /// Requested response shape.
    pub format: ResponseFormat,
}

impl Prompt {
    /// Creates a prompt expecting free-form text.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: ResponseFormat::Text,
        }
    }

    /// Creates a prompt expecting a JSON object.
    #[must_use]
    pub fn json(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: ResponseFormat::Json,
        }
    }
}

/// A fallible, time-bounded text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates text for `prompt`, giving up after `timeout`.
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String>;
}
