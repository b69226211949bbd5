//! Gemini REST API backend.
//!
//! Calls `POST {base}/{model}:generateContent` and returns the text of the
//! first candidate. The API key travels in the `x-goog-api-key` header so it
//! never appears in request URLs or transport error messages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::{ApiErrorKind, GeneratorError, Prompt, ResponseFormat, Result, TextGenerator};

/// Model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Base URL of the Generative Language API models collection.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Text generator backed by the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiGenerator {
    /// Creates a generator for the given API key and model.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
        }
    }

    /// Points the generator at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Returns the configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(prompt: &Prompt) -> GenerateContentRequest {
        let generation_config = match prompt.format {
            ResponseFormat::Text => None,
            ResponseFormat::Json => Some(GenerationConfig {
                response_mime_type: "application/json".to_string(),
            }),
        };

        GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: prompt.text.clone(),
                }],
            }],
            generation_config,
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiGenerator {
    #[instrument(skip(self, prompt), fields(model = %self.model, format = ?prompt.format))]
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String> {
        let url = format!(
            "{base}/{model}:generateContent",
            base = self.base_url,
            model = self.model
        );

        let response = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(timeout)
            .json(&Self::build_request(prompt))
            .send()
            .await
            .map_err(|err| map_transport_error(err, timeout))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            warn!(%status, "Gemini API returned an error status");
            return Err(map_http_error(status, &body));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                GeneratorError::timeout(timeout)
            } else {
                GeneratorError::api(
                    ApiErrorKind::Other,
                    format!("failed to parse Gemini response: {}", err.without_url()),
                )
            }
        })?;

        let text = extract_text_response(parsed)?;
        debug!(chars = text.len(), "Gemini response received");
        Ok(text)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    status: Option<String>,
}

fn extract_text_response(response: GenerateContentResponse) -> Result<String> {
    let text: String = response
        .candidates
        .and_then(|candidates| candidates.into_iter().next())
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(GeneratorError::EmptyResponse);
    }
    Ok(text)
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> GeneratorError {
    let err = err.without_url();
    if err.is_timeout() {
        GeneratorError::timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        GeneratorError::api(ApiErrorKind::Network, format!("Gemini request failed: {err}"))
    } else {
        GeneratorError::api(ApiErrorKind::Other, format!("Gemini request failed: {err}"))
    }
}

fn map_http_error(status: StatusCode, body: &str) -> GeneratorError {
    let message = serde_json::from_str::<ErrorWrapper>(body).map_or_else(
        |_| body.to_string(),
        |wrapper| {
            let status_text = wrapper.error.status.unwrap_or_default();
            let msg = wrapper.error.message.unwrap_or_else(|| body.to_string());
            if status_text.is_empty() {
                msg
            } else {
                format!("{status_text}: {msg}")
            }
        },
    );

    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiErrorKind::Authentication,
        StatusCode::TOO_MANY_REQUESTS => ApiErrorKind::RateLimit,
        // Gemini reports an invalid key as 400 INVALID_ARGUMENT.
        StatusCode::BAD_REQUEST if message.contains("API key") => ApiErrorKind::Authentication,
        s if s.is_server_error() => ApiErrorKind::Server,
        _ => ApiErrorKind::Other,
    };

    GeneratorError::api(kind, message)
}
