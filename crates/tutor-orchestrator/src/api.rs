//! HTTP API for the tutoring server.
//!
//! # Endpoints
//!
//! - `GET /` - Liveness check
//! - `POST /chat` - Send a student message and receive the tutor's reply
//!
//! Every `/chat` response body is `{"reply": "..."}`, including failures; the
//! status code tells clients what kind of failure occurred.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tutor_generator::GeminiGenerator;
//! use tutor_orchestrator::{create_router, AppState, SessionRegistry, Tutor, TutorSettings};
//! use tutor_store::MemorySkillStore;
//!
//! # async fn example() {
//! let tutor = Tutor::new(
//!     Arc::new(MemorySkillStore::default()),
//!     Arc::new(GeminiGenerator::new("api-key", "gemini-1.5-flash")),
//!     Arc::new(SessionRegistry::new()),
//!     TutorSettings::default(),
//! );
//!
//! let router = create_router(AppState::new(tutor));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};
use tutor_generator::GeneratorError;

use crate::{Tutor, TutorError};

/// Liveness message returned by `GET /`.
pub const HEALTH_MESSAGE: &str = "AI Tutor API is running!";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The student's message.
    pub message: String,
    /// The student's username.
    pub user_id: String,
}

/// Response body for `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// The tutor's reply, or a human-readable error.
    pub reply: String,
}

/// Response body for `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Fixed liveness message.
    pub message: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared state for the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The tutoring state machine.
    pub tutor: Arc<Tutor>,
}

impl AppState {
    /// Wraps a tutor for use by the router.
    #[must_use]
    pub fn new(tutor: Tutor) -> Self {
        Self {
            tutor: Arc::new(tutor),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// A tutoring failure rendered as a `{reply}` body.
#[derive(Debug)]
struct ApiError(TutorError);

impl From<TutorError> for ApiError {
    fn from(err: TutorError) -> Self {
        Self(err)
    }
}

/// Maps a tutoring failure to an HTTP status.
#[must_use]
pub fn status_for(err: &TutorError) -> StatusCode {
    match err {
        TutorError::StoreUnavailable(_) | TutorError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        TutorError::Generator(GeneratorError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        TutorError::Generator(_) | TutorError::MalformedJudgment(_) => StatusCode::BAD_GATEWAY,
        TutorError::PrerequisiteCycle { .. }
        | TutorError::PrerequisiteDepthExceeded { .. }
        | TutorError::ConfigParseError { .. }
        | TutorError::ConfigValidationError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() && !matches!(self.0, TutorError::MalformedJudgment(_)) {
            error!(status = %status, error = %self.0, "Chat request failed");
        } else {
            warn!(status = %status, error = %self.0, "Chat request failed");
        }

        let body = Json(ChatResponse {
            reply: self.0.reply_text(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_health))
        .route("/chat", post(handle_chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        message: HEALTH_MESSAGE.to_string(),
    })
}

/// Handler for `POST /chat`.
async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let reply = state
        .tutor
        .respond(&request.user_id, &request.message)
        .await?;
    Ok(Json(ChatResponse { reply }))
}
