//! Crawl-Walk-Run Tutor Orchestrator
//!
//! Resolves each student's next skill, walks them through the explain,
//! practice, and assess phases for it, and serves the `/chat` HTTP API.

pub mod api;
pub mod config;
pub mod error;
pub mod judgment;
pub mod prompts;
pub mod resolver;
pub mod session;
pub mod tutor;

pub use api::{
    create_router, status_for, AppState, ChatRequest, ChatResponse, HealthResponse, HEALTH_MESSAGE,
};
pub use config::{Config, DatabaseConfig, GeneratorConfig};
pub use error::{Result, TutorError};
pub use judgment::{Judgment, JudgmentError};
pub use resolver::find_next_skill;
pub use session::{Phase, Session, SessionRegistry, SessionSlot};
pub use tutor::{Tutor, TutorSettings};
