//! Tutor Skill Store
//!
//! Durable record of users, skills, prerequisites, and mastery.
//!
//! The tutoring core only talks to a [`SkillStore`]: it acquires one
//! [`SkillConnection`] per request and drops it when the request finishes,
//! which returns the underlying connection to its pool whatever the outcome.
//!
//! Two implementations are provided:
//!
//! - [`MySqlSkillStore`] backed by a sqlx `MySqlPool`
//! - [`MemorySkillStore`] holding everything in process, seeded from a
//!   [`Curriculum`]

mod memory;
mod mysql;

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{Curriculum, MemorySkillStore};
pub use mysql::{MySqlSettings, MySqlSkillConnection, MySqlSkillStore};

/// Identifier of a skill in the `Skills` table.
pub type SkillId = i32;

/// Identifier of a user in the `Users` table.
pub type UserId = i32;

/// A specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading or writing the skill store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection could be obtained from the store.
    #[error("could not connect to the skill store: {0}")]
    ConnectionFailed(String),

    /// A skill referenced by id does not exist.
    #[error("skill not found: {skill_id}")]
    SkillNotFound {
        /// The missing skill id.
        skill_id: SkillId,
    },

    /// The database returned an id that does not fit a user id.
    #[error("database returned an out-of-range id: {value}")]
    InvalidId {
        /// The raw id value.
        value: u64,
    },

    /// A query failed after a connection was established.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Creates a new `ConnectionFailed` error.
    #[must_use]
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Returns `true` if the error happened before any query ran.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::ConnectionFailed(_))
    }
}

/// A source of per-request connections.
#[async_trait]
pub trait SkillStore: Send + Sync {
    /// Acquires a connection scoped to a single request.
    ///
    /// Dropping the returned connection releases it.
    async fn acquire(&self) -> Result<Box<dyn SkillConnection>>;
}

/// Operations the tutor performs against the store during one request.
#[async_trait]
pub trait SkillConnection: Send {
    /// Returns the id for `username`, creating the user on first contact.
    async fn ensure_user(&mut self, username: &str) -> Result<UserId>;

    /// Returns every skill the user has mastered.
    async fn mastered_skill_ids(&mut self, user_id: UserId) -> Result<HashSet<SkillId>>;

    /// Returns the prerequisites of `skill_id` in listing order.
    async fn prerequisite_ids(&mut self, skill_id: SkillId) -> Result<Vec<SkillId>>;

    /// Returns the display name of a skill.
    async fn skill_name(&mut self, skill_id: SkillId) -> Result<String>;

    /// Records that the user mastered a skill. Recording twice is a no-op.
    async fn record_mastery(&mut self, user_id: UserId, skill_id: SkillId) -> Result<()>;
}

/// Placeholder e-mail used when a user is provisioned on first contact.
#[must_use]
pub fn placeholder_email(username: &str) -> String {
    format!("{username}@example.com")
}

/// Placeholder password hash stored for auto-provisioned users.
pub const PLACEHOLDER_PASSWORD_HASH: &str = "placeholder";
