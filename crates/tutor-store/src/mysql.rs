//! MySQL-backed skill store.
//!
//! Expects the `Users`, `Skills`, `Prerequisites`, and `User_Skills` tables
//! from `sql/schema.sql`. `User_Skills` must have a primary key on
//! `(user_id, skill_id)` so that mastery inserts stay idempotent.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::MySql;
use tracing::{debug, info, instrument};

use crate::{
    placeholder_email, Result, SkillConnection, SkillId, SkillStore, StoreError, UserId,
    PLACEHOLDER_PASSWORD_HASH,
};

/// Connection settings for [`MySqlSkillStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlSettings {
    /// Database host name.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Database (schema) name.
    pub database: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
    /// How long a request waits for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl MySqlSettings {
    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }
}

/// Skill store backed by a MySQL connection pool.
#[derive(Debug, Clone)]
pub struct MySqlSkillStore {
    pool: MySqlPool,
}

impl MySqlSkillStore {
    /// Creates a store whose pool connects lazily on first use.
    ///
    /// The server can start while the database is down; each request that
    /// cannot get a connection fails with [`StoreError::ConnectionFailed`].
    #[must_use]
    pub fn connect_lazy(settings: &MySqlSettings) -> Self {
        info!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            "Configuring MySQL skill store"
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(settings.connect_options());

        Self { pool }
    }
}

#[async_trait]
impl SkillStore for MySqlSkillStore {
    async fn acquire(&self) -> Result<Box<dyn SkillConnection>> {
        let conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        Ok(Box::new(MySqlSkillConnection { conn }))
    }
}

/// A pooled MySQL connection held for the duration of one request.
#[derive(Debug)]
pub struct MySqlSkillConnection {
    conn: PoolConnection<MySql>,
}

#[async_trait]
impl SkillConnection for MySqlSkillConnection {
    #[instrument(skip(self))]
    async fn ensure_user(&mut self, username: &str) -> Result<UserId> {
        let existing: Option<UserId> =
            sqlx::query_scalar("SELECT user_id FROM Users WHERE username = ?")
                .bind(username)
                .fetch_optional(&mut *self.conn)
                .await?;

        if let Some(user_id) = existing {
            return Ok(user_id);
        }

        // LAST_INSERT_ID(expr) makes a concurrent duplicate insert report the existing id.
        let result = sqlx::query(
            "INSERT INTO Users (username, email, password_hash) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE user_id = LAST_INSERT_ID(user_id)",
        )
        .bind(username)
        .bind(placeholder_email(username))
        .bind(PLACEHOLDER_PASSWORD_HASH)
        .execute(&mut *self.conn)
        .await?;

        let raw_id = result.last_insert_id();
        let user_id =
            UserId::try_from(raw_id).map_err(|_| StoreError::InvalidId { value: raw_id })?;
        info!(user_id, "Provisioned new user");
        Ok(user_id)
    }

    async fn mastered_skill_ids(&mut self, user_id: UserId) -> Result<HashSet<SkillId>> {
        let ids: Vec<SkillId> =
            sqlx::query_scalar("SELECT skill_id FROM User_Skills WHERE user_id = ?")
                .bind(user_id)
                .fetch_all(&mut *self.conn)
                .await?;

        debug!(user_id, mastered = ?ids, "Loaded mastered skills");
        Ok(ids.into_iter().collect())
    }

    async fn prerequisite_ids(&mut self, skill_id: SkillId) -> Result<Vec<SkillId>> {
        let ids = sqlx::query_scalar(
            "SELECT prerequisite_id FROM Prerequisites WHERE skill_id = ? ORDER BY prerequisite_id",
        )
        .bind(skill_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(ids)
    }

    async fn skill_name(&mut self, skill_id: SkillId) -> Result<String> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT skill_name FROM Skills WHERE skill_id = ?")
                .bind(skill_id)
                .fetch_optional(&mut *self.conn)
                .await?;
        name.ok_or(StoreError::SkillNotFound { skill_id })
    }

    #[instrument(skip(self))]
    async fn record_mastery(&mut self, user_id: UserId, skill_id: SkillId) -> Result<()> {
        sqlx::query(
            "INSERT INTO User_Skills (user_id, skill_id) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE skill_id = skill_id",
        )
        .bind(user_id)
        .bind(skill_id)
        .execute(&mut *self.conn)
        .await?;

        info!(user_id, skill_id, "Recorded mastery");
        Ok(())
    }
}
