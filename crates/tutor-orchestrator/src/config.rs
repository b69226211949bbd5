//! Configuration types for the tutoring server.
//!
//! Configuration is read from an optional `tutor.json` file and then
//! overridden by environment variables, so that secrets such as the API key
//! and database password never need to live in the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tutor_generator::DEFAULT_GEMINI_MODEL;
use tutor_store::{MySqlSettings, SkillId};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default goal skill: the last skill of the algebra path.
const fn default_goal_skill_id() -> SkillId {
    7
}

/// Default name of the learning path, used in the completion message.
fn default_path_name() -> String {
    "Algebra".to_string()
}

/// Default bound on how deep the prerequisite walk may go.
const fn default_max_prerequisite_depth() -> usize {
    64
}

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

/// Default generator timeout in seconds.
const fn default_generator_timeout() -> u64 {
    300
}

fn default_db_host() -> String {
    "localhost".to_string()
}

const fn default_db_port() -> u16 {
    3306
}

fn default_db_user() -> String {
    "root".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_acquire_timeout() -> u64 {
    5
}

/// Main configuration for the tutoring server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Skill the learning path ends at.
    #[serde(default = "default_goal_skill_id")]
    pub goal_skill_id: SkillId,

    /// Display name of the learning path.
    #[serde(default = "default_path_name")]
    pub path_name: String,

    /// Maximum number of prerequisite levels walked below the goal.
    #[serde(default = "default_max_prerequisite_depth")]
    pub max_prerequisite_depth: usize,

    /// Text generator settings.
    #[serde(default)]
    pub generator: GeneratorConfig,

    /// Skill store settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            goal_skill_id: default_goal_skill_id(),
            path_name: default_path_name(),
            max_prerequisite_depth: default_max_prerequisite_depth(),
            generator: GeneratorConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Settings for the Gemini text generator.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    /// API key. Usually supplied through `GOOGLE_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_generator_timeout")]
    pub timeout_seconds: u64,

    /// Override for the API root, mainly for local testing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("model", &self.model)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            timeout_seconds: default_generator_timeout(),
            base_url: None,
        }
    }
}

impl GeneratorConfig {
    /// The per-call timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Settings for the MySQL skill store.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Database host.
    #[serde(default = "default_db_host")]
    pub host: String,

    /// Database port.
    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Database user.
    #[serde(default = "default_db_user")]
    pub user: String,

    /// Database password. Usually supplied through `DB_PASSWORD`.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Database name.
    #[serde(default)]
    pub name: String,

    /// Connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds a request waits for a pooled connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_seconds", &self.acquire_timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            name: String::new(),
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Converts to the store's connection settings.
    #[must_use]
    pub fn to_settings(&self) -> MySqlSettings {
        MySqlSettings {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.name.clone(),
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_seconds),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `tutor.json` exists but is invalid, or an
    /// environment variable holds an unparsable number.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        let mut config = Self::load_from_file(&current_dir.join(CONFIG_FILE_NAME))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        serde_json::from_str(&contents).map_err(|e| TutorError::config_parse(path, e.to_string()))
    }

    /// Overrides fields from environment variables.
    ///
    /// `lookup` returns the value of a variable, if set. Recognized keys:
    /// `GOOGLE_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL`, `DB_HOST`,
    /// `DB_PORT`, `DB_USER`, `DB_PASSWORD`, `DB_NAME`, `TUTOR_GOAL_SKILL_ID`,
    /// `TUTOR_GENERATOR_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if a numeric variable
    /// cannot be parsed.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GOOGLE_API_KEY") {
            self.generator.api_key = value;
        }
        if let Some(value) = lookup("GEMINI_MODEL") {
            self.generator.model = value;
        }
        if let Some(value) = lookup("GEMINI_BASE_URL") {
            self.generator.base_url = Some(value);
        }
        if let Some(value) = lookup("DB_HOST") {
            self.database.host = value;
        }
        if let Some(value) = lookup("DB_PORT") {
            self.database.port = parse_env("DB_PORT", &value)?;
        }
        if let Some(value) = lookup("DB_USER") {
            self.database.user = value;
        }
        if let Some(value) = lookup("DB_PASSWORD") {
            self.database.password = value;
        }
        if let Some(value) = lookup("DB_NAME") {
            self.database.name = value;
        }
        if let Some(value) = lookup("TUTOR_GOAL_SKILL_ID") {
            self.goal_skill_id = parse_env("TUTOR_GOAL_SKILL_ID", &value)?;
        }
        if let Some(value) = lookup("TUTOR_GENERATOR_TIMEOUT_SECS") {
            self.generator.timeout_seconds = parse_env("TUTOR_GENERATOR_TIMEOUT_SECS", &value)?;
        }
        Ok(())
    }

    /// Validates the configuration values.
    ///
    /// Checks that:
    /// - `goal_skill_id` is positive
    /// - `max_prerequisite_depth` is greater than 0
    /// - `generator.timeout_seconds` is greater than 0
    /// - `generator.api_key` is set
    /// - `database.name` is set, unless `require_database` is `false`
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self, require_database: bool) -> Result<()> {
        if self.goal_skill_id <= 0 {
            return Err(TutorError::config_validation(
                "goalSkillId must be a positive skill id",
                "Set goalSkillId in tutor.json or TUTOR_GOAL_SKILL_ID",
            ));
        }

        if self.max_prerequisite_depth == 0 {
            return Err(TutorError::config_validation(
                "maxPrerequisiteDepth must be greater than 0",
                "Set maxPrerequisiteDepth to at least 1 in your tutor.json",
            ));
        }

        if self.generator.timeout_seconds == 0 {
            return Err(TutorError::config_validation(
                "generator.timeoutSeconds must be greater than 0",
                "Set generator.timeoutSeconds or TUTOR_GENERATOR_TIMEOUT_SECS to at least 1",
            ));
        }

        if self.generator.api_key.trim().is_empty() {
            return Err(TutorError::config_validation(
                "no generator API key configured",
                "Set GOOGLE_API_KEY in the environment or in a .env file",
            ));
        }

        if require_database && self.database.name.trim().is_empty() {
            return Err(TutorError::config_validation(
                "database.name must not be empty",
                "Set DB_NAME in the environment or database.name in tutor.json",
            ));
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        TutorError::config_validation(
            format!("{key} has an invalid value '{value}'"),
            format!("Set {key} to a whole number"),
        )
    })
}
