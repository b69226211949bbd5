//! In-process skill store.
//!
//! Holds the same tables as the MySQL schema in memory. Used for local demos
//! and as the store behind the orchestrator's tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Result, SkillConnection, SkillId, SkillStore, StoreError, UserId};

/// Skill catalog and prerequisite edges used to seed a [`MemorySkillStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Curriculum {
    skills: BTreeMap<SkillId, String>,
    prerequisites: BTreeMap<SkillId, Vec<SkillId>>,
}

impl Curriculum {
    /// Creates an empty curriculum.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a skill.
    #[must_use]
    pub fn with_skill(mut self, skill_id: SkillId, name: impl Into<String>) -> Self {
        self.skills.insert(skill_id, name.into());
        self
    }

    /// Adds a prerequisite edge. Edges are listed in insertion order.
    #[must_use]
    pub fn with_prerequisite(mut self, skill_id: SkillId, prerequisite_id: SkillId) -> Self {
        self.prerequisites
            .entry(skill_id)
            .or_default()
            .push(prerequisite_id);
        self
    }

    /// The seven-skill algebra path that `sql/schema.sql` also seeds.
    ///
    /// Skill 7 is the goal; its prerequisites are 5 and 6.
    #[must_use]
    pub fn algebra() -> Self {
        Self::new()
            .with_skill(1, "Variables and Expressions")
            .with_skill(2, "Order of Operations")
            .with_skill(3, "Combining Like Terms")
            .with_skill(4, "One-Step Equations")
            .with_skill(5, "Two-Step Equations")
            .with_skill(6, "The Distributive Property")
            .with_skill(7, "Multi-Step Equations")
            .with_prerequisite(2, 1)
            .with_prerequisite(3, 2)
            .with_prerequisite(4, 3)
            .with_prerequisite(5, 4)
            .with_prerequisite(6, 3)
            .with_prerequisite(7, 5)
            .with_prerequisite(7, 6)
    }

    /// Number of skills in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.skills.len()
    }

    /// Returns `true` if the catalog has no skills.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

#[derive(Debug, Default)]
struct Tables {
    curriculum: Curriculum,
    user_ids: HashMap<String, UserId>,
    user_skills: Vec<(UserId, SkillId)>,
}

/// Skill store that keeps every table in process memory.
///
/// Clones share the same tables.
#[derive(Debug, Clone)]
pub struct MemorySkillStore {
    tables: Arc<Mutex<Tables>>,
    available: Arc<AtomicBool>,
}

impl Default for MemorySkillStore {
    fn default() -> Self {
        Self::new(Curriculum::default())
    }
}

impl MemorySkillStore {
    /// Creates a store seeded with the given curriculum and no users.
    #[must_use]
    pub fn new(curriculum: Curriculum) -> Self {
        info!(skills = curriculum.len(), "Seeding in-memory skill store");
        Self {
            tables: Arc::new(Mutex::new(Tables {
                curriculum,
                ..Tables::default()
            })),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Makes subsequent [`SkillStore::acquire`] calls succeed or fail.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Marks a skill as mastered for `username`, provisioning the user if needed.
    pub async fn grant_mastery(&self, username: &str, skill_id: SkillId) -> UserId {
        let mut tables = self.tables.lock().await;
        let user_id = tables.ensure_user(username);
        tables.record_mastery(user_id, skill_id);
        user_id
    }

    /// Returns the id of `username` if the user exists.
    pub async fn user_id(&self, username: &str) -> Option<UserId> {
        self.tables.lock().await.user_ids.get(username).copied()
    }

    /// Returns every mastery row for a user, duplicates included.
    pub async fn mastery_records(&self, user_id: UserId) -> Vec<SkillId> {
        self.tables
            .lock()
            .await
            .user_skills
            .iter()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, skill)| *skill)
            .collect()
    }
}

impl Tables {
    fn ensure_user(&mut self, username: &str) -> UserId {
        if let Some(user_id) = self.user_ids.get(username) {
            return *user_id;
        }

        let user_id = UserId::try_from(self.user_ids.len() + 1).unwrap_or(UserId::MAX);
        self.user_ids.insert(username.to_string(), user_id);
        debug!(user_id, username, "Provisioned in-memory user");
        user_id
    }

    fn record_mastery(&mut self, user_id: UserId, skill_id: SkillId) {
        if !self.user_skills.contains(&(user_id, skill_id)) {
            self.user_skills.push((user_id, skill_id));
        }
    }
}

#[async_trait]
impl SkillStore for MemorySkillStore {
    async fn acquire(&self) -> Result<Box<dyn SkillConnection>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::connection_failed("in-memory store is offline"));
        }
        Ok(Box::new(MemorySkillConnection {
            tables: Arc::clone(&self.tables),
        }))
    }
}

struct MemorySkillConnection {
    tables: Arc<Mutex<Tables>>,
}

#[async_trait]
impl SkillConnection for MemorySkillConnection {
    async fn ensure_user(&mut self, username: &str) -> Result<UserId> {
        Ok(self.tables.lock().await.ensure_user(username))
    }

    async fn mastered_skill_ids(&mut self, user_id: UserId) -> Result<HashSet<SkillId>> {
        Ok(self
            .tables
            .lock()
            .await
            .user_skills
            .iter()
            .filter(|(user, _)| *user == user_id)
            .map(|(_, skill)| *skill)
            .collect())
    }

    async fn prerequisite_ids(&mut self, skill_id: SkillId) -> Result<Vec<SkillId>> {
        Ok(self
            .tables
            .lock()
            .await
            .curriculum
            .prerequisites
            .get(&skill_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn skill_name(&mut self, skill_id: SkillId) -> Result<String> {
        self.tables
            .lock()
            .await
            .curriculum
            .skills
            .get(&skill_id)
            .cloned()
            .ok_or(StoreError::SkillNotFound { skill_id })
    }

    async fn record_mastery(&mut self, user_id: UserId, skill_id: SkillId) -> Result<()> {
        self.tables.lock().await.record_mastery(user_id, skill_id);
        Ok(())
    }
}
