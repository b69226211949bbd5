//! Per-user tutoring sessions.
//!
//! A [`Session`] tracks where one student is in the Crawl-Walk-Run cycle for
//! a single skill. Sessions live in a [`SessionRegistry`], which hands out one
//! [`SessionSlot`] per username. A slot holds that username's lock for as long
//! as it is alive, so requests from the same student run one at a time while
//! different students proceed in parallel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tutor_store::{SkillId, UserId};

/// Where a session is in the Crawl-Walk-Run cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Explain the skill.
    Crawl,
    /// Ask a guided practice question.
    #[serde(rename = "Walk_Ask")]
    WalkAsk,
    /// Judge the answer to the practice question.
    #[serde(rename = "Walk_Evaluate")]
    WalkEvaluate,
    /// Ask a direct assessment question.
    #[serde(rename = "Run_Ask")]
    RunAsk,
    /// Grade the assessment answer and record mastery.
    #[serde(rename = "Run_Evaluate")]
    RunEvaluate,
    /// Wrap up and point at the next skill. Terminal.
    Summary,
}

impl Phase {
    /// Returns the name used in logs and serialized sessions.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Crawl => "Crawl",
            Self::WalkAsk => "Walk_Ask",
            Self::WalkEvaluate => "Walk_Evaluate",
            Self::RunAsk => "Run_Ask",
            Self::RunEvaluate => "Run_Evaluate",
            Self::Summary => "Summary",
        }
    }

    /// Returns `true` for phases that grade the student's message.
    #[must_use]
    pub const fn is_evaluation(self) -> bool {
        matches!(self, Self::WalkEvaluate | Self::RunEvaluate)
    }

    /// Returns `true` if processing this phase ends the session.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Summary)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One student's progress through a single skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Numeric id of the student.
    pub user_id: UserId,
    /// Skill being taught. Fixed for the life of the session.
    pub skill_id: SkillId,
    /// Display name of the skill.
    pub skill_name: String,
    /// Current phase.
    pub phase: Phase,
    /// The question the student is expected to answer next.
    pub last_question: Option<String>,
    /// Incorrect assessment answers for this skill so far.
    pub attempts: u32,
    /// When the session was created.
    pub started_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session at [`Phase::Crawl`].
    #[must_use]
    pub fn new(user_id: UserId, skill_id: SkillId, skill_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            skill_id,
            skill_name: skill_name.into(),
            phase: Phase::Crawl,
            last_question: None,
            attempts: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Moves to `phase` and refreshes `updated_at`.
    pub fn advance(&mut self, phase: Phase) {
        self.phase = phase;
        self.touch();
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

type SlotCell = Arc<Mutex<Option<Session>>>;

/// All active sessions, keyed by username.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slots: Mutex<HashMap<String, SlotCell>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the slot for `username`, waiting for any other request from the
    /// same student to finish.
    pub async fn slot(&self, username: &str) -> SessionSlot {
        let cell = {
            let mut slots = self.slots.lock().await;
            if let Some(cell) = slots.get(username) {
                Arc::clone(cell)
            } else {
                // Drop empty slots nobody is waiting on before adding a new one.
                slots.retain(|_, cell| {
                    Arc::strong_count(cell) > 1
                        || cell.try_lock().map_or(true, |session| session.is_some())
                });
                let cell = SlotCell::default();
                slots.insert(username.to_string(), Arc::clone(&cell));
                cell
            }
        };

        SessionSlot {
            username: username.to_string(),
            guard: cell.lock_owned().await,
        }
    }

    /// Returns a copy of the session for `username`, if any.
    pub async fn get(&self, username: &str) -> Option<Session> {
        let cell = self.slots.lock().await.get(username).cloned()?;
        let session = cell.lock().await;
        session.clone()
    }

    /// Returns `true` if `username` has an active session.
    pub async fn contains(&self, username: &str) -> bool {
        self.get(username).await.is_some()
    }

    /// Number of active sessions.
    pub async fn active_count(&self) -> usize {
        let cells: Vec<SlotCell> = self.slots.lock().await.values().cloned().collect();
        let mut count = 0;
        for cell in cells {
            if cell.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}

/// Exclusive access to one username's session for the duration of a request.
pub struct SessionSlot {
    username: String,
    guard: OwnedMutexGuard<Option<Session>>,
}

impl SessionSlot {
    /// The username this slot belongs to.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns a copy of the stored session.
    #[must_use]
    pub fn load(&self) -> Option<Session> {
        self.guard.clone()
    }

    /// Stores `session`, replacing any previous one.
    pub fn save(&mut self, session: Session) {
        *self.guard = Some(session);
    }

    /// Removes the stored session.
    pub fn delete(&mut self) {
        *self.guard = None;
    }
}

impl fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSlot")
            .field("username", &self.username)
            .field("session", &*self.guard)
            .finish()
    }
}
