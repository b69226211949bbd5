//! The Crawl-Walk-Run state machine.
//!
//! Each call to [`Tutor::respond`] handles one student message:
//!
//! 1. Lock the student's session slot for the rest of the request.
//! 2. Acquire a store connection. If that fails nothing else happens.
//! 3. Provision the user and load the session, creating one at
//!    [`Phase::Crawl`] for the next unmastered skill if none exists.
//! 4. Run the current phase: build a prompt, call the generator, interpret
//!    the reply, and commit the updated session.
//!
//! The slot is locked before a connection is taken, so requests queued behind
//! the same student do not hold pool connections while they wait.
//!
//! Session changes are committed only after a phase finishes. A generator
//! failure discards the session; any other failure leaves it as it was.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use tutor_generator::{GeneratorError, Prompt, TextGenerator};
use tutor_store::{SkillConnection, SkillId, SkillStore, UserId};

use crate::config::Config;
use crate::error::{Result, TutorError};
use crate::judgment::Judgment;
use crate::prompts;
use crate::resolver::find_next_skill;
use crate::session::{Phase, Session, SessionRegistry, SessionSlot};

/// Knobs for the state machine, usually taken from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TutorSettings {
    /// Skill the learning path ends at.
    pub goal_skill_id: SkillId,
    /// Display name of the learning path.
    pub path_name: String,
    /// Upper bound on a single generator call.
    pub generator_timeout: Duration,
    /// Maximum prerequisite levels below the goal.
    pub max_prerequisite_depth: usize,
}

impl Default for TutorSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for TutorSettings {
    fn from(config: &Config) -> Self {
        Self {
            goal_skill_id: config.goal_skill_id,
            path_name: config.path_name.clone(),
            generator_timeout: config.generator.timeout(),
            max_prerequisite_depth: config.max_prerequisite_depth,
        }
    }
}

/// Drives students through the Crawl-Walk-Run cycle.
pub struct Tutor {
    store: Arc<dyn SkillStore>,
    generator: Arc<dyn TextGenerator>,
    sessions: Arc<SessionRegistry>,
    settings: TutorSettings,
}

impl std::fmt::Debug for Tutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tutor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Tutor {
    /// Creates a tutor over the given collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn SkillStore>,
        generator: Arc<dyn TextGenerator>,
        sessions: Arc<SessionRegistry>,
        settings: TutorSettings,
    ) -> Self {
        Self {
            store,
            generator,
            sessions,
            settings,
        }
    }

    /// The session registry this tutor writes to.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The active settings.
    #[must_use]
    pub const fn settings(&self) -> &TutorSettings {
        &self.settings
    }

    /// Handles one message from `username` and returns the reply text.
    ///
    /// # Errors
    ///
    /// Returns a [`TutorError`] when the store, the generator, or the
    /// curriculum fails. [`TutorError::reply_text`] gives the message to show
    /// the student.
    pub async fn respond(&self, username: &str, message: &str) -> Result<String> {
        let mut slot = self.sessions.slot(username).await;
        let mut conn = self
            .store
            .acquire()
            .await
            .map_err(TutorError::StoreUnavailable)?;

        let user_id = conn.ensure_user(username).await?;

        let session = match slot.load() {
            Some(session) => session,
            None => match self.start_session(conn.as_mut(), user_id).await? {
                Some(session) => {
                    info!(
                        user = %username,
                        user_id,
                        skill_id = session.skill_id,
                        skill = %session.skill_name,
                        "Starting session"
                    );
                    session
                }
                None => {
                    info!(user = %username, user_id, "Learning path already complete");
                    return Ok(prompts::completion_message(&self.settings.path_name));
                }
            },
        };

        debug!(
            user = %username,
            phase = %session.phase,
            skill_id = session.skill_id,
            grading = session.phase.is_evaluation(),
            final_step = session.phase.is_terminal(),
            "Handling message"
        );
        self.step(conn.as_mut(), &mut slot, session, message).await
    }

    async fn start_session(
        &self,
        conn: &mut dyn SkillConnection,
        user_id: UserId,
    ) -> Result<Option<Session>> {
        let Some(skill_id) = self.next_skill(conn, user_id).await? else {
            return Ok(None);
        };
        let skill_name = conn.skill_name(skill_id).await?;
        Ok(Some(Session::new(user_id, skill_id, skill_name)))
    }

    async fn next_skill(
        &self,
        conn: &mut dyn SkillConnection,
        user_id: UserId,
    ) -> Result<Option<SkillId>> {
        let mastered = conn.mastered_skill_ids(user_id).await?;
        debug!(user_id, mastered = mastered.len(), "Loaded mastered skills");
        find_next_skill(
            conn,
            &mastered,
            self.settings.goal_skill_id,
            self.settings.max_prerequisite_depth,
        )
        .await
    }

    async fn step(
        &self,
        conn: &mut dyn SkillConnection,
        slot: &mut SessionSlot,
        mut session: Session,
        message: &str,
    ) -> Result<String> {
        match session.phase {
            Phase::Crawl => {
                let reply = self
                    .generate(slot, &prompts::explain(&session.skill_name))
                    .await?;
                session.advance(Phase::WalkAsk);
                slot.save(session);
                Ok(reply)
            }

            Phase::WalkAsk => {
                let prompt = prompts::walk_question(&session.skill_name, message);
                let reply = self.generate(slot, &prompt).await?;
                session.last_question = Some(reply.clone());
                session.advance(Phase::WalkEvaluate);
                slot.save(session);
                Ok(reply)
            }

            Phase::WalkEvaluate => {
                let question = session.last_question.as_deref().unwrap_or_default();
                let prompt = prompts::walk_evaluation(&session.skill_name, question, message);
                let judgment = self.judge(slot, &prompt).await?;

                let mut reply = judgment.feedback;
                if !judgment.is_correct {
                    append_note(&mut reply, prompts::WALK_CONTINUATION_NOTE);
                }
                session.last_question = None;
                session.advance(Phase::RunAsk);
                slot.save(session);
                Ok(reply)
            }

            Phase::RunAsk => {
                let reply = self
                    .generate(slot, &prompts::run_question(&session.skill_name))
                    .await?;
                session.last_question = Some(reply.clone());
                session.advance(Phase::RunEvaluate);
                slot.save(session);
                Ok(reply)
            }

            Phase::RunEvaluate => {
                let question = session.last_question.as_deref().unwrap_or_default();
                let prompt = prompts::run_evaluation(&session.skill_name, question, message);
                let judgment = self.judge(slot, &prompt).await?;

                let mut reply = judgment.feedback;
                if judgment.is_correct {
                    conn.record_mastery(session.user_id, session.skill_id)
                        .await?;
                    info!(
                        user = %slot.username(),
                        skill_id = session.skill_id,
                        attempts = session.attempts,
                        "Skill mastered"
                    );
                    append_note(&mut reply, &prompts::mastery_note(&session.skill_name));
                    session.advance(Phase::Summary);
                } else {
                    session.attempts += 1;
                    info!(
                        user = %slot.username(),
                        skill_id = session.skill_id,
                        attempts = session.attempts,
                        "Assessment answer incorrect, returning to practice"
                    );
                    append_note(&mut reply, prompts::RUN_RETRY_NOTE);
                    session.advance(Phase::WalkAsk);
                }
                session.last_question = None;
                slot.save(session);
                Ok(reply)
            }

            Phase::Summary => {
                let prompt = match self.next_skill(conn, session.user_id).await? {
                    Some(next) => {
                        let next_name = conn.skill_name(next).await?;
                        prompts::next_topic(&session.skill_name, &next_name)
                    }
                    None => prompts::path_complete(&session.skill_name, &self.settings.path_name),
                };
                slot.delete();
                info!(user = %slot.username(), skill_id = session.skill_id, "Session complete");
                self.generate(slot, &prompt).await
            }
        }
    }

    /// Calls the generator and parses its reply as a judgment.
    ///
    /// A malformed judgment is returned as an error without touching the slot.
    async fn judge(&self, slot: &mut SessionSlot, prompt: &Prompt) -> Result<Judgment> {
        let raw = self.generate(slot, prompt).await?;
        Judgment::parse(&raw).map_err(|e| {
            warn!(user = %slot.username(), error = %e, "Malformed evaluation from generator");
            TutorError::MalformedJudgment(e)
        })
    }

    /// Calls the generator under the configured timeout.
    ///
    /// Any failure discards the session held in `slot`.
    async fn generate(&self, slot: &mut SessionSlot, prompt: &Prompt) -> Result<String> {
        let timeout = self.settings.generator_timeout;
        let outcome = match tokio::time::timeout(timeout, self.generator.generate(prompt, timeout))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(GeneratorError::timeout(timeout)),
        };

        match outcome {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!(
                    user = %slot.username(),
                    error = %e,
                    transient = e.is_transient(),
                    "Text generation failed, discarding session"
                );
                slot.delete();
                Err(TutorError::Generator(e))
            }
        }
    }
}

fn append_note(reply: &mut String, note: &str) {
    reply.push_str("\n\n");
    reply.push_str(note);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};
    use tokio_test::assert_ok;
    use tutor_generator::{ApiErrorKind, ScriptedGenerator};
    use tutor_store::{Curriculum, MemorySkillStore};

    use super::*;
    use crate::error::MALFORMED_JUDGMENT_REPLY;

    const CORRECT: &str = r#"{"is_correct": true, "feedback": "Correct!"}"#;
    const INCORRECT: &str = r#"{"is_correct": false, "feedback": "Not quite."}"#;

    struct Fixture {
        tutor: Tutor,
        store: MemorySkillStore,
        generator: ScriptedGenerator,
    }

    fn fixture(curriculum: Curriculum) -> Fixture {
        let store = MemorySkillStore::new(curriculum);
        let generator = ScriptedGenerator::new();
        let tutor = Tutor::new(
            Arc::new(store.clone()),
            Arc::new(generator.clone()),
            Arc::new(SessionRegistry::new()),
            TutorSettings::default(),
        );
        Fixture {
            tutor,
            store,
            generator,
        }
    }

    async fn phase_of(tutor: &Tutor, username: &str) -> Option<Phase> {
        tutor.sessions().get(username).await.map(|s| s.phase)
    }

    #[tokio::test]
    async fn five_steps_master_a_skill() {
        let f = fixture(Curriculum::algebra());
        for reply in ["Explanation", "What is 2 + x when x = 3?", CORRECT, "Evaluate 4x for x = 2", CORRECT] {
            f.generator.push_reply(reply).await;
        }

        assert_eq!(f.tutor.respond("ana", "hi").await.unwrap(), "Explanation");
        assert_eq!(phase_of(&f.tutor, "ana").await, Some(Phase::WalkAsk));

        f.tutor.respond("ana", "yes").await.unwrap();
        let session = f.tutor.sessions().get("ana").await.unwrap();
        assert_eq!(session.phase, Phase::WalkEvaluate);
        assert_eq!(session.last_question.as_deref(), Some("What is 2 + x when x = 3?"));

        assert_eq!(f.tutor.respond("ana", "5").await.unwrap(), "Correct!");
        assert_eq!(phase_of(&f.tutor, "ana").await, Some(Phase::RunAsk));

        f.tutor.respond("ana", "ok").await.unwrap();
        assert_eq!(phase_of(&f.tutor, "ana").await, Some(Phase::RunEvaluate));

        let reply = f.tutor.respond("ana", "8").await.unwrap();
        assert!(reply.contains("**You've mastered: Variables and Expressions!**"));
        assert_eq!(phase_of(&f.tutor, "ana").await, Some(Phase::Summary));

        let user_id = f.store.user_id("ana").await.unwrap();
        assert_eq!(f.store.mastery_records(user_id).await, vec![1]);

        f.generator.push_reply("On to Order of Operations!").await;
        let reply = f.tutor.respond("ana", "next").await.unwrap();
        assert_eq!(reply, "On to Order of Operations!");
        assert!(!f.tutor.sessions().contains("ana").await);

        let sent = f.generator.prompts().await;
        assert!(sent.last().unwrap().text.contains("'Order of Operations'"));
    }

    #[tokio::test]
    async fn incorrect_walk_answer_still_advances() {
        let f = fixture(Curriculum::algebra());
        for reply in ["Explanation", "Question", INCORRECT] {
            f.generator.push_reply(reply).await;
        }
        f.tutor.respond("ben", "hi").await.unwrap();
        f.tutor.respond("ben", "yes").await.unwrap();

        let reply = f.tutor.respond("ben", "wrong").await.unwrap();
        assert!(reply.starts_with("Not quite."));
        assert!(reply.ends_with(prompts::WALK_CONTINUATION_NOTE));
        assert_eq!(phase_of(&f.tutor, "ben").await, Some(Phase::RunAsk));
    }

    #[tokio::test]
    async fn incorrect_run_answer_loops_back_to_walk() {
        let f = fixture(Curriculum::algebra());
        for reply in ["Explanation", "Q1", CORRECT, "Q2", INCORRECT] {
            f.generator.push_reply(reply).await;
        }
        for message in ["hi", "yes", "a", "ok"] {
            f.tutor.respond("cy", message).await.unwrap();
        }

        let reply = f.tutor.respond("cy", "wrong").await.unwrap();
        assert!(reply.ends_with(prompts::RUN_RETRY_NOTE));

        let session = f.tutor.sessions().get("cy").await.unwrap();
        assert_eq!(session.phase, Phase::WalkAsk);
        assert_eq!(session.skill_id, 1);
        assert_eq!(session.attempts, 1);
        assert_eq!(session.last_question, None);

        let user_id = f.store.user_id("cy").await.unwrap();
        assert!(f.store.mastery_records(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_judgment_leaves_session_untouched() {
        let f = fixture(Curriculum::algebra());
        for reply in ["Explanation", "Q1", CORRECT, "Q2", "Looks right to me!"] {
            f.generator.push_reply(reply).await;
        }
        for message in ["hi", "yes", "a", "ok"] {
            f.tutor.respond("di", message).await.unwrap();
        }
        let before = f.tutor.sessions().get("di").await.unwrap();

        let err = f.tutor.respond("di", "8").await.unwrap_err();
        assert!(matches!(err, TutorError::MalformedJudgment(_)));
        assert_eq!(err.reply_text(), MALFORMED_JUDGMENT_REPLY);

        let after = f.tutor.sessions().get("di").await.unwrap();
        assert_eq!(after, before);
        let user_id = f.store.user_id("di").await.unwrap();
        assert!(f.store.mastery_records(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn mastered_goal_returns_completion_without_session() {
        let f = fixture(Curriculum::algebra());
        for skill_id in 1..=7 {
            f.store.grant_mastery("eve", skill_id).await;
        }

        let reply = f.tutor.respond("eve", "hello").await.unwrap();
        assert_eq!(reply, prompts::completion_message("Algebra"));
        assert!(!f.tutor.sessions().contains("eve").await);
        assert!(f.generator.prompts().await.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_picks_next_unmastered_skill() {
        let f = fixture(Curriculum::algebra());
        for skill_id in 1..=5 {
            f.store.grant_mastery("fay", skill_id).await;
        }
        f.generator.push_reply("Explanation").await;

        assert_ok!(f.tutor.respond("fay", "hi").await);
        let session = f.tutor.sessions().get("fay").await.unwrap();
        assert_eq!(session.skill_id, 6);
        assert_eq!(session.skill_name, "The Distributive Property");
    }

    #[tokio::test]
    async fn generator_failure_discards_session() {
        let f = fixture(Curriculum::algebra());
        f.generator.push_reply("Explanation").await;
        f.generator
            .push_failure(GeneratorError::api(ApiErrorKind::Server, "boom"))
            .await;

        assert_ok!(f.tutor.respond("gus", "hi").await);
        assert!(f.tutor.sessions().contains("gus").await);

        let err = f.tutor.respond("gus", "yes").await.unwrap_err();
        assert!(err.discards_session());
        assert!(!f.tutor.sessions().contains("gus").await);
    }

    #[tokio::test(start_paused = true)]
    async fn generator_timeout_discards_session() {
        let f = fixture(Curriculum::algebra());
        f.generator.push_reply("Explanation").await;
        f.generator.push_stall().await;

        f.tutor.respond("hal", "hi").await.unwrap();
        let err = f.tutor.respond("hal", "yes").await.unwrap_err();
        assert!(matches!(
            err,
            TutorError::Generator(GeneratorError::Timeout { timeout_ms: 300_000 })
        ));
        assert!(!f.tutor.sessions().contains("hal").await);
    }

    #[tokio::test]
    async fn store_offline_is_reported_before_anything_else() {
        let f = fixture(Curriculum::algebra());
        f.store.set_available(false);

        let err = f.tutor.respond("ivy", "hi").await.unwrap_err();
        assert!(matches!(err, TutorError::StoreUnavailable(_)));
        assert!(f.store.user_id("ivy").await.is_none());
        assert!(f.generator.prompts().await.is_empty());
    }

    #[tokio::test]
    async fn cyclic_curriculum_is_a_critical_error() {
        let curriculum = Curriculum::new()
            .with_skill(7, "Goal")
            .with_skill(1, "Loop")
            .with_prerequisite(7, 1)
            .with_prerequisite(1, 7);
        let f = fixture(curriculum);

        let err = f.tutor.respond("jo", "hi").await.unwrap_err();
        assert!(matches!(err, TutorError::PrerequisiteCycle { skill_id: 7 }));
        assert!(err.reply_text().starts_with("A critical error occurred"));
        assert!(!f.tutor.sessions().contains("jo").await);
    }

    #[tokio::test]
    async fn last_skill_summary_congratulates_on_the_path() {
        let f = fixture(Curriculum::algebra());
        for skill_id in 1..=6 {
            f.store.grant_mastery("kim", skill_id).await;
        }
        for reply in ["Explanation", "Q1", CORRECT, "Q2", CORRECT, "You did it!"] {
            f.generator.push_reply(reply).await;
        }
        for message in ["hi", "yes", "a", "ok", "b"] {
            f.tutor.respond("kim", message).await.unwrap();
        }

        assert_eq!(f.tutor.respond("kim", "next").await.unwrap(), "You did it!");
        let sent = f.generator.prompts().await;
        assert!(sent.last().unwrap().text.contains("entire learning path"));

        assert_eq!(
            f.tutor.respond("kim", "more?").await.unwrap(),
            prompts::completion_message("Algebra")
        );
    }

    /// Counts how many store connections are checked out at once.
    #[derive(Default)]
    struct ConnectionGauge {
        live: AtomicUsize,
        peak: AtomicUsize,
    }

    struct GaugedStore {
        inner: MemorySkillStore,
        gauge: Arc<ConnectionGauge>,
    }

    struct GaugedConnection {
        inner: Box<dyn SkillConnection>,
        gauge: Arc<ConnectionGauge>,
    }

    impl Drop for GaugedConnection {
        fn drop(&mut self) {
            self.gauge.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl SkillStore for GaugedStore {
        async fn acquire(&self) -> tutor_store::Result<Box<dyn SkillConnection>> {
            let inner = self.inner.acquire().await?;
            let live = self.gauge.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(live, Ordering::SeqCst);
            Ok(Box::new(GaugedConnection {
                inner,
                gauge: Arc::clone(&self.gauge),
            }))
        }
    }

    #[async_trait]
    impl SkillConnection for GaugedConnection {
        async fn ensure_user(&mut self, username: &str) -> tutor_store::Result<UserId> {
            self.inner.ensure_user(username).await
        }

        async fn mastered_skill_ids(
            &mut self,
            user_id: UserId,
        ) -> tutor_store::Result<HashSet<SkillId>> {
            self.inner.mastered_skill_ids(user_id).await
        }

        async fn prerequisite_ids(&mut self, skill_id: SkillId) -> tutor_store::Result<Vec<SkillId>> {
            self.inner.prerequisite_ids(skill_id).await
        }

        async fn skill_name(&mut self, skill_id: SkillId) -> tutor_store::Result<String> {
            self.inner.skill_name(skill_id).await
        }

        async fn record_mastery(
            &mut self,
            user_id: UserId,
            skill_id: SkillId,
        ) -> tutor_store::Result<()> {
            self.inner.record_mastery(user_id, skill_id).await
        }
    }

    /// Holds every generation until the test hands out a permit.
    struct GatedGenerator {
        started: Notify,
        release: Semaphore,
    }

    #[async_trait]
    impl TextGenerator for GatedGenerator {
        async fn generate(
            &self,
            _prompt: &Prompt,
            _timeout: Duration,
        ) -> tutor_generator::Result<String> {
            self.started.notify_one();
            self.release.acquire().await.unwrap().forget();
            Ok(CORRECT.to_string())
        }
    }

    #[tokio::test]
    async fn queued_requests_do_not_hold_connections() {
        let gauge = Arc::new(ConnectionGauge::default());
        let store = GaugedStore {
            inner: MemorySkillStore::new(Curriculum::algebra()),
            gauge: Arc::clone(&gauge),
        };
        let generator = Arc::new(GatedGenerator {
            started: Notify::new(),
            release: Semaphore::new(0),
        });
        let tutor = Arc::new(Tutor::new(
            Arc::new(store),
            Arc::clone(&generator) as Arc<dyn TextGenerator>,
            Arc::new(SessionRegistry::new()),
            TutorSettings::default(),
        ));

        let requests: Vec<_> = ["hi", "yes", "5"]
            .into_iter()
            .map(|message| {
                let tutor = Arc::clone(&tutor);
                tokio::spawn(async move { tutor.respond("ana", message).await })
            })
            .collect();

        // One request is generating, the others wait on the session slot
        generator.started.notified().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gauge.live.load(Ordering::SeqCst), 1);

        generator.release.add_permits(3);
        for request in requests {
            assert_ok!(request.await.unwrap());
        }

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(gauge.live.load(Ordering::SeqCst), 0);
        assert_eq!(phase_of(&tutor, "ana").await, Some(Phase::RunAsk));
    }

    #[tokio::test]
    async fn offline_store_releases_the_session_slot() {
        let f = fixture(Curriculum::algebra());
        f.store.set_available(false);
        assert!(f.tutor.respond("lou", "hi").await.is_err());

        f.store.set_available(true);
        f.generator.push_reply("Explanation").await;
        assert_eq!(f.tutor.respond("lou", "hi").await.unwrap(), "Explanation");
    }
}
