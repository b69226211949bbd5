//! End-to-end tests for the `/chat` API.
//!
//! Each test starts a real HTTP server backed by the in-memory skill store
//! and a scripted generator, then drives it with `reqwest` the way a browser
//! client would.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tutor_generator::{ApiErrorKind, GeneratorError, ScriptedGenerator};
use tutor_orchestrator::{
    create_router, AppState, Phase, SessionRegistry, Tutor, TutorSettings, HEALTH_MESSAGE,
};
use tutor_store::{Curriculum, MemorySkillStore};

const CORRECT: &str = r#"{"is_correct": true, "feedback": "Correct!"}"#;
const INCORRECT: &str = r#"{"is_correct": false, "feedback": "Not quite."}"#;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// A running server plus handles on its collaborators.
struct Harness {
    base_url: String,
    client: reqwest::Client,
    store: MemorySkillStore,
    generator: ScriptedGenerator,
    sessions: Arc<SessionRegistry>,
    _server: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn start(curriculum: Curriculum) -> Self {
        Self::start_with(curriculum, TutorSettings::default()).await
    }

    async fn start_with(curriculum: Curriculum, settings: TutorSettings) -> Self {
        let store = MemorySkillStore::new(curriculum);
        let generator = ScriptedGenerator::new();
        let sessions = Arc::new(SessionRegistry::new());
        let tutor = Tutor::new(
            Arc::new(store.clone()),
            Arc::new(generator.clone()),
            Arc::clone(&sessions),
            settings,
        );

        let port = find_available_port();
        let addr = format!("127.0.0.1:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind");
        let router = create_router(AppState::new(tutor));
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            store,
            generator,
            sessions,
            _server: server,
        }
    }

    async fn script(&self, replies: &[&str]) {
        for reply in replies {
            self.generator.push_reply(*reply).await;
        }
    }

    /// Sends a chat message and returns the status code and reply text.
    async fn chat(&self, user: &str, message: &str) -> (u16, String) {
        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .json(&json!({ "message": message, "user_id": user }))
            .send()
            .await
            .expect("Request failed");

        let status = response.status().as_u16();
        let body: Value = response.json().await.expect("Body is not JSON");
        let reply = body["reply"]
            .as_str()
            .expect("Body has no reply field")
            .to_string();
        (status, reply)
    }

    async fn phase(&self, user: &str) -> Option<Phase> {
        self.sessions.get(user).await.map(|s| s.phase)
    }

    async fn mastered(&self, user: &str) -> Vec<i32> {
        let user_id = self.store.user_id(user).await.expect("User not provisioned");
        self.store.mastery_records(user_id).await
    }
}

#[tokio::test]
async fn test_health_check() {
    let harness = Harness::start(Curriculum::algebra()).await;

    let body: Value = harness
        .client
        .get(format!("{}/", harness.base_url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Body is not JSON");

    assert_eq!(body, json!({ "message": HEALTH_MESSAGE }));
}

#[tokio::test]
async fn test_full_cycle_masters_skill_and_moves_on() {
    let harness = Harness::start(Curriculum::algebra()).await;
    harness
        .script(&[
            "A variable is a letter that stands for a number. Ready?",
            "If x = 3, what is x + 2? Start by replacing x.",
            CORRECT,
            "Evaluate 4y when y = 5.",
            r#"4 * 5 = 20, the student said 20. {"is_correct": true, "feedback": "Spot on."}"#,
            "Great work! Next up: Order of Operations.",
            "Order of Operations tells us which step comes first.",
        ])
        .await;

    let (status, reply) = harness.chat("ana", "hi").await;
    assert_eq!(status, 200);
    assert!(reply.starts_with("A variable"));
    assert_eq!(harness.phase("ana").await, Some(Phase::WalkAsk));

    let (_, reply) = harness.chat("ana", "yes").await;
    assert!(reply.contains("x + 2"));

    let (_, reply) = harness.chat("ana", "5").await;
    assert_eq!(reply, "Correct!");
    assert_eq!(harness.phase("ana").await, Some(Phase::RunAsk));

    harness.chat("ana", "ready").await;
    assert_eq!(harness.phase("ana").await, Some(Phase::RunEvaluate));

    let (status, reply) = harness.chat("ana", "20").await;
    assert_eq!(status, 200);
    assert!(reply.starts_with("Spot on."));
    assert!(reply.contains("**You've mastered: Variables and Expressions!**"));
    assert_eq!(harness.mastered("ana").await, vec![1]);

    let (_, reply) = harness.chat("ana", "what's next?").await;
    assert_eq!(reply, "Great work! Next up: Order of Operations.");
    assert!(!harness.sessions.contains("ana").await);
    assert_eq!(harness.mastered("ana").await, vec![1]);

    // The next message opens a session for the following skill
    harness.chat("ana", "yes").await;
    let session = harness.sessions.get("ana").await.expect("No session");
    assert_eq!(session.skill_id, 2);
    assert_eq!(session.skill_name, "Order of Operations");
    assert_eq!(session.phase, Phase::WalkAsk);
}

#[tokio::test]
async fn test_incorrect_assessment_returns_to_practice() {
    let harness = Harness::start(Curriculum::algebra()).await;
    harness
        .script(&["Explain", "Walk question", INCORRECT, "Run question", INCORRECT])
        .await;

    for message in ["hi", "yes", "wrong", "ok"] {
        let (status, _) = harness.chat("ben", message).await;
        assert_eq!(status, 200);
    }
    let (_, reply) = harness.chat("ben", "still wrong").await;
    assert!(reply.contains("Not quite yet. Let's practice this once more."));

    let session = harness.sessions.get("ben").await.expect("No session");
    assert_eq!(session.phase, Phase::WalkAsk);
    assert_eq!(session.skill_id, 1);
    assert_eq!(session.attempts, 1);
    assert!(harness.mastered("ben").await.is_empty());
}

#[tokio::test]
async fn test_malformed_judgment_can_be_retried() {
    let harness = Harness::start(Curriculum::algebra()).await;
    harness
        .script(&["Explain", "Walk question", CORRECT, "Run question"])
        .await;
    for message in ["hi", "yes", "5", "ok"] {
        harness.chat("cy", message).await;
    }
    let before = harness.sessions.get("cy").await.expect("No session");

    harness.script(&["I think the student is right."]).await;
    let (status, reply) = harness.chat("cy", "20").await;
    assert_eq!(status, 502);
    assert!(reply.contains("malformed"));
    assert_eq!(harness.sessions.get("cy").await, Some(before));
    assert!(harness.mastered("cy").await.is_empty());

    harness.script(&[CORRECT]).await;
    let (status, reply) = harness.chat("cy", "20").await;
    assert_eq!(status, 200);
    assert!(reply.contains("You've mastered"));
    assert_eq!(harness.mastered("cy").await, vec![1]);
}

#[tokio::test]
async fn test_completed_path_gets_completion_message() {
    let harness = Harness::start(Curriculum::algebra()).await;
    for skill_id in 1..=7 {
        harness.store.grant_mastery("dee", skill_id).await;
    }

    let (status, reply) = harness.chat("dee", "hello").await;
    assert_eq!(status, 200);
    assert_eq!(
        reply,
        "### Congratulations!\n\nYou have mastered the entire Algebra path! Great work."
    );
    assert!(!harness.sessions.contains("dee").await);
    assert!(harness.generator.prompts().await.is_empty());
}

#[tokio::test]
async fn test_generator_failure_discards_session() {
    let harness = Harness::start(Curriculum::algebra()).await;
    harness.script(&["Explain"]).await;
    harness.chat("eli", "hi").await;
    assert!(harness.sessions.contains("eli").await);

    harness
        .generator
        .push_failure(GeneratorError::api(ApiErrorKind::RateLimit, "quota"))
        .await;
    let (status, reply) = harness.chat("eli", "yes").await;
    assert_eq!(status, 502);
    assert!(reply.starts_with("Sorry"));
    assert!(!harness.sessions.contains("eli").await);

    // The student starts over at Crawl
    harness.script(&["Explain again"]).await;
    let (_, reply) = harness.chat("eli", "hello?").await;
    assert_eq!(reply, "Explain again");
    assert_eq!(harness.phase("eli").await, Some(Phase::WalkAsk));
}

#[tokio::test]
async fn test_generator_timeout_is_504() {
    let settings = TutorSettings {
        generator_timeout: Duration::from_millis(100),
        ..TutorSettings::default()
    };
    let harness = Harness::start_with(Curriculum::algebra(), settings).await;
    harness.generator.push_stall().await;

    let (status, reply) = harness.chat("fin", "hi").await;
    assert_eq!(status, 504);
    assert!(reply.contains("timed out"));
    assert!(!harness.sessions.contains("fin").await);
}

#[tokio::test]
async fn test_store_offline_is_503() {
    let harness = Harness::start(Curriculum::algebra()).await;
    harness.store.set_available(false);

    let (status, reply) = harness.chat("gil", "hi").await;
    assert_eq!(status, 503);
    assert_eq!(reply, "Error: Could not connect to the database.");

    harness.store.set_available(true);
    harness.script(&["Explain"]).await;
    let (status, _) = harness.chat("gil", "hi").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_cyclic_curriculum_is_500() {
    let curriculum = Curriculum::new()
        .with_skill(7, "Goal")
        .with_skill(3, "Middle")
        .with_skill(1, "Root")
        .with_prerequisite(7, 3)
        .with_prerequisite(3, 1)
        .with_prerequisite(1, 3);
    let harness = Harness::start(curriculum).await;

    let (status, reply) = harness.chat("hal", "hi").await;
    assert_eq!(status, 500);
    assert!(reply.starts_with("A critical error occurred"));
    assert!(reply.contains("cycle"));
}

#[tokio::test]
async fn test_malformed_request_body_is_rejected() {
    let harness = Harness::start(Curriculum::algebra()).await;

    let response = harness
        .client
        .post(format!("{}/chat", harness.base_url))
        .header("content-type", "application/json")
        .body(r#"{"message": 42}"#)
        .send()
        .await
        .expect("Request failed");

    assert!(response.status().is_client_error());
}
