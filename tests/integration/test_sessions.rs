//! Integration tests for concurrent sessions.
//!
//! Requests for the same student must be handled one at a time, while
//! different students are served independently.

use std::net::TcpListener;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tutor_generator::ScriptedGenerator;
use tutor_orchestrator::{create_router, AppState, Phase, SessionRegistry, Tutor, TutorSettings};
use tutor_store::{Curriculum, MemorySkillStore};

/// Spawns the test server and returns its base URL and session registry.
async fn spawn_test_server(
    store: &MemorySkillStore,
    generator: &ScriptedGenerator,
) -> (String, Arc<SessionRegistry>) {
    let port = TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port();
    let addr = format!("127.0.0.1:{port}");

    let sessions = Arc::new(SessionRegistry::new());
    let tutor = Tutor::new(
        Arc::new(store.clone()),
        Arc::new(generator.clone()),
        Arc::clone(&sessions),
        TutorSettings::default(),
    );
    let router = create_router(AppState::new(tutor));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    (format!("http://{addr}"), sessions)
}

async fn chat(client: &reqwest::Client, base_url: &str, user: &str, message: &str) -> String {
    let body: Value = client
        .post(format!("{base_url}/chat"))
        .json(&json!({ "message": message, "user_id": user }))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Body is not JSON");
    body["reply"].as_str().expect("No reply").to_string()
}

#[tokio::test]
async fn test_same_user_requests_are_serialized() {
    let store = MemorySkillStore::new(Curriculum::algebra());
    let generator = ScriptedGenerator::new();
    generator.push_reply("Explanation").await;
    generator.push_reply("Practice question").await;
    let (base_url, sessions) = spawn_test_server(&store, &generator).await;
    let client = reqwest::Client::new();

    let replies = join_all([
        chat(&client, &base_url, "ana", "hi"),
        chat(&client, &base_url, "ana", "hello"),
    ])
    .await;

    let mut sorted = replies.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["Explanation", "Practice question"]);

    // Both phases ran in order against one session
    let session = sessions.get("ana").await.expect("No session");
    assert_eq!(session.phase, Phase::WalkEvaluate);
    assert_eq!(session.last_question.as_deref(), Some("Practice question"));
    assert_eq!(generator.prompts().await.len(), 2);
}

#[tokio::test]
async fn test_users_progress_independently() {
    let store = MemorySkillStore::new(Curriculum::algebra());
    store.grant_mastery("bea", 1).await;
    store.grant_mastery("bea", 2).await;

    let generator = ScriptedGenerator::new();
    for _ in 0..4 {
        generator.push_reply("Explanation").await;
    }
    let (base_url, sessions) = spawn_test_server(&store, &generator).await;
    let client = reqwest::Client::new();

    let users = ["ana", "bea", "cal", "dot"];
    let replies = join_all(users.iter().map(|user| chat(&client, &base_url, user, "hi"))).await;
    assert!(replies.iter().all(|reply| reply == "Explanation"));

    assert_eq!(sessions.active_count().await, 4);
    assert_eq!(sessions.get("ana").await.expect("No session").skill_id, 1);
    assert_eq!(sessions.get("bea").await.expect("No session").skill_id, 3);

    let mut ids = Vec::new();
    for user in users {
        ids.push(store.user_id(user).await.expect("User not provisioned"));
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}
