//! Scripted generator for tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{ApiErrorKind, GeneratorError, Prompt, Result, TextGenerator};

#[derive(Debug, Clone)]
enum Step {
    Reply(String),
    Fail(GeneratorError),
    Stall,
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Step>,
    prompts: Vec<Prompt>,
}

/// A [`TextGenerator`] that replays queued outcomes in order.
///
/// Every prompt it receives is recorded. When the queue runs dry it fails
/// with an [`ApiErrorKind::Other`] error. Clones share the same script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedGenerator {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGenerator {
    /// Creates a generator with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    pub async fn push_reply(&self, text: impl Into<String>) {
        self.script
            .lock()
            .await
            .steps
            .push_back(Step::Reply(text.into()));
    }

    /// Queues a failure.
    pub async fn push_failure(&self, error: GeneratorError) {
        self.script.lock().await.steps.push_back(Step::Fail(error));
    }

    /// Queues a call that never answers, so the caller's timeout fires.
    pub async fn push_stall(&self) {
        self.script.lock().await.steps.push_back(Step::Stall);
    }

    /// Returns every prompt received so far.
    pub async fn prompts(&self) -> Vec<Prompt> {
        self.script.lock().await.prompts.clone()
    }

    /// Number of queued steps not yet consumed.
    pub async fn remaining(&self) -> usize {
        self.script.lock().await.steps.len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> Result<String> {
        let step = {
            let mut script = self.script.lock().await;
            script.prompts.push(prompt.clone());
            script.steps.pop_front()
        };

        match step {
            Some(Step::Reply(text)) => Ok(text),
            Some(Step::Fail(error)) => Err(error),
            Some(Step::Stall) => {
                tokio::time::sleep(timeout).await;
                Err(GeneratorError::timeout(timeout))
            }
            None => Err(GeneratorError::api(
                ApiErrorKind::Other,
                "scripted generator has no replies left",
            )),
        }
    }
}
