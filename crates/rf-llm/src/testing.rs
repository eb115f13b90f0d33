//! A scripted [`LlmHandle`] test double, analogous to a fixture provider
//! exercised against a router's integration tests. Exposed (not
//! `cfg(test)`-gated) so downstream crates' own tests can depend on it
//! without re-implementing a fake.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::contract::{CompletionRequest, CompletionResponse, LlmError, LlmHandle};

/// One scripted step: either a canned response or an error to return.
pub enum ScriptedStep {
    Respond(serde_json::Value),
    Fail(LlmError),
}

/// An [`LlmHandle`] that plays back a fixed script of responses/errors in
/// order, one per `complete` call, and records every request it received.
pub struct ScriptedLlm {
    script: Mutex<Vec<ScriptedStep>>,
    cursor: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new(script: Vec<ScriptedStep>) -> Self {
        Self {
            script: Mutex::new(script),
            cursor: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_made(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmHandle for ScriptedLlm {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(req);
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        if i >= script.len() {
            return Err(LlmError::ServiceUnavailable);
        }
        match std::mem::replace(&mut script[i], ScriptedStep::Fail(LlmError::ServiceUnavailable)) {
            ScriptedStep::Respond(v) => Ok(CompletionResponse {
                structured_output: Some(v),
                chunks: vec![],
                usage: None,
            }),
            ScriptedStep::Fail(e) => Err(e),
        }
    }
}
