//! Scripted Backend
//!
//! A deterministic backend for tests and offline hosts. Each call to
//! `send_streaming` plays the next queued [`Script`] (or the default script
//! once the queue is empty) and records the request it was given.
//!
//! Pacing is driven by a gate instead of timers: when gated, every step waits
//! for a permit released by the test, so "slow backend" scenarios stay exact.
//!
//! ```ignore
//! let backend = ScriptedBackend::new(Script::tokens(["Hel", "lo"]));
//! backend.push_script(Script::tokens(["Hel", "lo"]).then_fail("connection reset"));
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use super::traits::{LlmBackend, LlmRequest, ModelInfo, StreamingToken};

/// One step of a scripted stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptStep {
    /// Emit a token
    Token(String),
    /// Emit the completion marker and stop
    Complete,
    /// Emit an error and stop
    Error(String),
    /// Close the channel without completing
    Disconnect,
    /// Keep the stream open without producing anything until abandoned
    Stall,
}

/// A full scripted response
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    /// Refuse to open the stream with this message
    pub open_error: Option<String>,
    /// Steps played in order
    pub steps: Vec<ScriptStep>,
}

impl Script {
    /// Tokens followed by a normal completion
    pub fn tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::partial(tokens).then(ScriptStep::Complete)
    }

    /// Tokens with no terminating step
    pub fn partial<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            open_error: None,
            steps: tokens
                .into_iter()
                .map(|t| ScriptStep::Token(t.into()))
                .collect(),
        }
    }

    /// A backend that refuses the request outright
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            open_error: Some(message.into()),
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn then(mut self, step: ScriptStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Replace the completion (if any) with an error
    #[must_use]
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        if self.steps.last() == Some(&ScriptStep::Complete) {
            self.steps.pop();
        }
        self.then(ScriptStep::Error(message.into()))
    }

    /// Replace the completion (if any) with a stall
    #[must_use]
    pub fn then_stall(mut self) -> Self {
        if self.steps.last() == Some(&ScriptStep::Complete) {
            self.steps.pop();
        }
        self.then(ScriptStep::Stall)
    }
}

/// Backend that plays back scripted responses
pub struct ScriptedBackend {
    default_script: Script,
    queued: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<LlmRequest>>,
    gate: Option<Arc<Semaphore>>,
    models: Vec<String>,
}

impl ScriptedBackend {
    /// Backend that plays `script` for every request
    #[must_use]
    pub fn new(script: Script) -> Self {
        Self {
            default_script: script,
            queued: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: None,
            models: vec!["scripted".to_string()],
        }
    }

    /// Require a released permit before every step
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Models reported by `list_models`
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Queue a script for the next request
    pub fn push_script(&self, script: Script) {
        self.queued.lock().push_back(script);
    }

    /// Let `steps` more steps through a gated backend
    pub fn release(&self, steps: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(steps);
        }
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    /// Number of streams opened (including refused ones)
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next_script(&self) -> Script {
        self.queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone())
    }
}

#[async_trait]
impl LlmBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "Scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        self.requests.lock().push(request.clone());
        let script = self.next_script();

        if let Some(message) = script.open_error {
            anyhow::bail!(message);
        }

        let (tx, rx) = mpsc::channel(script.steps.len().max(1));
        let gate = self.gate.clone();

        tokio::spawn(async move {
            for step in script.steps {
                if let Some(gate) = &gate {
                    let permit = tokio::select! {
                        () = tx.closed() => return,
                        permit = gate.acquire() => permit,
                    };
                    match permit {
                        Ok(permit) => permit.forget(),
                        Err(_) => return,
                    }
                }

                let token = match step {
                    ScriptStep::Token(text) => StreamingToken::Token(text),
                    ScriptStep::Complete => StreamingToken::Complete,
                    ScriptStep::Error(message) => StreamingToken::Error(message),
                    ScriptStep::Disconnect => return,
                    ScriptStep::Stall => {
                        tx.closed().await;
                        return;
                    }
                };
                let finished = !matches!(token, StreamingToken::Token(_));
                if tx.send(token).await.is_err() || finished {
                    return;
                }
            }
        });

        Ok(rx)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        Ok(self
            .models
            .iter()
            .map(|name| ModelInfo {
                name: name.clone(),
                size: None,
                parameters: None,
            })
            .collect())
    }
}
