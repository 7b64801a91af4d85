//! Testing utilities including a scripted model client.
//!
//! Useful for exercising stages and the full pipeline without making real
//! model calls.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::ModelCallError;
use crate::llm::ModelClient;

/// Failure a scripted rule produces instead of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    RateLimited,
    Unauthorized,
    ServerError,
}

impl ScriptedFailure {
    fn to_error(self) -> ModelCallError {
        match self {
            ScriptedFailure::RateLimited => ModelCallError::RateLimited,
            ScriptedFailure::Unauthorized => ModelCallError::Unauthorized { status: 401 },
            ScriptedFailure::ServerError => ModelCallError::Status {
                status: 500,
                body: "scripted failure".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Fail(ScriptedFailure),
    Hang,
}

/// Record of a call made to the scripted model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub prompt: String,
    pub system: Option<String>,
}

/// A deterministic model client.
///
/// Rules are matched in insertion order against the prompt text; the first
/// rule whose needle occurs in the prompt decides the outcome.
#[derive(Default)]
pub struct ScriptedModel {
    rules: Vec<(String, Scripted)>,
    fallback: Option<Scripted>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` when the prompt contains `needle`.
    pub fn reply_when(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules
            .push((needle.into(), Scripted::Reply(response.into())));
        self
    }

    /// Fail when the prompt contains `needle`.
    pub fn fail_when(mut self, needle: impl Into<String>, failure: ScriptedFailure) -> Self {
        self.rules.push((needle.into(), Scripted::Fail(failure)));
        self
    }

    /// Never respond when the prompt contains `needle`.
    pub fn hang_when(mut self, needle: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Scripted::Hang));
        self
    }

    /// Response for prompts no rule matches.
    pub fn otherwise(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(Scripted::Reply(response.into()));
        self
    }

    /// Get all calls made to this model.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of calls whose prompt contains `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.prompt.contains(needle))
            .count()
    }

    fn script_for(&self, prompt: &str) -> Option<Scripted> {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, scripted)| scripted.clone())
            .or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn invoke(&self, prompt: &str, system: Option<&str>) -> Result<String, ModelCallError> {
        self.calls.lock().unwrap().push(RecordedCall {
            prompt: prompt.to_string(),
            system: system.map(str::to_string),
        });

        match self.script_for(prompt) {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(failure)) => Err(failure.to_error()),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Err(ModelCallError::Status {
                status: 404,
                body: "no scripted response".to_string(),
            }),
        }
    }
}
