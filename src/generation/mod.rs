//! Generation port
//!
//! "Given a text prompt, return text." Both the analyst (SQL drafting) and
//! the compliance pipeline (name recognition) talk to the generation service
//! only through this trait.

use crate::error::PipelineError;
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
}

impl GenerationOptions {
    pub fn with_temperature(temperature: f32) -> Self {
        Self { temperature }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self { temperature: 0.0 }
    }
}

/// Text-completion capability. Fails with `GenerationUnavailable` on
/// timeout or service error.
#[async_trait]
pub trait GenerationPort: Send + Sync {
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String>;
}

/// Deterministic generation port that replays queued responses in order.
///
/// Once the queue is empty it answers with the fallback response if one was
/// configured, otherwise with `GenerationUnavailable`. Every prompt is
/// captured for later inspection.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String>>>,
    fallback: Option<String>,
    prompts: Mutex<Vec<(String, GenerationOptions)>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            fallback: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A port that returns the same response to every prompt.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self::new(Vec::<String>::new()).with_fallback(response)
    }

    /// A port whose every call fails.
    pub fn unavailable() -> Self {
        Self::new(Vec::<String>::new())
    }

    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Queue a failure at the back of the script.
    pub fn then_fail(self, reason: impl Into<String>) -> Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(Err(PipelineError::GenerationUnavailable(reason.into())));
        }
        self
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.iter().map(|(prompt, _)| prompt.clone()).collect())
            .unwrap_or_default()
    }

    /// Options received so far, in call order.
    pub fn options(&self) -> Vec<GenerationOptions> {
        self.prompts
            .lock()
            .map(|p| p.iter().map(|(_, options)| *options).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GenerationPort for ScriptedGenerator {
    async fn complete(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.to_string(), *options));
        }

        let next = self
            .responses
            .lock()
            .map_err(|_| PipelineError::GenerationUnavailable("script lock poisoned".to_string()))?
            .pop_front();

        match next {
            Some(response) => response,
            None => self.fallback.clone().ok_or_else(|| {
                PipelineError::GenerationUnavailable("no scripted response left".to_string())
            }),
        }
    }
}
