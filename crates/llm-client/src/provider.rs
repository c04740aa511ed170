use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{LlmError, LlmResult};
use crate::prompt::AnalysisPrompt;

/// Backend-agnostic interface to the hosted model: prompt in, completion text out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(&self, prompt: &AnalysisPrompt) -> LlmResult<String>;

    fn backend_name(&self) -> &'static str;
}

/// One canned reply for [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Completion(String),
    /// Fails with an `InvalidResponse` carrying this message
    Failure(String),
    /// Fails as a timed-out request
    Timeout,
}

/// Replays canned completions in order, for tests and offline runs.
///
/// Once the script is exhausted every call fails.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<ScriptedReply>>,
    calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn completions<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(texts.into_iter().map(|t| ScriptedReply::Completion(t.into())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queries seen so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn generate(&self, prompt: &AnalysisPrompt) -> LlmResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(prompt.query.clone());
        }

        let next = self
            .replies
            .lock()
            .map_err(|_| LlmError::InvalidResponse("script lock poisoned".into()))?
            .pop_front();

        match next {
            Some(ScriptedReply::Completion(text)) => Ok(text),
            Some(ScriptedReply::Failure(msg)) => Err(LlmError::InvalidResponse(msg)),
            Some(ScriptedReply::Timeout) => Err(LlmError::Timeout(0)),
            None => Err(LlmError::InvalidResponse("no scripted reply left".into())),
        }
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}
