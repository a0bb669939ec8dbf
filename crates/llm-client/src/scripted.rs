use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{LlmClient, LlmError, Result};

/// Replays a fixed queue of replies and records every prompt it was given.
/// An exhausted queue answers with [`LlmError::EmptyResponse`].
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err));
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or(Err(LlmError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let client = ScriptedClient::new(["one", "two"]);
        assert_eq!(client.generate("a").await.unwrap(), "one");
        assert_eq!(client.generate("b").await.unwrap(), "two");
        assert!(matches!(client.generate("c").await, Err(LlmError::EmptyResponse)));
        assert_eq!(client.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn queued_errors_surface() {
        let client = ScriptedClient::new(Vec::<String>::new());
        client.push_error(LlmError::Config("down".into()));
        assert!(matches!(client.generate("x").await, Err(LlmError::Config(_))));
    }
}
