//! `llm-client`: the text-generation seam used by the refinement loop.
//!
//! ```text
//! LlmClient (trait)
//!     ├── HttpLlmClient   OpenAI-compatible /chat/completions or Ollama /api/generate
//!     └── ScriptedClient  canned replies, for tests
//! ```
//!
//! Callers only ever see `generate(prompt) -> String`; prompt construction
//! and JSON extraction stay with the caller.

pub mod error;
pub mod http;
pub mod scripted;

use async_trait::async_trait;

pub use error::LlmError;
pub use http::{HttpLlmClient, HttpLlmConfig, Provider};
pub use scripted::ScriptedClient;

pub type Result<T> = std::result::Result<T, LlmError>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single-turn completion of `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;
}
