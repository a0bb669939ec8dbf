//! Per-workspace LLM provider settings.
//!
//! API keys are never returned in clear text. Clients echo the masked value
//! back on update; an incoming key equal to [`MASKED_KEY`] for the same
//! config id means "keep the stored key".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SpecError};

pub const MASKED_KEY: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Openai,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub provider: LlmProvider,
    pub model: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfigInput {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub provider: LlmProvider,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Ollama => "http://localhost:11434",
        }
    }
}

impl LlmConfig {
    /// Copy safe to return to clients.
    pub fn masked(&self) -> LlmConfig {
        let mut out = self.clone();
        if out.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            out.api_key = Some(MASKED_KEY.to_string());
        }
        out
    }
}

/// Merge an update into the stored config (if any) for `workspace_id`.
pub fn apply_update(workspace_id: Uuid, existing: Option<&LlmConfig>, input: LlmConfigInput) -> Result<LlmConfig> {
    if input.model.trim().is_empty() {
        return Err(SpecError::MissingField("model".into()));
    }
    let now = Utc::now();
    let keep_key = input.api_key.as_deref() == Some(MASKED_KEY);

    let api_key = match existing {
        Some(prev) if keep_key && input.id == Some(prev.id) => prev.api_key.clone(),
        _ if keep_key => {
            return Err(SpecError::InvalidRequest(
                "masked api key does not match a stored config".into(),
            ))
        }
        _ => input.api_key.filter(|k| !k.is_empty()),
    };

    Ok(LlmConfig {
        id: existing.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
        workspace_id,
        provider: input.provider,
        base_url: input
            .base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| input.provider.default_base_url().to_string()),
        model: input.model,
        api_key,
        temperature: input.temperature,
        max_tokens: input.max_tokens,
        created_at: existing.map(|p| p.created_at).unwrap_or(now),
        updated_at: now,
    })
}
