use std::sync::Arc;

use llm_client::{HttpLlmClient, HttpLlmConfig, LlmClient, Provider};
use specforge_core::config::ServerConfig;
use specforge_core::llm_settings::{LlmConfig, LlmProvider};
use specforge_core::{Service, SpecError, Store};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::error::AppError;
use crate::notify::NotificationHub;
use crate::refinement::RefinementRegistry;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub config: Arc<ServerConfig>,
    pub hub: Arc<NotificationHub>,
    pub refinements: Arc<RefinementRegistry>,
    /// Cancelled when the server starts shutting down.
    pub shutdown: CancellationToken,
    /// Background refinement workers, awaited during shutdown.
    pub workers: TaskTracker,
    /// Replaces the per-workspace provider when set.
    pub llm_override: Option<Arc<dyn LlmClient>>,
}

impl AppState {
    pub fn new(store: Store, config: ServerConfig) -> Self {
        let hub = Arc::new(NotificationHub::new());
        let service = Service::new(Arc::new(store), hub.clone());
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
            hub,
            refinements: Arc::new(RefinementRegistry::default()),
            shutdown: CancellationToken::new(),
            workers: TaskTracker::new(),
            llm_override: None,
        }
    }

    pub fn with_llm(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_override = Some(client);
        self
    }

    /// LLM client for a workspace: the override, else one built from the
    /// stored provider settings.
    pub async fn llm_for_workspace(&self, workspace_id: Uuid) -> Result<Arc<dyn LlmClient>, AppError> {
        if let Some(client) = &self.llm_override {
            return Ok(client.clone());
        }
        let service = self.service.clone();
        let cfg = crate::routes::blocking(move || service.llm_config_raw(workspace_id))
            .await?
            .ok_or_else(|| {
                SpecError::InvalidRequest(format!("no LLM provider configured for workspace {workspace_id}"))
            })?;
        Ok(Arc::new(http_client(&cfg)?))
    }
}

pub fn http_client(cfg: &LlmConfig) -> Result<HttpLlmClient, AppError> {
    let provider = match cfg.provider {
        LlmProvider::Openai => Provider::OpenAi,
        LlmProvider::Ollama => Provider::Ollama,
    };
    let mut http = HttpLlmConfig::new(provider, cfg.base_url.clone(), cfg.model.clone());
    http.api_key = cfg.api_key.clone();
    http.temperature = cfg.temperature;
    http.max_tokens = cfg.max_tokens;
    Ok(HttpLlmClient::new(http)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn new_state_wires_hub_into_service() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("sf.redb")).unwrap();
        let state = AppState::new(store, ServerConfig::default());
        assert!(state.llm_override.is_none());
        assert_eq!(state.hub.subscriber_count(), 0);
        assert!(!state.shutdown.is_cancelled());
        assert!(state.workers.is_empty());
    }
}
