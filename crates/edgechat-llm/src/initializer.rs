use std::sync::Arc;

use async_trait::async_trait;
use edgechat_core::{InferenceSession, Model, ModelInitializer, Result};
use tracing::{info, warn};

use crate::{OllamaClient, OllamaSession};

/// Brings Ollama models up (warmup) and down (unload from VRAM)
pub struct OllamaInitializer {
    client: OllamaClient,
}

impl OllamaInitializer {
    pub fn new(host: &str) -> Self {
        Self {
            client: OllamaClient::new(host),
        }
    }
}

#[async_trait]
impl ModelInitializer for OllamaInitializer {
    async fn initialize(&self, model: &Model) -> Result<Arc<dyn InferenceSession>> {
        self.client.warmup(&model.name).await?;
        info!(model = %model.name, "Model initialized");
        Ok(Arc::new(OllamaSession::new(self.client.clone(), &model.name)))
    }

    async fn cleanup(&self, model: &Model) {
        if let Err(e) = self.client.unload(&model.name).await {
            warn!(model = %model.name, "Unload failed: {}", e);
        }
    }
}
