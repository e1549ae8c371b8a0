use edgechat_core::{ChatError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct OllamaMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl OllamaMessage {
    pub fn user(content: &str, images: Vec<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
            images,
        }
    }

    pub fn assistant(content: String) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            images: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [OllamaMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<i32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatOptions {
    pub num_predict: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

pub(crate) fn engine_err(e: impl ToString) -> ChatError {
    ChatError::InferenceEngine(e.to_string())
}

/// Thin HTTP client for the Ollama REST API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    host: String,
}

impl OllamaClient {
    pub fn new(host: &str) -> Self {
        let host = host.trim_end_matches('/').replace("/v1", "");
        Self {
            http: reqwest::Client::new(),
            host,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub(crate) fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn list_models(&self) -> Result<Vec<OllamaModel>> {
        let url = format!("{}/api/tags", self.host);
        debug!("Fetching models from Ollama API");

        let resp = self.http.get(&url).send().await.map_err(engine_err)?;
        if !resp.status().is_success() {
            return Err(engine_err(format!("Failed to list models: {}", resp.status())));
        }

        let tags: TagsResponse = resp.json().await.map_err(engine_err)?;
        info!(count = tags.models.len(), "Fetched models from Ollama");
        Ok(tags.models)
    }

    /// One-token generation so the weights are resident before real traffic
    #[instrument(skip(self))]
    pub async fn warmup(&self, model: &str) -> Result<()> {
        info!("Warming up model: {}", model);
        let messages = [OllamaMessage::user("hi", Vec::new())];
        let request = ChatRequest {
            model,
            messages: &messages,
            stream: false,
            options: Some(ChatOptions { num_predict: 1 }),
            keep_alive: None,
        };

        let resp = self
            .http
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(engine_err)?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(engine_err(format!("Warmup failed: {} - {}", status, body)));
        }
        Ok(())
    }

    /// Unload a model from VRAM by setting keep_alive to 0
    #[instrument(skip(self))]
    pub async fn unload(&self, model: &str) -> Result<()> {
        info!("Unloading model: {}", model);
        let request = ChatRequest {
            model,
            messages: &[],
            stream: false,
            options: None,
            keep_alive: Some(0),
        };

        self.http
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(engine_err)?;
        Ok(())
    }
}
