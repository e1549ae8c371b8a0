use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use edgechat_core::{
    ChatError, GenerationEvent, GenerationStream, ImageInput, InferenceSession, Result,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::{engine_err, ChatChunk, ChatRequest, OllamaClient, OllamaMessage};

/// Characters per token used for prompt size estimates
const CHARS_PER_TOKEN: usize = 4;

/// Multi-turn chat against a local Ollama model.
///
/// Ollama is stateless, so the turn history lives here and is replayed with
/// every request. A turn only joins the history once its final chunk arrives.
pub struct OllamaSession {
    client: OllamaClient,
    model: String,
    history: Arc<Mutex<Vec<OllamaMessage>>>,
    cancel: Mutex<CancellationToken>,
}

impl OllamaSession {
    pub fn new(client: OllamaClient, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
            history: Arc::new(Mutex::new(Vec::new())),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn turns(&self) -> usize {
        self.history.lock().map(|h| h.len()).unwrap_or(0)
    }

    fn fresh_token(&self) -> Result<CancellationToken> {
        let mut guard = self
            .cancel
            .lock()
            .map_err(|_| engine_err("cancel token poisoned"))?;
        *guard = CancellationToken::new();
        Ok(guard.clone())
    }
}

/// Split complete NDJSON lines off `buffer` and turn them into events.
/// Bytes are only decoded once a whole line is in, so characters split
/// across network chunks survive.
fn drain_lines(
    buffer: &mut Vec<u8>,
    reply: &mut String,
    user: &OllamaMessage,
    history: &Mutex<Vec<OllamaMessage>>,
) -> Vec<Result<GenerationEvent>> {
    let mut events = Vec::new();

    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = match std::str::from_utf8(&raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                events.push(Err(engine_err(format!("Bad stream line: {}", e))));
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(c) => c,
            Err(e) => {
                events.push(Err(engine_err(format!("Bad stream line: {}", e))));
                continue;
            }
        };

        if let Some(error) = chunk.error {
            events.push(Err(ChatError::InferenceEngine(error)));
            continue;
        }

        let content = chunk.message.map(|m| m.content).unwrap_or_default();
        reply.push_str(&content);

        if chunk.done {
            if let Ok(mut h) = history.lock() {
                h.push(user.clone());
                h.push(OllamaMessage::assistant(std::mem::take(reply)));
            }
            events.push(Ok(GenerationEvent::last(content)));
        } else if !content.is_empty() {
            events.push(Ok(GenerationEvent::partial(content)));
        }
    }

    events
}

#[async_trait]
impl InferenceSession for OllamaSession {
    fn size_in_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.chars().count().div_ceil(CHARS_PER_TOKEN))
    }

    #[instrument(skip(self, prompt, image), fields(model = %self.model))]
    async fn generate_streaming(
        &self,
        prompt: &str,
        image: Option<&ImageInput>,
    ) -> Result<GenerationStream> {
        let images = image.map(|i| vec![i.base64.clone()]).unwrap_or_default();
        let user = OllamaMessage::user(prompt, images);

        let mut messages = self
            .history
            .lock()
            .map_err(|_| engine_err("history poisoned"))?
            .clone();
        messages.push(user.clone());

        let request = ChatRequest {
            model: &self.model,
            messages: &messages,
            stream: true,
            options: None,
            keep_alive: None,
        };

        let token = self.fresh_token()?;

        let response = self
            .client
            .http()
            .post(self.client.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(engine_err)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(engine_err(format!("Chat failed: {} - {}", status, body)));
        }

        info!(turns = messages.len(), "Streaming response");

        let history = self.history.clone();
        let mut buffer = Vec::new();
        let mut reply = String::new();

        let events = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    drain_lines(&mut buffer, &mut reply, &user, &history)
                }
                Err(e) => vec![Err(engine_err(e))],
            })
            .flat_map(futures::stream::iter)
            .take_until(token.cancelled_owned());

        Ok(Box::pin(events))
    }

    fn cancel(&self) {
        match self.cancel.lock() {
            Ok(token) => {
                debug!(model = %self.model, "Cancelling generation");
                token.cancel();
            }
            Err(_) => warn!("Cancel token poisoned"),
        }
    }

    async fn reset(&self) -> Result<()> {
        let mut history = self
            .history
            .lock()
            .map_err(|_| engine_err("history poisoned"))?;
        history.clear();
        info!(model = %self.model, "Session reset");
        Ok(())
    }
}
