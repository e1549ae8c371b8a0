use std::sync::Arc;

use dashmap::DashMap;
use edgechat_core::{
    BenchmarkStats, ChatConfig, ChatError, ChatMessage, ConversationState, ImageInput,
    LoadingMessage, Model, Result, SearchOutcome, StreamTimer, TextMessage, WarningMessage,
};
use edgechat_search::{Augmentation, SearchAugmenter};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::chat::{ModelChat, ResettingGuard};
use crate::status::{ChatStatus, GenerationPhase};

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Completed(BenchmarkStats),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    /// Prompt actually sent to the engine
    pub prompt: String,
    pub search: SearchOutcome,
    pub outcome: GenerationOutcome,
}

/// Drives generation requests for any number of models, one at a time per
/// model, and owns each model's conversation.
pub struct StreamingInferenceController {
    augmenter: SearchAugmenter,
    config: ChatConfig,
    chats: DashMap<String, Arc<ModelChat>>,
}

impl StreamingInferenceController {
    pub fn new(augmenter: SearchAugmenter, config: ChatConfig) -> Self {
        Self {
            augmenter,
            config,
            chats: DashMap::new(),
        }
    }

    pub fn from_config(config: ChatConfig) -> Self {
        Self::new(SearchAugmenter::from_config(&config.search), config)
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub(crate) fn chat(&self, model: &Model) -> Arc<ModelChat> {
        self.chats
            .entry(model.name.clone())
            .or_insert_with(|| Arc::new(ModelChat::new()))
            .clone()
    }

    pub fn messages(&self, model: &Model) -> Vec<ChatMessage> {
        self.chat(model).messages()
    }

    pub fn subscribe_messages(&self, model: &Model) -> watch::Receiver<ConversationState> {
        self.chat(model).subscribe_messages()
    }

    pub fn subscribe_status(&self, model: &Model) -> watch::Receiver<ChatStatus> {
        self.chat(model).subscribe_status()
    }

    pub fn status(&self, model: &Model) -> ChatStatus {
        self.chat(model).status()
    }

    /// Add a message that originates outside a generation, e.g. user input
    pub fn append_message(&self, model: &Model, message: impl Into<ChatMessage>) {
        self.chat(model).append(message);
    }

    /// Post the user's message and answer it
    pub async fn send_message(
        &self,
        model: &Model,
        message: TextMessage,
        image: Option<ImageInput>,
    ) -> Result<GenerationReport> {
        let input = message.content.clone();
        self.append_message(model, message);
        self.generate(model, &input, image).await
    }

    /// Run one generation request to its end.
    ///
    /// Engine failures come back as `Err` and leave the conversation as it
    /// was at the failure; recovery is up to the caller (see `handle_error`).
    pub async fn generate(
        &self,
        model: &Model,
        input: &str,
        image: Option<ImageInput>,
    ) -> Result<GenerationReport> {
        let token = self.chat(model).admit();
        self.run_admitted(model, input, image, token).await
    }

    #[instrument(skip_all, fields(model = %model.name))]
    async fn run_admitted(
        &self,
        model: &Model,
        input: &str,
        image: Option<ImageInput>,
        token: CancellationToken,
    ) -> Result<GenerationReport> {
        let chat = self.chat(model);
        let _flight = chat.generation.lock().await;

        // Stopped or reset while queued: leave the conversation alone
        if token.is_cancelled() {
            chat.finish(GenerationPhase::Cancelled);
            return Ok(GenerationReport {
                prompt: input.to_string(),
                search: SearchOutcome::NotAttempted,
                outcome: GenerationOutcome::Cancelled,
            });
        }

        let result = self.drive(&chat, model, input, image.as_ref(), &token).await;

        match &result {
            Ok(report) => match &report.outcome {
                GenerationOutcome::Completed(stats) => info!(
                    "Done: ttft {:.2}s, prefill {:.1} t/s, decode {:.1} t/s",
                    stats.time_to_first_token_secs, stats.prefill_speed, stats.decode_speed
                ),
                GenerationOutcome::Cancelled => info!("Generation cancelled"),
            },
            Err(e) => {
                error!("Error occurred while running inference: {}", e);
                chat.finish(GenerationPhase::Failed);
            }
        }

        result
    }

    /// `generate` on its own task, reporting failures through `on_error`
    pub fn spawn_generate<F>(
        self: &Arc<Self>,
        model: Arc<Model>,
        input: String,
        image: Option<ImageInput>,
        on_error: F,
    ) -> JoinHandle<Option<GenerationReport>>
    where
        F: FnOnce(ChatError) + Send + 'static,
    {
        // Admitted before spawning so an immediate stop still reaches it
        let token = self.chat(&model).admit();
        let controller = self.clone();
        tokio::spawn(async move {
            match controller.run_admitted(&model, &input, image, token).await {
                Ok(report) => Some(report),
                Err(e) => {
                    on_error(e);
                    None
                }
            }
        })
    }

    async fn drive(
        &self,
        chat: &ModelChat,
        model: &Model,
        input: &str,
        image: Option<&ImageInput>,
        token: &CancellationToken,
    ) -> Result<GenerationReport> {
        let accelerator = model.accelerator();

        let Some(augmentation) = self.augment(chat, input, accelerator, token).await else {
            return Ok(Self::cancelled(chat, input, SearchOutcome::NotAttempted));
        };
        let Augmentation { prompt, outcome: search } = augmentation;

        chat.set_status(|s| {
            s.phase = GenerationPhase::AwaitingSessionReady;
            s.in_progress = true;
            s.preparing = true;
        });
        chat.append(LoadingMessage::inference(accelerator));

        let settle = self.config.timing.settle_delay();
        let session = tokio::select! {
            session = async {
                let session = model.wait_ready().await;
                tokio::time::sleep(settle).await;
                session
            } => session,
            _ = token.cancelled() => return Ok(Self::cancelled(chat, &prompt, search)),
        };

        chat.set_phase(GenerationPhase::Prefilling);
        let mut prefill_tokens = session.size_in_tokens(&prompt)?;
        if image.is_some() {
            prefill_tokens += self.config.inference.image_token_surcharge;
        }
        debug!(prefill_tokens, "Prefilling");

        let mut timer = StreamTimer::start(prefill_tokens);
        let mut stream = tokio::select! {
            stream = session.generate_streaming(&prompt, image) => stream?,
            _ = token.cancelled() => return Ok(Self::cancelled(chat, &prompt, search)),
        };

        chat.set_phase(GenerationPhase::Streaming);
        let mut streaming_id = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(Self::cancelled(chat, &prompt, search)),
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ChatError::engine("stream closed before the final event"));
                }
            };

            if timer.record_event() {
                chat.set_status(|s| s.preparing = false);

                // Swap the loading placeholder for the message that receives the stream
                let text = TextMessage::agent("", accelerator);
                let id = text.id;
                let replaced = chat.update(|c| {
                    if !c.remove_trailing_loading() {
                        return false;
                    }
                    c.append(text);
                    true
                });
                if replaced {
                    streaming_id = Some(id);
                    chat.set_status(|s| s.streaming = Some(id));
                } else {
                    warn!("Loading message gone before first token; output not recorded");
                }
            }

            let latency_ms = event.done.then(|| timer.elapsed_ms());
            if let Some(id) = streaming_id {
                chat.update(|c| {
                    c.last_message().map(ChatMessage::id) == Some(id)
                        && c.update_last_text_content(&event.partial, latency_ms)
                });
            }

            if event.done {
                let stats = timer.finish();
                if let Some(id) = streaming_id {
                    chat.update(|c| c.attach_benchmark(stats.to_result(id, accelerator)));
                }
                chat.finish(GenerationPhase::Completed);

                return Ok(GenerationReport {
                    prompt,
                    search,
                    outcome: GenerationOutcome::Completed(stats),
                });
            }
        }
    }

    /// Search step. `None` means the request was cancelled meanwhile.
    async fn augment(
        &self,
        chat: &ModelChat,
        input: &str,
        accelerator: &str,
        token: &CancellationToken,
    ) -> Option<Augmentation> {
        if !self.augmenter.is_active() {
            return Some(Augmentation {
                prompt: input.to_string(),
                outcome: SearchOutcome::NotAttempted,
            });
        }

        chat.set_phase(GenerationPhase::Augmenting);
        let indicator = LoadingMessage::search(accelerator);
        let indicator_id = indicator.id;
        chat.append(indicator);

        let augmentation = tokio::select! {
            out = self.augmenter.augment(input) => Some(out),
            _ = token.cancelled() => None,
        };

        // Someone else may already have removed or replaced the indicator
        chat.update(|c| {
            if c.last_message().map(ChatMessage::id) != Some(indicator_id) {
                return false;
            }
            c.remove_last();
            true
        });

        let augmentation = augmentation?;
        if let Some(warning) = augmentation.outcome.warning() {
            chat.append(WarningMessage::new(warning));
        }
        Some(augmentation)
    }

    fn cancelled(chat: &ModelChat, prompt: &str, search: SearchOutcome) -> GenerationReport {
        chat.update(|c| c.remove_trailing_loading());
        chat.finish(GenerationPhase::Cancelled);
        GenerationReport {
            prompt: prompt.to_string(),
            search,
            outcome: GenerationOutcome::Cancelled,
        }
    }

    /// Ask the in-flight generation, if any, to stop. Safe to call anytime.
    pub fn stop_response(&self, model: &Model) {
        debug!(model = %model.name, "Stopping response");
        let chat = self.chat(model);
        chat.cancel_active();
        if let Some(session) = model.session() {
            session.cancel();
        }
        chat.set_status(|s| s.in_progress = false);
    }

    /// Clear the chat and reset the engine session, retrying until it works.
    /// Returns the number of reset attempts.
    #[instrument(skip_all, fields(model = %model.name))]
    pub async fn reset_session(&self, model: &Model) -> u32 {
        let chat = self.chat(model);
        let _resetting = ResettingGuard::new(chat.clone());

        chat.update(|c| {
            let changed = !c.is_empty();
            c.clear_all();
            changed
        });
        self.stop_response(model);

        // Wait for the cancelled generation to let go of the session
        let _flight = chat.generation.lock().await;

        let backoff = self.config.timing.reset_backoff();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = match model.session() {
                Some(session) => session.reset().await,
                None => Err(ChatError::SessionNotReady),
            };

            match result {
                Ok(()) => break,
                Err(e) => debug!(attempts, "Failed to reset session, trying again: {}", e),
            }
            tokio::time::sleep(backoff).await;
        }

        info!(attempts, "Session reset");
        attempts
    }

    /// Re-ask a previous message: append a copy of it and generate again
    pub async fn run_again(&self, model: &Model, message: &TextMessage) -> Result<GenerationReport> {
        model.wait_ready().await;
        self.append_message(model, message.duplicate());
        self.generate(model, &message.content, None).await
    }
}
