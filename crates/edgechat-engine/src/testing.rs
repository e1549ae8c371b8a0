//! Scripted sessions, initializers and search providers for controller tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use edgechat_core::{
    ChatConfig, ChatError, GenerationEvent, GenerationStream, ImageInput, InferenceSession, Model,
    ModelInitializer, Result,
};
use edgechat_search::{SearchAugmenter, SearchProvider, SearchRequest, SearchResponse};
use futures::stream::{self, BoxStream, StreamExt};

use crate::StreamingInferenceController;

#[derive(Debug, Clone)]
pub enum Step {
    Emit(String, bool),
    Fail(String),
    /// Never yields again
    Hang,
}

impl Step {
    pub fn emit(text: &str, done: bool) -> Self {
        Step::Emit(text.to_string(), done)
    }

    pub fn fail(message: &str) -> Self {
        Step::Fail(message.to_string())
    }
}

/// Session that plays back a fixed list of steps, one per `step_delay`
pub struct ScriptedSession {
    steps: Vec<Step>,
    step_delay: Duration,
    prompts: Mutex<Vec<String>>,
    reset_failures: AtomicU32,
    reset_calls: AtomicU32,
    cancelled: AtomicBool,
}

impl ScriptedSession {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            step_delay: Duration::from_millis(2),
            prompts: Mutex::new(Vec::new()),
            reset_failures: AtomicU32::new(0),
            reset_calls: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        })
    }

    /// "Hel", "lo", then "!" as the final event
    pub fn hello() -> Arc<Self> {
        Self::new(vec![
            Step::emit("Hel", false),
            Step::emit("lo", false),
            Step::emit("!", true),
        ])
    }

    pub fn failing_resets(self: Arc<Self>, count: u32) -> Arc<Self> {
        self.reset_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) -> u32 {
        self.reset_calls.load(Ordering::SeqCst)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceSession for ScriptedSession {
    /// One token per character
    fn size_in_tokens(&self, text: &str) -> Result<usize> {
        Ok(text.chars().count())
    }

    async fn generate_streaming(
        &self,
        prompt: &str,
        _image: Option<&ImageInput>,
    ) -> Result<GenerationStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let delay = self.step_delay;
        let events = stream::iter(self.steps.clone())
            .then(move |step| async move {
                tokio::time::sleep(delay).await;
                step
            })
            .flat_map(|step| -> BoxStream<'static, Result<GenerationEvent>> {
                match step {
                    Step::Emit(text, done) => {
                        let event = if done {
                            GenerationEvent::last(text)
                        } else {
                            GenerationEvent::partial(text)
                        };
                        stream::once(async move { Ok(event) }).boxed()
                    }
                    Step::Fail(message) => {
                        stream::once(async move { Err(ChatError::InferenceEngine(message)) }).boxed()
                    }
                    Step::Hang => stream::pending().boxed(),
                }
            });

        Ok(Box::pin(events))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    async fn reset(&self) -> Result<()> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.reset_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.reset_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ChatError::engine("reset refused"));
        }
        Ok(())
    }
}

/// Hands out queued sessions in order and counts lifecycle calls
pub struct MockInitializer {
    sessions: Mutex<VecDeque<Arc<ScriptedSession>>>,
    inits: AtomicU32,
    cleanups: AtomicU32,
}

impl MockInitializer {
    pub fn new(sessions: Vec<Arc<ScriptedSession>>) -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(sessions.into()),
            inits: AtomicU32::new(0),
            cleanups: AtomicU32::new(0),
        })
    }

    pub fn inits(&self) -> u32 {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> u32 {
        self.cleanups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInitializer for MockInitializer {
    async fn initialize(&self, _model: &Model) -> Result<Arc<dyn InferenceSession>> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        let session: Arc<dyn InferenceSession> = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::engine("no session queued"))?;
        Ok(session)
    }

    async fn cleanup(&self, _model: &Model) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Search provider with a canned reply and optional latency
pub struct FixedSearch {
    reply: Option<SearchResponse>,
    delay: Duration,
}

impl FixedSearch {
    pub fn failing() -> Self {
        Self {
            reply: None,
            delay: Duration::ZERO,
        }
    }

    pub fn answering(response: SearchResponse) -> Self {
        Self {
            reply: Some(response),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }
}

#[async_trait]
impl SearchProvider for FixedSearch {
    async fn search(&self, _request: &SearchRequest) -> Result<SearchResponse> {
        tokio::time::sleep(self.delay).await;
        self.reply
            .clone()
            .ok_or_else(|| ChatError::search("connection refused"))
    }
}

pub fn test_config() -> ChatConfig {
    let mut config = ChatConfig::default();
    config.timing.settle_delay_ms = 5;
    config.timing.reset_backoff_ms = 5;
    config
}

pub fn controller(augmenter: SearchAugmenter) -> StreamingInferenceController {
    StreamingInferenceController::new(augmenter, test_config())
}

pub fn augmenter(provider: FixedSearch) -> SearchAugmenter {
    SearchAugmenter::new(Arc::new(provider), 5)
}

pub fn ready_model(session: Arc<ScriptedSession>) -> Arc<Model> {
    let model = Arc::new(Model::new("gemma"));
    model.attach_session(session);
    model
}

/// Attach `session` to `model` after `delay`, as a slow load would
pub fn attach_later(model: &Arc<Model>, session: Arc<ScriptedSession>, delay: Duration) {
    let model = model.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        model.attach_session(session);
    });
}

/// Poll `check` until it holds, failing the test after a second
pub async fn wait_until(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
