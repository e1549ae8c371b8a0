use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::{ImageInput, Model, Result};

/// One incremental piece of a streamed response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationEvent {
    pub partial: String,
    pub done: bool,
}

impl GenerationEvent {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            partial: text.into(),
            done: false,
        }
    }

    pub fn last(text: impl Into<String>) -> Self {
        Self {
            partial: text.into(),
            done: true,
        }
    }
}

/// Events of one generation call. Ending without a `done` event, or yielding
/// an error, is an abnormal termination.
pub type GenerationStream = Pin<Box<dyn Stream<Item = Result<GenerationEvent>> + Send>>;

/// Conversational context held by an inference engine.
#[async_trait]
pub trait InferenceSession: Send + Sync {
    fn size_in_tokens(&self, text: &str) -> Result<usize>;

    async fn generate_streaming(
        &self,
        prompt: &str,
        image: Option<&ImageInput>,
    ) -> Result<GenerationStream>;

    /// Ask the engine to stop emitting events for the current call
    fn cancel(&self);

    async fn reset(&self) -> Result<()>;
}

/// Creates and tears down a model's inference session.
#[async_trait]
pub trait ModelInitializer: Send + Sync {
    async fn initialize(&self, model: &Model) -> Result<Arc<dyn InferenceSession>>;

    async fn cleanup(&self, model: &Model);
}
