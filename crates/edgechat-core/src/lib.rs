pub mod config;
pub mod conversation;
pub mod error;
pub mod model;
pub mod session;
pub mod stats;
pub mod types;

pub use config::{ChatConfig, InferenceConfig, OllamaConfig, SearchConfig, TimingConfig};
pub use conversation::ConversationState;
pub use error::{ChatError, Result};
pub use model::{Model, CONFIG_ACCELERATOR};
pub use session::{GenerationEvent, GenerationStream, InferenceSession, ModelInitializer};
pub use stats::{BenchmarkStats, StreamTimer};
pub use types::*;
