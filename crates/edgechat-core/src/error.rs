use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Search request failed: {0}")]
    SearchTransport(String),

    #[error("Search returned no usable results")]
    SearchEmptyResult,

    #[error("Inference session not ready")]
    SessionNotReady,

    #[error("Inference engine error: {0}")]
    InferenceEngine(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Recovery gave up after {0} attempts")]
    RecoveryExhausted(u32),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    pub fn engine(e: impl ToString) -> Self {
        ChatError::InferenceEngine(e.to_string())
    }

    pub fn search(e: impl ToString) -> Self {
        ChatError::SearchTransport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
