use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSide {
    User,
    Agent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingKind {
    /// Shown while the web search runs
    Search,
    /// Shown while the engine prepares the first token
    Inference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub id: Uuid,
    pub content: String,
    pub side: ChatSide,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub accelerator: String,
}

impl TextMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            side: ChatSide::User,
            latency_ms: None,
            accelerator: String::new(),
        }
    }

    pub fn agent(content: impl Into<String>, accelerator: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            side: ChatSide::Agent,
            latency_ms: None,
            accelerator: accelerator.into(),
        }
    }

    /// Copy of this message under a fresh id
    pub fn duplicate(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingMessage {
    pub id: Uuid,
    pub kind: LoadingKind,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub accelerator: String,
}

impl LoadingMessage {
    pub fn search(accelerator: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: LoadingKind::Search,
            text: Some("Searching the web for up-to-date information...".to_string()),
            accelerator: accelerator.into(),
        }
    }

    pub fn inference(accelerator: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: LoadingKind::Inference,
            text: None,
            accelerator: accelerator.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningMessage {
    pub id: Uuid,
    pub content: String,
}

impl WarningMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
        }
    }
}

/// Display metadata for one benchmark statistic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub id: String,
    pub label: String,
    pub unit: String,
}

impl Stat {
    pub fn new(id: &str, label: &str, unit: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub id: Uuid,
    /// Text message these numbers describe
    pub attached_to: Uuid,
    pub ordered_stats: Vec<Stat>,
    pub values: BTreeMap<String, f64>,
    pub running: bool,
    #[serde(default)]
    pub accelerator: String,
}

impl BenchmarkResult {
    pub fn value(&self, stat_id: &str) -> Option<f64> {
        self.values.get(stat_id).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessage {
    Text(TextMessage),
    Loading(LoadingMessage),
    Warning(WarningMessage),
    Benchmark(BenchmarkResult),
}

impl ChatMessage {
    pub fn id(&self) -> Uuid {
        match self {
            ChatMessage::Text(m) => m.id,
            ChatMessage::Loading(m) => m.id,
            ChatMessage::Warning(m) => m.id,
            ChatMessage::Benchmark(m) => m.id,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ChatMessage::Loading(_))
    }

    pub fn as_text(&self) -> Option<&TextMessage> {
        match self {
            ChatMessage::Text(m) => Some(m),
            _ => None,
        }
    }
}

impl From<TextMessage> for ChatMessage {
    fn from(m: TextMessage) -> Self {
        ChatMessage::Text(m)
    }
}

impl From<LoadingMessage> for ChatMessage {
    fn from(m: LoadingMessage) -> Self {
        ChatMessage::Loading(m)
    }
}

impl From<WarningMessage> for ChatMessage {
    fn from(m: WarningMessage) -> Self {
        ChatMessage::Warning(m)
    }
}

impl From<BenchmarkResult> for ChatMessage {
    fn from(m: BenchmarkResult) -> Self {
        ChatMessage::Benchmark(m)
    }
}

/// What the search step contributed to the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum SearchContext {
    Answer(String),
    Snippets(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    NotAttempted,
    Succeeded { context: SearchContext },
    FailedNetwork,
    FailedNoResults,
}

impl SearchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SearchOutcome::FailedNetwork | SearchOutcome::FailedNoResults)
    }

    /// User-visible warning for failed searches
    pub fn warning(&self) -> Option<&'static str> {
        match self {
            SearchOutcome::FailedNetwork => {
                Some("Web search failed. Answering from the model's own knowledge.")
            }
            SearchOutcome::FailedNoResults => Some(
                "Web search found no relevant information. Answering from the model's own knowledge.",
            ),
            SearchOutcome::NotAttempted | SearchOutcome::Succeeded { .. } => None,
        }
    }
}

/// Image attached to a prompt, already base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInput {
    pub base64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_gets_fresh_id() {
        let original = TextMessage::user("what is rust?");
        let copy = original.duplicate();
        assert_ne!(original.id, copy.id);
        assert_eq!(original.content, copy.content);
        assert_eq!(copy.side, ChatSide::User);
    }

    #[test]
    fn only_failures_carry_warnings() {
        assert!(SearchOutcome::NotAttempted.warning().is_none());
        assert!(SearchOutcome::Succeeded {
            context: SearchContext::Answer("42".into())
        }
        .warning()
        .is_none());
        assert!(SearchOutcome::FailedNetwork.warning().is_some());
        assert!(SearchOutcome::FailedNoResults.warning().is_some());
    }

    #[test]
    fn message_serializes_with_type_tag() {
        let msg: ChatMessage = WarningMessage::new("careful").into();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["content"], "careful");
    }
}
