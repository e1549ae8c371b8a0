use serde::{Deserialize, Serialize};
use tracing::debug;

use uuid::Uuid;

use crate::{BenchmarkResult, ChatMessage};

/// Ordered message log for one model's chat.
///
/// At most one `Loading` message exists at any time and, when present, it is
/// the last entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message. A stale `Loading` at the tail is dropped first.
    pub fn append(&mut self, message: impl Into<ChatMessage>) {
        if self.last_message().is_some_and(ChatMessage::is_loading) {
            debug!("Dropping stale loading message before append");
            self.messages.pop();
        }
        self.messages.push(message.into());
    }

    pub fn remove_last(&mut self) -> Option<ChatMessage> {
        self.messages.pop()
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn clear_all(&mut self) {
        self.messages.clear();
    }

    /// Remove the last message only if it is a `Loading` one
    pub fn remove_trailing_loading(&mut self) -> bool {
        if !self.last_message().is_some_and(ChatMessage::is_loading) {
            return false;
        }
        self.messages.pop();
        true
    }

    /// Append `delta` to the last Text message. Returns false when the last
    /// message is not Text.
    pub fn update_last_text_content(&mut self, delta: &str, latency_ms: Option<f64>) -> bool {
        let Some(ChatMessage::Text(text)) = self.messages.last_mut() else {
            return false;
        };
        text.content.push_str(delta);
        text.latency_ms = latency_ms;
        true
    }

    /// Append a benchmark result right after the last Text message it
    /// describes. Returns false when the last message is not that Text.
    pub fn attach_benchmark(&mut self, result: BenchmarkResult) -> bool {
        match self.messages.last() {
            Some(ChatMessage::Text(text)) if text.id == result.attached_to => {
                self.messages.push(ChatMessage::Benchmark(result));
                true
            }
            _ => false,
        }
    }

    /// Remove the message with `id` wherever it sits
    pub fn remove_by_id(&mut self, id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id() != id);
        self.messages.len() != before
    }

    /// Remove what a failed turn left behind.
    ///
    /// The failed tail is the run of loading, warning and `partial` reply
    /// messages at the end. When the message just before it is `triggered`,
    /// the tail and `triggered` go. Otherwise only a trailing loading and
    /// the `partial` reply are removed.
    pub fn remove_failed_turn(&mut self, triggered: Uuid, partial: Option<Uuid>) -> bool {
        let is_debris = |m: &ChatMessage| match m {
            ChatMessage::Loading(_) | ChatMessage::Warning(_) => true,
            ChatMessage::Text(text) => Some(text.id) == partial,
            ChatMessage::Benchmark(_) => false,
        };

        let before = self.messages.len();
        let tail = self
            .messages
            .iter()
            .rposition(|m| !is_debris(m))
            .map_or(0, |i| i + 1);

        if tail > 0 && self.messages[tail - 1].id() == triggered {
            self.messages.truncate(tail - 1);
        } else {
            self.remove_trailing_loading();
            if partial.is_some() && self.last_message().map(ChatMessage::id) == partial {
                self.messages.pop();
            }
        }

        self.messages.len() != before
    }

    pub fn loading_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_loading()).count()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use uuid::Uuid;

    use super::*;
    use crate::{LoadingMessage, TextMessage, WarningMessage};

    fn benchmark_for(id: Uuid) -> BenchmarkResult {
        BenchmarkResult {
            id: Uuid::new_v4(),
            attached_to: id,
            ordered_stats: Vec::new(),
            values: BTreeMap::new(),
            running: false,
            accelerator: String::new(),
        }
    }

    #[test]
    fn remove_last_on_empty_is_noop() {
        let mut state = ConversationState::new();
        assert!(state.remove_last().is_none());
        assert!(state.last_message().is_none());
    }

    #[test]
    fn append_drops_stale_loading() {
        let mut state = ConversationState::new();
        state.append(TextMessage::user("hi"));
        state.append(LoadingMessage::search(""));
        state.append(LoadingMessage::inference(""));
        assert_eq!(state.loading_count(), 1);
        assert_eq!(state.len(), 2);

        state.append(WarningMessage::new("oops"));
        assert_eq!(state.loading_count(), 0);
        assert!(matches!(state.last_message(), Some(ChatMessage::Warning(_))));
    }

    #[test]
    fn update_requires_text_at_tail() {
        let mut state = ConversationState::new();
        state.append(LoadingMessage::inference(""));
        assert!(!state.update_last_text_content("x", None));

        state.remove_last();
        state.append(TextMessage::agent("", "cpu"));
        assert!(state.update_last_text_content("Hel", None));
        assert!(state.update_last_text_content("lo", Some(12.0)));

        let text = state.last_message().and_then(ChatMessage::as_text).unwrap();
        assert_eq!(text.content, "Hello");
        assert_eq!(text.latency_ms, Some(12.0));
    }

    #[test]
    fn benchmark_targets_matching_text_only() {
        let mut state = ConversationState::new();
        let text = TextMessage::agent("done", "gpu");
        let id = text.id;
        state.append(text);

        assert!(!state.attach_benchmark(benchmark_for(Uuid::new_v4())));
        assert!(state.attach_benchmark(benchmark_for(id)));
        assert_eq!(state.len(), 2);

        // Last message is now the benchmark, not the text
        assert!(!state.attach_benchmark(benchmark_for(id)));
    }

    #[test]
    fn remove_trailing_loading_leaves_other_messages() {
        let mut state = ConversationState::new();
        state.append(TextMessage::user("hi"));
        assert!(!state.remove_trailing_loading());
        assert_eq!(state.len(), 1);

        state.append(LoadingMessage::search(""));
        assert!(state.remove_trailing_loading());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn failed_turn_goes_back_to_trigger() {
        let mut state = ConversationState::new();
        let earlier = TextMessage::agent("earlier answer", "cpu");
        state.append(earlier.clone());
        let question = TextMessage::user("hi");
        state.append(question.clone());
        state.append(WarningMessage::new("Web search failed."));
        let partial = TextMessage::agent("Hel", "cpu");
        state.append(partial.clone());

        assert!(state.remove_failed_turn(question.id, Some(partial.id)));
        assert_eq!(state.messages(), &[ChatMessage::Text(earlier)]);
    }

    #[test]
    fn failed_turn_keeps_finished_replies_without_latency() {
        let mut state = ConversationState::new();
        let question = TextMessage::user("hi");
        state.append(question.clone());
        let note = TextMessage::agent("note", "cpu");
        state.append(note.clone());
        state.append(LoadingMessage::inference("cpu"));

        assert!(state.remove_failed_turn(question.id, None));
        assert_eq!(state.len(), 2);
        assert_eq!(state.last_message().map(ChatMessage::id), Some(note.id));

        assert!(!state.remove_failed_turn(question.id, None));
    }
}
