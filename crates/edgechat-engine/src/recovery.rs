use std::sync::Arc;

use edgechat_core::{ChatError, Model, ModelInitializer, Result, TextMessage, WarningMessage};
use tracing::{error, info, instrument, warn};

use crate::controller::{GenerationReport, StreamingInferenceController};

const REINIT_WARNING: &str = "Error occurred. Re-initializing the session.";

impl StreamingInferenceController {
    /// Tear the model down, clean the failed turn out of the chat, bring the
    /// model back up in the background and ask `triggered` again.
    #[instrument(skip_all, fields(model = %model.name, message = %triggered.id))]
    pub async fn handle_error(
        &self,
        model: &Arc<Model>,
        initializer: Arc<dyn ModelInitializer>,
        triggered: &TextMessage,
    ) -> Result<GenerationReport> {
        let chat = self.chat(model);
        let attempt = chat.note_recovery(triggered.id);

        if let Some(max) = self.config().inference.max_recovery_attempts {
            if attempt > max {
                error!(attempt, "Recovery limit reached");
                chat.update(|c| c.remove_trailing_loading());
                chat.append(WarningMessage::new(format!(
                    "Error persists after {} recovery attempts. Giving up.",
                    max
                )));
                chat.clear_recovery(triggered.id);
                return Err(ChatError::RecoveryExhausted(max));
            }
        }

        warn!(attempt, "Recovering from inference error");
        model.detach_session();
        initializer.cleanup(model).await;

        let partial = chat.status().streaming;
        chat.update(|c| {
            // Ids stay unique: the message is re-asked at the end
            c.remove_failed_turn(triggered.id, partial) | c.remove_by_id(triggered.id)
        });
        chat.set_status(|s| s.streaming = None);

        chat.append(WarningMessage::new(REINIT_WARNING));
        chat.append(triggered.clone());

        {
            let model = model.clone();
            tokio::spawn(async move {
                match initializer.initialize(&model).await {
                    Ok(session) => {
                        model.attach_session(session);
                        info!(model = %model.name, "Session re-initialized");
                    }
                    Err(e) => error!(model = %model.name, "Re-initialization failed: {}", e),
                }
            });
        }

        let report = self.generate(model, &triggered.content, None).await?;
        chat.clear_recovery(triggered.id);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use edgechat_core::{ChatMessage, SearchOutcome};
    use edgechat_search::SearchAugmenter;

    use super::*;
    use crate::controller::GenerationOutcome;
    use crate::testing::*;

    fn warnings(messages: &[ChatMessage]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| match m {
                ChatMessage::Warning(w) => Some(w.content.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn reinitializes_and_answers_again() {
        let controller = controller(SearchAugmenter::disabled());
        let broken = ScriptedSession::new(vec![Step::emit("Hel", false), Step::fail("oom")]);
        let model = ready_model(broken);
        let question = TextMessage::user("greet me");
        controller.append_message(&model, question.clone());

        let err = controller.generate(&model, "greet me", None).await.unwrap_err();
        assert!(matches!(err, ChatError::InferenceEngine(_)));

        let fresh = ScriptedSession::hello();
        let initializer = MockInitializer::new(vec![fresh.clone()]);
        let report = controller
            .handle_error(&model, initializer.clone(), &question)
            .await
            .unwrap();

        assert!(matches!(report.outcome, GenerationOutcome::Completed(_)));
        assert_eq!(initializer.cleanups(), 1);
        assert_eq!(initializer.inits(), 1);
        assert_eq!(fresh.prompts(), vec!["greet me".to_string()]);

        let messages = controller.messages(&model);
        assert_eq!(warnings(&messages), vec![REINIT_WARNING.to_string()]);
        // Warning, question, answer, benchmark
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].id(), question.id);
        assert_eq!(messages[2].as_text().unwrap().content, "Hello!");
        assert!(messages.iter().all(|m| !m.is_loading()));
    }

    #[tokio::test]
    async fn failure_before_first_token_leaves_no_loading_behind() {
        let controller = controller(SearchAugmenter::disabled());
        let model = ready_model(ScriptedSession::new(vec![Step::fail("boom")]));
        let question = TextMessage::user("hi");
        controller.append_message(&model, question.clone());

        controller.generate(&model, "hi", None).await.unwrap_err();
        assert!(controller.messages(&model).last().unwrap().is_loading());

        let initializer = MockInitializer::new(vec![ScriptedSession::hello()]);
        controller
            .handle_error(&model, initializer, &question)
            .await
            .unwrap();

        let messages = controller.messages(&model);
        assert_eq!(messages.iter().filter(|m| m.id() == question.id).count(), 1);
        assert!(messages.iter().all(|m| !m.is_loading()));
    }

    #[tokio::test]
    async fn gives_up_after_limit() {
        let mut config = test_config();
        config.inference.max_recovery_attempts = Some(1);
        let controller = StreamingInferenceController::new(SearchAugmenter::disabled(), config);
        let model = ready_model(ScriptedSession::new(vec![Step::fail("boom")]));
        let question = TextMessage::user("hi");
        controller.append_message(&model, question.clone());

        let initializer = MockInitializer::new(vec![
            ScriptedSession::new(vec![Step::fail("still broken")]),
            ScriptedSession::hello(),
        ]);

        let first = controller
            .handle_error(&model, initializer.clone(), &question)
            .await
            .unwrap_err();
        assert!(matches!(first, ChatError::InferenceEngine(_)));

        let second = controller
            .handle_error(&model, initializer.clone(), &question)
            .await
            .unwrap_err();
        assert!(matches!(second, ChatError::RecoveryExhausted(1)));
        assert_eq!(initializer.inits(), 1);

        let messages = controller.messages(&model);
        assert!(warnings(&messages)
            .last()
            .is_some_and(|w| w.contains("Giving up")));
        assert!(messages.iter().all(|m| !m.is_loading()));
    }

    #[tokio::test]
    async fn unbounded_when_limit_unset() {
        let mut config = test_config();
        config.inference.max_recovery_attempts = None;
        let controller = StreamingInferenceController::new(SearchAugmenter::disabled(), config);
        let model = ready_model(ScriptedSession::new(vec![Step::fail("boom")]));
        let question = TextMessage::user("hi");

        let sessions = (0..4)
            .map(|_| ScriptedSession::new(vec![Step::fail("again")]))
            .collect();
        let initializer = MockInitializer::new(sessions);

        for _ in 0..4 {
            let err = tokio::time::timeout(
                Duration::from_secs(2),
                controller.handle_error(&model, initializer.clone(), &question),
            )
            .await
            .unwrap()
            .unwrap_err();
            assert!(matches!(err, ChatError::InferenceEngine(_)));
        }
        assert_eq!(initializer.inits(), 4);
    }

    #[tokio::test]
    async fn failed_search_turn_is_cleaned_up() {
        let controller = controller(augmenter(FixedSearch::failing()));
        let model = ready_model(ScriptedSession::new(vec![Step::fail("boom")]));
        let question = TextMessage::user("hi");
        controller.append_message(&model, question.clone());

        controller.generate(&model, "hi", None).await.unwrap_err();

        let initializer = MockInitializer::new(vec![ScriptedSession::hello()]);
        controller
            .handle_error(&model, initializer, &question)
            .await
            .unwrap();

        let messages = controller.messages(&model);
        assert_eq!(messages.iter().filter(|m| m.id() == question.id).count(), 1);
        let mut ids: Vec<_> = messages.iter().map(ChatMessage::id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), messages.len());

        // Only the retried turn's search warning survives
        let search_warning = SearchOutcome::FailedNetwork.warning().unwrap();
        assert_eq!(
            warnings(&messages),
            vec![REINIT_WARNING.to_string(), search_warning.to_string()]
        );
        assert_eq!(messages[1].id(), question.id);
    }

    #[tokio::test]
    async fn finished_reply_without_latency_survives_recovery() {
        let controller = controller(SearchAugmenter::disabled());
        let model = ready_model(ScriptedSession::new(vec![Step::fail("boom")]));
        let question = TextMessage::user("hi");
        let note = TextMessage::agent("note", "cpu");
        controller.append_message(&model, question.clone());
        controller.append_message(&model, note.clone());

        let initializer = MockInitializer::new(vec![ScriptedSession::hello()]);
        controller
            .handle_error(&model, initializer, &question)
            .await
            .unwrap();

        let messages = controller.messages(&model);
        assert_eq!(messages[0].id(), note.id);
        assert_eq!(messages.iter().filter(|m| m.id() == question.id).count(), 1);
    }
}
