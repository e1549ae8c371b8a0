use std::sync::Arc;

use edgechat_core::{SearchConfig, SearchContext, SearchOutcome};
use tracing::{info, warn};

use crate::prompts::{answer_prompt, snippets_prompt};
use crate::tavily::{SearchProvider, SearchRequest, SearchResponse, TavilyClient};

const MAX_SNIPPETS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Augmentation {
    pub prompt: String,
    pub outcome: SearchOutcome,
}

impl Augmentation {
    fn unchanged(raw: &str, outcome: SearchOutcome) -> Self {
        Self {
            prompt: raw.to_string(),
            outcome,
        }
    }
}

/// Rewrites prompts with web search results. Never fails: every problem
/// degrades to the raw prompt plus a failure outcome.
pub struct SearchAugmenter {
    provider: Option<Arc<dyn SearchProvider>>,
    max_results: u8,
}

impl SearchAugmenter {
    pub fn new(provider: Arc<dyn SearchProvider>, max_results: u8) -> Self {
        Self {
            provider: Some(provider),
            max_results,
        }
    }

    pub fn disabled() -> Self {
        Self {
            provider: None,
            max_results: 0,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        if !config.enabled {
            info!("Web search disabled in settings");
            return Self::disabled();
        }

        match TavilyClient::from_config(config) {
            Ok(client) => Self::new(Arc::new(client), config.max_results),
            Err(e) => {
                warn!("Web search disabled: {}", e);
                Self::disabled()
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn augment(&self, raw: &str) -> Augmentation {
        let Some(provider) = &self.provider else {
            return Augmentation::unchanged(raw, SearchOutcome::NotAttempted);
        };

        let request = SearchRequest::basic(raw, self.max_results);
        match provider.search(&request).await {
            Ok(response) => Self::interpret(raw, response),
            Err(e) => {
                warn!("Web search call failed: {}", e);
                Augmentation::unchanged(raw, SearchOutcome::FailedNetwork)
            }
        }
    }

    /// Turn a well-formed response into the prompt the model will see
    pub fn interpret(raw: &str, response: SearchResponse) -> Augmentation {
        if let Some(answer) = response.answer.filter(|a| !a.trim().is_empty()) {
            info!("Search answered directly ({} chars)", answer.len());
            return Augmentation {
                prompt: answer_prompt(&answer, raw),
                outcome: SearchOutcome::Succeeded {
                    context: SearchContext::Answer(answer),
                },
            };
        }

        let snippets = response
            .results
            .unwrap_or_default()
            .into_iter()
            .take(MAX_SNIPPETS)
            .map(|r| r.content)
            .collect::<Vec<_>>()
            .join("; ");

        if snippets.trim().is_empty() {
            info!("Search returned nothing usable");
            return Augmentation::unchanged(raw, SearchOutcome::FailedNoResults);
        }

        info!("Search returned snippets ({} chars)", snippets.len());
        Augmentation {
            prompt: snippets_prompt(&snippets, raw),
            outcome: SearchOutcome::Succeeded {
                context: SearchContext::Snippets(snippets),
            },
        }
    }
}
