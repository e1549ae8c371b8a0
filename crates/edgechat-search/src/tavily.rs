use async_trait::async_trait;
use edgechat_core::{ChatError, Result, SearchConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub search_depth: String,
    pub include_answer: bool,
    pub max_results: u8,
}

impl SearchRequest {
    pub fn basic(query: &str, max_results: u8) -> Self {
        Self {
            query: query.to_string(),
            search_depth: "basic".to_string(),
            include_answer: true,
            max_results,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub results: Option<Vec<SearchResult>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: f64,
}

/// Anything that can answer a web search query.
///
/// Errors are transport-level only; an empty but well-formed response is
/// `Ok` and left to the caller to interpret.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
}

#[derive(Serialize)]
struct TavilyBody<'a> {
    api_key: &'a str,
    #[serde(flatten)]
    request: &'a SearchRequest,
}

pub struct TavilyClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl TavilyClient {
    pub fn new(endpoint: impl Into<String>, api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(ChatError::Config("TAVILY_API_KEY not configured".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let key = config.api_key.clone().unwrap_or_default();
        Self::new(config.endpoint.clone(), key)
    }

    pub fn parse_response(body: &str) -> Result<SearchResponse> {
        serde_json::from_str(body).map_err(|e| {
            ChatError::search(format!(
                "Parse error: {} - body: {}",
                e,
                body.chars().take(500).collect::<String>()
            ))
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint, max_results = request.max_results))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        info!("Calling Tavily for query: {}", request.query);

        let body = TavilyBody {
            api_key: &self.api_key,
            request,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(ChatError::search)?;

        let status = response.status();
        if !status.is_success() {
            warn!("Tavily returned {}", status);
            return Err(ChatError::search(format!("HTTP {}", status)));
        }

        let text = response.text().await.map_err(ChatError::search)?;
        if text.trim().is_empty() {
            return Err(ChatError::SearchEmptyResult);
        }

        info!("Tavily status={}, response_len={}", status, text.len());
        Self::parse_response(&text)
    }
}
