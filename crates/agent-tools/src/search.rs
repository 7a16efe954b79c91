//! Google search through the Serper.dev API
//!
//! [`SerperSearch::results`] returns the raw response document;
//! [`SerperSearch::run`] condenses it to a single snippet string, which is
//! what the agents feed back to the model.

use crate::Tool;
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::num::NonZeroU32;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const DEFAULT_ENDPOINT: &str = "https://google.serper.dev";
const DEFAULT_RESULTS: usize = 10;
const DEFAULT_PER_MINUTE: u32 = 60;
const NO_RESULT: &str = "No good Google Search Result was found";

/// Tool name under which the search is offered to models
pub const TOOL_NAME: &str = "web_search";

/// Errors from the search client
#[derive(Error, Debug)]
pub enum SearchError {
    /// No API key configured
    #[error("SERPER_API_KEY is not set")]
    MissingApiKey,

    /// Transport failure
    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("Search API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl From<SearchError> for agent_core::Error {
    fn from(err: SearchError) -> Self {
        agent_core::Error::ProcessingFailed(err.to_string())
    }
}

fn limiter(per_minute: u32) -> SharedRateLimiter {
    let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Serper.dev search client
#[derive(Clone)]
pub struct SerperSearch {
    client: Client,
    api_key: String,
    endpoint: String,
    num_results: usize,
    rate_limiter: SharedRateLimiter,
}

impl std::fmt::Debug for SerperSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperSearch")
            .field("endpoint", &self.endpoint)
            .field("num_results", &self.num_results)
            .finish_non_exhaustive()
    }
}

impl SerperSearch {
    /// Create a client with the given API key, limited to 60 requests per minute
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            num_results: DEFAULT_RESULTS,
            rate_limiter: limiter(DEFAULT_PER_MINUTE),
        }
    }

    /// Create a client from the shared application config
    pub fn from_app_config(config: &agent_utils::Config) -> Result<Self, SearchError> {
        config
            .serper_api_key
            .as_deref()
            .map(Self::new)
            .ok_or(SearchError::MissingApiKey)
    }

    /// Override the requests-per-minute quota; zero is treated as one
    #[must_use]
    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limiter = limiter(per_minute);
        self
    }

    /// Override the API host, e.g. for a proxy
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Number of organic results requested
    #[must_use]
    pub fn with_num_results(mut self, n: usize) -> Self {
        self.num_results = n;
        self
    }

    /// Raw search response
    #[instrument(skip(self))]
    pub async fn results(&self, query: &str) -> Result<Value, SearchError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(format!("{}/search", self.endpoint.trim_end_matches('/')))
            .header("X-API-KEY", &self.api_key)
            .json(&json!({ "q": query, "num": self.num_results }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Api { status, body });
        }

        let body: Value = response.json().await?;
        debug!(
            organic = body["organic"].as_array().map_or(0, Vec::len),
            "Search returned"
        );
        Ok(body)
    }

    /// Search and condense the response into snippet text
    pub async fn run(&self, query: &str) -> Result<String, SearchError> {
        let body = self.results(query).await?;
        Ok(snippets(&body, self.num_results))
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
}

#[async_trait]
impl Tool for SerperSearch {
    async fn execute(&self, params: Value) -> agent_core::Result<Value> {
        let params: SearchParams = serde_json::from_value(params).map_err(|e| {
            agent_core::Error::ProcessingFailed(format!("Invalid search parameters: {e}"))
        })?;
        Ok(Value::String(self.run(&params.query).await?))
    }

    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search Google. Useful for finding short, current facts about a specific topic."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }
}

/// Condense a Serper response into text
///
/// A direct answer box wins outright. Otherwise knowledge-graph facts and
/// organic snippets are joined with spaces.
pub fn snippets(body: &Value, limit: usize) -> String {
    let answer_box = &body["answerBox"];
    for key in ["answer", "snippet"] {
        if let Some(answer) = answer_box[key].as_str() {
            return answer.replace('\n', " ");
        }
    }
    if let Some(highlighted) = answer_box["snippetHighlighted"].as_array() {
        let parts: Vec<&str> = highlighted.iter().filter_map(Value::as_str).collect();
        if !parts.is_empty() {
            return parts.join(" ");
        }
    }

    let mut out = Vec::new();

    let kg = &body["knowledgeGraph"];
    if let Some(title) = kg["title"].as_str() {
        if let Some(kind) = kg["type"].as_str() {
            out.push(format!("{title}: {kind}."));
        }
        if let Some(description) = kg["description"].as_str() {
            out.push(description.to_string());
        }
        if let Some(attributes) = kg["attributes"].as_object() {
            for (attribute, value) in attributes {
                if let Some(value) = value.as_str() {
                    out.push(format!("{title} {attribute}: {value}."));
                }
            }
        }
    }

    for result in body["organic"].as_array().into_iter().flatten().take(limit) {
        if let Some(snippet) = result["snippet"].as_str() {
            out.push(snippet.to_string());
        }
    }

    if out.is_empty() {
        NO_RESULT.to_string()
    } else {
        out.join(" ")
    }
}
