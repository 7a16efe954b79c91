//! OpenAI-compatible chat completions provider
//!
//! Talks to any server that implements `POST {base}/chat/completions`:
//! Ollama, vLLM, LM Studio, llama.cpp and OpenAI itself. Local servers
//! usually need no key, so the `Authorization` header is only sent when one
//! is configured.
//!
//! # Example
//!
//! ```no_run
//! use agent_llm::{CompletionRequest, LLMProvider, Message};
//! use agent_llm::providers::{OpenAIConfig, OpenAIProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = OpenAIProvider::with_config(
//!         OpenAIConfig::default().with_api_base("http://localhost:11434/v1"),
//!     )?;
//!
//!     let request = CompletionRequest::builder("llama3.1")
//!         .add_message(Message::user("Hello!"))
//!         .build();
//!
//!     let response = provider.complete(request).await?;
//!     println!("{}", response.message.full_text());
//!     Ok(())
//! }
//! ```

use crate::{
    CompletionRequest, CompletionResponse, ContentBlock, LLMError, LLMProvider, Message,
    MessageContent, Result, Role, StopReason, TokenUsage, ToolChoice, ToolDefinition,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_API_BASE: &str = "http://localhost:11434/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for [`OpenAIProvider`]
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Bearer token, if the server wants one
    pub api_key: Option<String>,

    /// Base URL including the version prefix, e.g. `http://localhost:11434/v1`
    pub api_base: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl OpenAIConfig {
    /// Config for the hosted OpenAI API with the given key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            api_base: "https://api.openai.com/v1".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Derive provider settings from the shared application config
    pub fn from_app_config(config: &agent_utils::Config) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_base: config.base_url.clone(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set custom API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set request timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

/// Provider for OpenAI-compatible chat completion endpoints
pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIProvider {
    /// Create a provider with custom configuration
    pub fn with_config(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a provider from `.env` and the process environment
    ///
    /// Reads `BASE_URL` and `OPENAI_API_KEY` through [`agent_utils::Config`].
    pub fn from_env() -> Result<Self> {
        let app = agent_utils::Config::from_env()
            .map_err(|e| LLMError::ConfigurationError(e.to_string()))?;
        Self::with_config(OpenAIConfig::from_app_config(&app))
    }

    /// Get the current configuration
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    #[instrument(skip(self, request), fields(model = %request.model, api_base = %self.config.api_base))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = ChatRequest::from_request(request);
        debug!(messages = body.messages.len(), "Sending chat completion");

        let mut http = self.client.post(self.config.endpoint()).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            http = http.bearer_auth(key);
        }
        let response = http.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed,
                429 => LLMError::RateLimitExceeded(error_text),
                400 => LLMError::InvalidRequest(error_text),
                404 => LLMError::ModelNotFound(body.model),
                _ => LLMError::RequestFailed(format!("HTTP {status}: {error_text}")),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::UnexpectedResponse(format!("Failed to parse response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::UnexpectedResponse("No choices in response".to_string()))?;

        let usage = parsed.usage.unwrap_or_default();
        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("none"),
            input_tokens = usage.prompt_tokens,
            output_tokens = usage.completion_tokens,
            "Received chat completion"
        );

        Ok(CompletionResponse {
            message: parse_response_message(choice.message),
            stop_reason: map_stop_reason(choice.finish_reason.as_deref()),
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

impl ChatRequest {
    fn from_request(request: CompletionRequest) -> Self {
        Self {
            model: request.model,
            messages: build_messages(request.system, request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: request.tools.as_deref().map(convert_tools),
            tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &'static str, content: String) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    tool_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
}

// Conversion

fn build_messages(system: Option<String>, messages: Vec<Message>) -> Vec<WireMessage> {
    let mut result = Vec::with_capacity(messages.len() + 1);
    if let Some(sys) = system {
        result.push(WireMessage::text("system", sys));
    }
    for msg in messages {
        result.extend(convert_message(msg));
    }
    result
}

/// Convert one message; tool result blocks each become their own `tool` message
fn convert_message(msg: Message) -> Vec<WireMessage> {
    let role = match msg.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    };

    let blocks = match msg.content {
        Some(MessageContent::Text(text)) => return vec![WireMessage::text(role, text)],
        None => return vec![WireMessage::text(role, String::new())],
        Some(MessageContent::Blocks(blocks)) => blocks,
    };

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    let mut results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(WireToolCall {
                id,
                tool_type: function_type(),
                function: WireFunctionCall {
                    name,
                    arguments: wire_arguments(input),
                },
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => results.push(WireMessage {
                role: "tool",
                content: Some(content),
                tool_calls: Vec::new(),
                tool_call_id: Some(tool_use_id),
            }),
        }
    }

    let mut out = Vec::new();
    if !texts.is_empty() || !tool_calls.is_empty() {
        out.push(WireMessage {
            role: if role == "tool" { "assistant" } else { role },
            content: (!texts.is_empty()).then(|| texts.join("\n")),
            tool_calls,
            tool_call_id: None,
        });
    }
    out.extend(results);
    out
}

/// Malformed arguments were kept as a raw string; send them back unchanged
fn wire_arguments(input: Value) -> String {
    match input {
        Value::String(raw) => raw,
        other => other.to_string(),
    }
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
    tools
        .iter()
        .map(|tool| WireTool {
            tool_type: "function",
            function: WireFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => Value::from("auto"),
        ToolChoice::Required => Value::from("required"),
        ToolChoice::Tool(name) => serde_json::json!({
            "type": "function",
            "function": { "name": name },
        }),
    }
}

/// Parse the assistant message
///
/// Tool arguments that are not valid JSON are kept as a JSON string so that
/// the caller's validation can report them back to the model.
fn parse_response_message(msg: ResponseMessage) -> Message {
    let mut blocks = Vec::new();

    if let Some(content) = msg.content.filter(|c| !c.is_empty()) {
        blocks.push(ContentBlock::Text { text: content });
    }

    for call in msg.tool_calls.unwrap_or_default() {
        let input = serde_json::from_str(&call.function.arguments).unwrap_or_else(|e| {
            warn!(tool = %call.function.name, error = %e, "Tool arguments are not valid JSON");
            Value::String(call.function.arguments.clone())
        });
        blocks.push(ContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input,
        });
    }

    if blocks.is_empty() {
        blocks.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    Message::assistant_blocks(blocks)
}

fn map_stop_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls" | "function_call") => StopReason::ToolUse,
        Some("stop") | None => StopReason::EndTurn,
        Some(other) => {
            debug!(reason = other, "Unknown stop reason");
            StopReason::EndTurn
        }
    }
}
