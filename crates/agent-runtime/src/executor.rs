//! Agent executor for running tool-calling loops
//!
//! The AgentExecutor implements the core agent loop pattern:
//! 1. Call LLM with conversation history and available tools
//! 2. If the reply requests tools, execute them and loop back
//! 3. Otherwise return the reply text
//!
//! Plan-execute agents use one executor run per plan step.

use agent_core::{Error, Result};
use agent_llm::{CompletionRequest, LLMProvider, Message, StopReason, ToolCall};
use agent_tools::ToolRegistry;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Event handler for agent execution events
#[async_trait]
pub trait ExecutorEventHandler: Send + Sync {
    /// Called when a tool execution starts
    async fn on_tool_start(&self, _id: &str, _name: &str, _input: &Value) {}

    /// Called when a tool execution completes
    async fn on_tool_done(
        &self,
        _id: &str,
        _name: &str,
        _result: std::result::Result<&Value, &str>,
        _duration_ms: u64,
    ) {
    }
}

/// Configuration for agent execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of model calls in one run
    pub max_iterations: usize,

    /// Model to use
    pub model: String,

    /// System prompt
    pub system_prompt: Option<String>,

    /// Max tokens per completion
    pub max_tokens: usize,

    /// Temperature
    pub temperature: Option<f32>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            model: "llama3.1".to_string(),
            system_prompt: None,
            max_tokens: 4096,
            temperature: Some(0.0),
        }
    }
}

/// Final answer of a run together with the full transcript
#[derive(Debug, Clone)]
pub struct ExecutorOutput {
    /// Text of the last assistant message
    pub text: String,
    /// Conversation including the input, tool calls and tool results
    pub messages: Vec<Message>,
    /// Number of model calls made
    pub iterations: usize,
}

/// Executes an agent loop: LLM → tool calls → execution → loop back
pub struct AgentExecutor {
    provider: Arc<dyn LLMProvider>,
    tool_registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
    event_handler: Option<Arc<dyn ExecutorEventHandler>>,
}

impl AgentExecutor {
    /// Create a new agent executor
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        tool_registry: Arc<ToolRegistry>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            provider,
            tool_registry,
            config,
            event_handler: None,
        }
    }

    /// Create a builder
    pub fn builder() -> AgentExecutorBuilder {
        AgentExecutorBuilder::new()
    }

    /// Set the event handler for receiving execution events
    #[must_use]
    pub fn with_event_handler(mut self, handler: Arc<dyn ExecutorEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute the loop for a single user message and return the answer text
    pub async fn run(&self, user_message: impl Into<String>) -> Result<String> {
        let output = self.run_messages(vec![Message::user(user_message)]).await?;
        Ok(output.text)
    }

    /// Execute the loop starting from an existing conversation
    ///
    /// Fails with [`Error::IterationLimit`] when the model keeps requesting
    /// tools past `max_iterations`.
    pub async fn run_messages(&self, initial: Vec<Message>) -> Result<ExecutorOutput> {
        let mut conversation = initial;
        let tools = self.tool_registry.definitions();
        debug!(tool_count = tools.len(), "Available tools");

        for iteration in 1..=self.config.max_iterations {
            info!(
                iteration = iteration,
                max_iterations = self.config.max_iterations,
                "Agent iteration started"
            );

            let mut builder = CompletionRequest::builder(&self.config.model)
                .messages(conversation.clone())
                .system(
                    self.config
                        .system_prompt
                        .as_deref()
                        .unwrap_or(DEFAULT_SYSTEM_PROMPT),
                )
                .max_tokens(self.config.max_tokens)
                .tools(tools.clone());
            if let Some(temperature) = self.config.temperature {
                builder = builder.temperature(temperature);
            }

            let response = self.provider.complete(builder.build()).await?;
            info!(
                stop_reason = ?response.stop_reason,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "LLM response received"
            );

            let message = response.message;
            conversation.push(message.clone());

            // Some servers report "stop" even when tool calls are present
            if !message.has_tool_calls() {
                if response.stop_reason == StopReason::MaxTokens {
                    warn!(iteration = iteration, "Response truncated at token limit");
                }
                let text = message.full_text();
                info!(
                    iteration = iteration,
                    response_length = text.len(),
                    "Agent completed"
                );
                return Ok(ExecutorOutput {
                    text,
                    messages: conversation,
                    iterations: iteration,
                });
            }

            let results = self.execute_tools(&message.tool_calls()).await;
            conversation.extend(results);
        }

        warn!(
            max_iterations = self.config.max_iterations,
            "Max iterations reached, stopping"
        );
        Err(Error::IterationLimit {
            limit: self.config.max_iterations,
        })
    }

    /// Execute tool calls in order, one result message per call
    ///
    /// Unknown tools and tool failures become error results so the model can
    /// correct itself on the next turn.
    async fn execute_tools(&self, calls: &[ToolCall<'_>]) -> Vec<Message> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let input_preview: String = call.input.to_string().chars().take(500).collect();
            info!(
                tool_name = %call.name,
                tool_id = %call.id,
                input_preview = %input_preview,
                "Executing tool"
            );

            if let Some(handler) = &self.event_handler {
                handler.on_tool_start(call.id, call.name, call.input).await;
            }

            let Some(tool) = self.tool_registry.get(call.name) else {
                warn!(tool_name = %call.name, "Tool not found");
                results.push(Message::tool_error(
                    call.id,
                    format!("Error: tool '{}' does not exist", call.name),
                ));
                continue;
            };

            let start = Instant::now();
            let outcome = tool.execute(call.input.clone()).await;
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match outcome {
                Ok(result) => {
                    let text = match &result {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    info!(
                        tool_name = %call.name,
                        duration_ms = duration_ms,
                        result_length = text.len(),
                        "Tool execution succeeded"
                    );
                    if let Some(handler) = &self.event_handler {
                        handler
                            .on_tool_done(call.id, call.name, Ok(&result), duration_ms)
                            .await;
                    }
                    results.push(Message::tool_result(call.id, text));
                }
                Err(e) => {
                    let error = e.to_string();
                    warn!(
                        tool_name = %call.name,
                        duration_ms = duration_ms,
                        error = %error,
                        "Tool execution failed"
                    );
                    if let Some(handler) = &self.event_handler {
                        handler
                            .on_tool_done(call.id, call.name, Err(&error), duration_ms)
                            .await;
                    }
                    results.push(Message::tool_error(call.id, format!("Error: {error}")));
                }
            }
        }

        results
    }
}

/// Builder for AgentExecutor
pub struct AgentExecutorBuilder {
    provider: Option<Arc<dyn LLMProvider>>,
    tool_registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
    event_handler: Option<Arc<dyn ExecutorEventHandler>>,
}

impl AgentExecutorBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            provider: None,
            tool_registry: Arc::new(ToolRegistry::new()),
            config: ExecutorConfig::default(),
            event_handler: None,
        }
    }

    /// Set the LLM provider
    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the tool registry
    pub fn tool_registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.tool_registry = registry;
        self
    }

    /// Set the full configuration
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set maximum iterations
    pub fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    /// Set the model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system prompt
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Set max tokens
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    /// Set the event handler
    pub fn event_handler(mut self, handler: Arc<dyn ExecutorEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the executor
    pub fn build(self) -> Result<AgentExecutor> {
        let provider = self
            .provider
            .ok_or_else(|| Error::InitializationFailed("Provider not set".to_string()))?;
        if self.config.max_iterations == 0 {
            return Err(Error::InitializationFailed(
                "max_iterations must be greater than 0".to_string(),
            ));
        }

        Ok(AgentExecutor {
            provider,
            tool_registry: self.tool_registry,
            config: self.config,
            event_handler: self.event_handler,
        })
    }
}

impl Default for AgentExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_llm::{CompletionResponse, ContentBlock, TokenUsage};
    use agent_tools::Tool;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Provider returning canned messages in order
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Message>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> agent_llm::Result<CompletionResponse> {
            self.requests.lock().unwrap().push(request);
            let message = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Message::assistant("out of script"));
            Ok(CompletionResponse {
                stop_reason: if message.has_tool_calls() {
                    StopReason::ToolUse
                } else {
                    StopReason::EndTurn
                },
                message,
                usage: TokenUsage::default(),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Capital;

    #[async_trait]
    impl Tool for Capital {
        async fn execute(&self, params: Value) -> Result<Value> {
            match params["country"].as_str() {
                Some("France") => Ok(json!("Paris")),
                _ => Err(Error::ProcessingFailed("unknown country".to_string())),
            }
        }

        fn name(&self) -> &str {
            "capital"
        }

        fn description(&self) -> &str {
            "Look up a capital city"
        }

        fn input_schema(&self) -> Value {
            json!({"type": "object", "properties": {"country": {"type": "string"}}})
        }
    }

    #[derive(Default)]
    struct Recorder {
        done: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl ExecutorEventHandler for Recorder {
        async fn on_tool_done(
            &self,
            _id: &str,
            name: &str,
            result: std::result::Result<&Value, &str>,
            _duration_ms: u64,
        ) {
            self.done
                .lock()
                .unwrap()
                .push((name.to_string(), result.is_ok()));
        }
    }

    fn tool_call(id: &str, name: &str, input: Value) -> Message {
        Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }])
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new().with_tool(Arc::new(Capital)))
    }

    #[test]
    fn test_builder() {
        let builder = AgentExecutorBuilder::new()
            .model("test-model")
            .max_iterations(5)
            .system_prompt("Test prompt");

        assert_eq!(builder.config.model, "test-model");
        assert_eq!(builder.config.max_iterations, 5);
        assert_eq!(builder.config.system_prompt, Some("Test prompt".to_string()));
    }

    #[test]
    fn test_build_requires_provider() {
        assert!(matches!(
            AgentExecutorBuilder::new().build(),
            Err(Error::InitializationFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = ScriptedProvider::new(vec![
            tool_call("c1", "capital", json!({"country": "France"})),
            Message::assistant("The capital of France is Paris."),
        ]);
        let recorder = Arc::new(Recorder::default());
        let executor = AgentExecutor::builder()
            .provider(provider.clone())
            .tool_registry(registry())
            .event_handler(recorder.clone())
            .build()
            .unwrap();

        let output = executor
            .run_messages(vec![Message::user("capital of France?")])
            .await
            .unwrap();

        assert_eq!(output.text, "The capital of France is Paris.");
        assert_eq!(output.iterations, 2);
        // user, tool call, tool result, answer
        assert_eq!(output.messages.len(), 4);
        assert_eq!(output.messages[2].role, agent_llm::Role::Tool);
        assert_eq!(
            recorder.done.lock().unwrap().as_slice(),
            &[("capital".to_string(), true)]
        );

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].tools.as_ref().map(Vec::len), Some(1));
        assert_eq!(requests[1].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_reported_to_the_model() {
        let provider = ScriptedProvider::new(vec![
            tool_call("c1", "capital", json!({"country": "Atlantis"})),
            tool_call("c2", "teleport", json!({})),
            Message::assistant("I could not find it."),
        ]);
        let executor = AgentExecutor::builder()
            .provider(provider)
            .tool_registry(registry())
            .build()
            .unwrap();

        let output = executor
            .run_messages(vec![Message::user("capital of Atlantis?")])
            .await
            .unwrap();

        assert_eq!(output.text, "I could not find it.");
        let errors: Vec<String> = output
            .messages
            .iter()
            .filter(|m| m.role == agent_llm::Role::Tool)
            .map(|m| match &m.content {
                Some(agent_llm::MessageContent::Blocks(blocks)) => match &blocks[0] {
                    ContentBlock::ToolResult { content, .. } => content.clone(),
                    _ => String::new(),
                },
                _ => String::new(),
            })
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("unknown country"));
        assert!(errors[1].contains("'teleport' does not exist"));
    }

    #[tokio::test]
    async fn test_iteration_limit_is_an_error() {
        let provider = ScriptedProvider::new(vec![
            tool_call("c1", "capital", json!({"country": "France"})),
            tool_call("c2", "capital", json!({"country": "France"})),
        ]);
        let executor = AgentExecutor::builder()
            .provider(provider)
            .tool_registry(registry())
            .max_iterations(2)
            .build()
            .unwrap();

        let err = executor.run("loop forever").await.unwrap_err();
        assert!(matches!(err, Error::IterationLimit { limit: 2 }));
    }
}
