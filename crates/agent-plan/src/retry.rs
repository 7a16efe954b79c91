//! Bounded retry around schema-validated model calls
//!
//! A [`RetryResponder`] invokes the model, validates the reply, and on
//! failure shows the model its own reply together with the validation error
//! and the schema before trying again. After `max_attempts` it gives up and
//! hands back the last reply as [`Responded::Exhausted`] instead of failing,
//! so callers decide what a malformed final answer means for them.

use crate::error::ValidationError;
use crate::extract::{self, Payload};
use agent_llm::{
    CompletionRequest, LLMProvider, Message, ToolChoice, ToolDefinition,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces one raw model reply from a conversation
#[async_trait]
pub trait Invoke: Send + Sync {
    /// Call the model once
    async fn invoke(&self, messages: &[Message]) -> agent_llm::Result<Message>;
}

/// Accepts or rejects a model reply
pub trait Validate: Send + Sync {
    /// Value produced by a valid reply
    type Output: Send;

    /// Check the reply against the schema
    fn validate(&self, message: &Message) -> Result<Self::Output, ValidationError>;

    /// Schema description shown to the model after a failure
    fn schema(&self) -> String;
}

/// [`Invoke`] on top of an [`LLMProvider`]
#[derive(Clone)]
pub struct ModelInvoker {
    provider: Arc<dyn LLMProvider>,
    model: String,
    system: Option<String>,
    max_tokens: usize,
    temperature: Option<f32>,
    tools: Vec<ToolDefinition>,
    tool_choice: Option<ToolChoice>,
}

impl ModelInvoker {
    /// Create an invoker for `model`
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            system: None,
            max_tokens: 2048,
            temperature: None,
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    /// Model, temperature and token limit from a [`crate::PlanConfig`]
    pub fn from_config(provider: Arc<dyn LLMProvider>, config: &crate::PlanConfig) -> Self {
        Self::new(provider, &config.model)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }

    /// Set a system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Bind a structured-output tool and force the model to call it
    #[must_use]
    pub fn with_output_tool(mut self, tool: ToolDefinition) -> Self {
        self.tool_choice = Some(ToolChoice::Tool(tool.name.clone()));
        self.tools = vec![tool];
        self
    }
}

#[async_trait]
impl Invoke for ModelInvoker {
    async fn invoke(&self, messages: &[Message]) -> agent_llm::Result<Message> {
        let mut builder = CompletionRequest::builder(&self.model)
            .messages(messages.to_vec())
            .max_tokens(self.max_tokens)
            .tools(self.tools.clone());
        if let Some(system) = &self.system {
            builder = builder.system(system.as_str());
        }
        if let Some(temperature) = self.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(choice) = &self.tool_choice {
            builder = builder.tool_choice(choice.clone());
        }

        let response = self.provider.complete(builder.build()).await?;
        debug!(
            stop_reason = ?response.stop_reason,
            output_tokens = response.usage.output_tokens,
            "Model invoked"
        );
        Ok(response.message)
    }
}

/// Which payloads a [`PayloadValidator`] accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accept {
    StepsOnly,
    StepsOrResponse,
}

/// Validates text replies carrying a [`Payload`]
///
/// Empty step lists and blank responses are rejected as well.
#[derive(Debug, Clone, Copy)]
pub struct PayloadValidator {
    accept: Accept,
}

impl PayloadValidator {
    /// Initial planning: only a non-empty step list is valid
    pub fn plan() -> Self {
        Self {
            accept: Accept::StepsOnly,
        }
    }

    /// Replanning: new steps or a final response
    pub fn replan() -> Self {
        Self {
            accept: Accept::StepsOrResponse,
        }
    }
}

impl Validate for PayloadValidator {
    type Output = Payload;

    fn validate(&self, message: &Message) -> Result<Payload, ValidationError> {
        let payload = extract::extract(&message.full_text())?;
        match (&payload, self.accept) {
            (Payload::Steps(steps), _) if steps.is_empty() => Err(ValidationError::Schema(
                "\"steps\" must contain at least one step".to_string(),
            )),
            (Payload::Steps(steps), _) if steps.iter().any(|s| s.trim().is_empty()) => Err(
                ValidationError::Schema("steps must not be blank".to_string()),
            ),
            (Payload::Response(_), Accept::StepsOnly) => Err(ValidationError::Schema(
                "expected a \"steps\" list, not a response".to_string(),
            )),
            (Payload::Response(r), _) if r.trim().is_empty() => Err(ValidationError::Schema(
                "\"response\" must not be empty".to_string(),
            )),
            _ => Ok(payload),
        }
    }

    fn schema(&self) -> String {
        let steps = serde_json::json!({
            "type": "object",
            "properties": {"steps": {"type": "array", "items": {"type": "string"}, "minItems": 1}},
            "required": ["steps"]
        });
        let schema = match self.accept {
            Accept::StepsOnly => steps,
            Accept::StepsOrResponse => serde_json::json!({
                "oneOf": [
                    steps,
                    {
                        "type": "object",
                        "properties": {"response": {"type": "string"}},
                        "required": ["response"]
                    }
                ]
            }),
        };
        schema.to_string()
    }
}

/// Validates that the reply calls `tool` with arguments decoding into `T`
pub struct ToolCallValidator<T> {
    tool: ToolDefinition,
    _output: PhantomData<fn() -> T>,
}

impl<T> ToolCallValidator<T> {
    /// Expect a call to `tool`
    pub fn new(tool: ToolDefinition) -> Self {
        Self {
            tool,
            _output: PhantomData,
        }
    }

    /// The expected tool
    pub fn tool(&self) -> &ToolDefinition {
        &self.tool
    }
}

impl<T: DeserializeOwned + Send> Validate for ToolCallValidator<T> {
    type Output = T;

    fn validate(&self, message: &Message) -> Result<T, ValidationError> {
        let call = message
            .tool_calls()
            .into_iter()
            .find(|c| c.name == self.tool.name)
            .ok_or_else(|| ValidationError::MissingToolCall {
                expected: self.tool.name.clone(),
            })?;
        serde_json::from_value(call.input.clone()).map_err(|e| {
            ValidationError::Schema(format!("invalid arguments for {}: {e}", self.tool.name))
        })
    }

    fn schema(&self) -> String {
        serde_json::json!({
            "name": self.tool.name,
            "description": self.tool.description,
            "parameters": self.tool.input_schema,
        })
        .to_string()
    }
}

/// Outcome of [`RetryResponder::respond`]
#[derive(Debug, Clone)]
pub enum Responded<T> {
    /// A reply passed validation
    Valid {
        value: T,
        message: Message,
        attempts: usize,
    },
    /// Every attempt failed; `message` is the last raw reply
    Exhausted {
        message: Message,
        error: ValidationError,
        attempts: usize,
    },
}

impl<T> Responded<T> {
    /// The reply that ended the call
    pub fn message(&self) -> &Message {
        match self {
            Self::Valid { message, .. } | Self::Exhausted { message, .. } => message,
        }
    }

    /// Take the reply that ended the call
    pub fn into_message(self) -> Message {
        match self {
            Self::Valid { message, .. } | Self::Exhausted { message, .. } => message,
        }
    }

    /// Number of model invocations made
    pub fn attempts(&self) -> usize {
        match self {
            Self::Valid { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// The validated value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Valid { value, .. } => Some(value),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Invokes and validates with a fixed attempt cap
pub struct RetryResponder<V> {
    invoker: Arc<dyn Invoke>,
    validator: V,
    max_attempts: usize,
}

impl<V: Validate> RetryResponder<V> {
    /// Create a responder making at most `max_attempts` calls (at least one)
    pub fn new(invoker: Arc<dyn Invoke>, validator: V, max_attempts: usize) -> Self {
        Self {
            invoker,
            validator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Attempt cap
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// The validator
    pub fn validator(&self) -> &V {
        &self.validator
    }

    /// Invoke until a reply validates or the cap is reached
    ///
    /// Failed replies and their corrections are appended to a local copy of
    /// `history` only. Model transport errors are returned as `Err`.
    pub async fn respond(&self, history: &[Message]) -> agent_llm::Result<Responded<V::Output>> {
        let mut conversation = history.to_vec();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let message = self.invoker.invoke(&conversation).await?;

            let error = match self.validator.validate(&message) {
                Ok(value) => {
                    debug!(attempt = attempt, "Response validated");
                    return Ok(Responded::Valid {
                        value,
                        message,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            if attempt >= self.max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "Validation failed on every attempt, returning last response"
                );
                return Ok(Responded::Exhausted {
                    message,
                    error,
                    attempts: attempt,
                });
            }

            warn!(
                attempt = attempt,
                max_attempts = self.max_attempts,
                error = %error,
                "Response failed validation, retrying"
            );
            let corrections = corrective_messages(&message, &error, &self.validator.schema());
            conversation.push(message);
            conversation.extend(corrections);
        }
    }
}

/// Messages telling the model what was wrong with `response`
///
/// Every tool call in `response` gets an error result carrying the
/// correction, since function-calling APIs reject unanswered call IDs. A
/// reply without tool calls gets a single user message.
pub fn corrective_messages(
    response: &Message,
    error: &ValidationError,
    schema: &str,
) -> Vec<Message> {
    let text = format!(
        "{error}\n\nPay close attention to the function schema.\n\n{schema} Respond by fixing all validation errors."
    );
    let calls = response.tool_calls();
    if calls.is_empty() {
        return vec![Message::user(text)];
    }
    calls
        .into_iter()
        .map(|call| Message::tool_error(call.id, text.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_llm::{ContentBlock, Role};
    use serde::Deserialize;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned replies and records each conversation it was shown
    struct Script {
        replies: Mutex<VecDeque<Message>>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Script {
        fn new(replies: Vec<Message>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Invoke for Script {
        async fn invoke(&self, messages: &[Message]) -> agent_llm::Result<Message> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Message::assistant("not json at all")))
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        answer: String,
    }

    fn answer_tool() -> ToolDefinition {
        ToolDefinition::new(
            "Answer",
            "Answer the question",
            json!({"type": "object", "properties": {"answer": {"type": "string"}}, "required": ["answer"]}),
        )
    }

    fn call(id: &str, input: serde_json::Value) -> Message {
        Message::assistant_blocks(vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: "Answer".to_string(),
            input,
        }])
    }

    #[tokio::test]
    async fn test_first_valid_reply_returns_immediately() {
        let script = Script::new(vec![Message::assistant("{\"steps\": [\"A\"]}")]);
        let responder = RetryResponder::new(script.clone(), PayloadValidator::plan(), 3);

        let out = responder.respond(&[Message::user("task")]).await.unwrap();
        assert_eq!(out.value(), Some(&Payload::Steps(vec!["A".to_string()])));
        assert_eq!(out.attempts(), 1);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_retries_with_corrections_then_succeeds() {
        let script = Script::new(vec![
            Message::assistant("not json at all"),
            Message::assistant("{\"response\": \"X\"}"),
        ]);
        let responder = RetryResponder::new(script.clone(), PayloadValidator::replan(), 3);
        let history = vec![Message::user("task")];

        let out = responder.respond(&history).await.unwrap();
        assert_eq!(out.value(), Some(&Payload::Response("X".to_string())));
        assert_eq!(out.attempts(), 2);

        let seen = script.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 1);
        // task, bad reply, correction
        assert_eq!(seen[1].len(), 3);
        assert_eq!(seen[1][2].role, Role::User);
        let correction = seen[1][2].full_text();
        assert!(correction.contains("Pay close attention to the function schema."));
        assert!(correction.ends_with("Respond by fixing all validation errors."));
        // caller's history is untouched
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_attempt() {
        let script = Script::new(vec![
            Message::assistant("one"),
            Message::assistant("two"),
            Message::assistant("three"),
            Message::assistant("{\"steps\": [\"never reached\"]}"),
        ]);
        let responder = RetryResponder::new(script.clone(), PayloadValidator::plan(), 3);

        let out = responder.respond(&[Message::user("task")]).await.unwrap();
        assert_eq!(script.calls(), 3);
        match out {
            Responded::Exhausted {
                message, attempts, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(message.full_text(), "three");
            }
            Responded::Valid { .. } => panic!("expected exhaustion"),
        }
    }

    #[tokio::test]
    async fn test_history_grows_by_two_per_failure() {
        let script = Script::new(vec![]);
        let responder = RetryResponder::new(script.clone(), PayloadValidator::plan(), 3);
        let _ = responder.respond(&[Message::user("task")]).await.unwrap();

        let lens: Vec<usize> = script.seen.lock().unwrap().iter().map(Vec::len).collect();
        assert_eq!(lens, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_invokes_once() {
        let script = Script::new(vec![]);
        let responder = RetryResponder::new(script.clone(), PayloadValidator::plan(), 0);
        let out = responder.respond(&[]).await.unwrap();
        assert_eq!(out.attempts(), 1);
        assert_eq!(script.calls(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_correction_answers_the_call() {
        let script = Script::new(vec![
            call("call_1", json!({"answer": 42})),
            call("call_2", json!({"answer": "Paris"})),
        ]);
        let responder = RetryResponder::new(
            script.clone(),
            ToolCallValidator::<Answer>::new(answer_tool()),
            3,
        );

        let out = responder.respond(&[Message::user("capital?")]).await.unwrap();
        assert_eq!(
            out.value(),
            Some(&Answer {
                answer: "Paris".to_string()
            })
        );

        let seen = script.seen.lock().unwrap();
        let correction = &seen[1][2];
        assert_eq!(correction.role, Role::Tool);
        match &correction.content {
            Some(agent_llm::MessageContent::Blocks(blocks)) => match &blocks[0] {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    assert_eq!(tool_use_id, "call_1");
                    assert!(content.contains("\"name\":\"Answer\""));
                }
                other => panic!("unexpected block {other:?}"),
            },
            other => panic!("unexpected content {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_every_tool_call_gets_a_correction() {
        let parallel = Message::assistant_blocks(vec![
            ContentBlock::ToolUse {
                id: "a".to_string(),
                name: "Answer".to_string(),
                input: json!({"answer": 1}),
            },
            ContentBlock::ToolUse {
                id: "b".to_string(),
                name: "Answer".to_string(),
                input: json!({"answer": 2}),
            },
        ]);
        let script = Script::new(vec![parallel, call("c", json!({"answer": "Paris"}))]);
        let responder = RetryResponder::new(
            script.clone(),
            ToolCallValidator::<Answer>::new(answer_tool()),
            3,
        );

        let out = responder.respond(&[Message::user("capital?")]).await.unwrap();
        assert_eq!(out.attempts(), 2);

        let seen = script.seen.lock().unwrap();
        // task, reply, one result per call
        assert_eq!(seen[1].len(), 4);
        let answered: Vec<&str> = seen[1][2..]
            .iter()
            .map(|m| {
                assert_eq!(m.role, Role::Tool);
                match &m.content {
                    Some(agent_llm::MessageContent::Blocks(blocks)) => match &blocks[0] {
                        ContentBlock::ToolResult { tool_use_id, .. } => tool_use_id.as_str(),
                        other => panic!("unexpected block {other:?}"),
                    },
                    other => panic!("unexpected content {other:?}"),
                }
            })
            .collect();
        assert_eq!(answered, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_tool_call() {
        let validator = ToolCallValidator::<Answer>::new(answer_tool());
        assert_eq!(
            validator.validate(&Message::assistant("Paris")).unwrap_err(),
            ValidationError::MissingToolCall {
                expected: "Answer".to_string()
            }
        );
    }

    #[test]
    fn test_payload_validator_rules() {
        let plan = PayloadValidator::plan();
        let replan = PayloadValidator::replan();

        assert!(plan.validate(&Message::assistant("{\"steps\": []}")).is_err());
        assert!(plan.validate(&Message::assistant("{\"response\": \"X\"}")).is_err());
        assert!(replan.validate(&Message::assistant("{\"response\": \"\"}")).is_err());
        assert!(replan.validate(&Message::assistant("{\"steps\": [\" \"]}")).is_err());
        assert!(replan.validate(&Message::assistant("{\"response\": \"X\"}")).is_ok());
        assert!(replan.schema().contains("oneOf"));
    }
}
