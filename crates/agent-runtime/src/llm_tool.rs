//! A tool that answers with a plain model completion
//!
//! Lets evidence-chaining planners route a step to "just ask the model",
//! with the same calling convention as any other tool.

use agent_core::{Error, Result};
use agent_llm::{CompletionRequest, LLMProvider, Message};
use agent_tools::Tool;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Tool backed by a single completion call
pub struct LlmTool {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl LlmTool {
    /// Create a tool calling `model` on `provider`
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 2048,
        }
    }

    /// Set the sampling temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Answer a prompt directly
    pub async fn ask(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest::builder(&self.model)
            .add_message(Message::user(prompt))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build();
        let response = self.provider.complete(request).await?;
        debug!(output_tokens = response.usage.output_tokens, "LLM tool answered");
        Ok(response.message.full_text())
    }
}

#[async_trait]
impl Tool for LlmTool {
    async fn execute(&self, params: Value) -> Result<Value> {
        let query = params["query"]
            .as_str()
            .ok_or_else(|| Error::ProcessingFailed("missing string field 'query'".to_string()))?;
        Ok(Value::String(self.ask(query).await?))
    }

    fn name(&self) -> &str {
        "llm"
    }

    fn description(&self) -> &str {
        "Answer from general world knowledge and common sense."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Question or instruction" }
            },
            "required": ["query"]
        })
    }
}
