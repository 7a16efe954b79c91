//! LLM provider abstraction layer
//!
//! This crate provides provider-agnostic abstractions for interacting with
//! Large Language Models (LLMs). It includes:
//!
//! - Message types, including tool calls and tool results
//! - Completion request/response types
//! - Tool definitions and tool choice for function calling
//! - The [`LLMProvider`] trait
//! - An OpenAI-compatible provider (behind the `openai` feature)

pub mod completion;
pub mod error;
pub mod messages;
pub mod provider;
pub mod tools;

pub use completion::{CompletionRequest, CompletionResponse, StopReason, TokenUsage};
pub use error::{LLMError, Result};
pub use messages::{ContentBlock, Message, MessageContent, Role, ToolCall};
pub use provider::LLMProvider;
pub use tools::{ToolChoice, ToolDefinition};

pub mod providers;
