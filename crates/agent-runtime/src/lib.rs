//! Agent runtime
//!
//! Provides the [`AgentExecutor`] tool-calling loop and [`LlmTool`], a tool
//! that answers with a plain model completion.

pub mod executor;
pub mod llm_tool;

pub use executor::{
    AgentExecutor, AgentExecutorBuilder, ExecutorConfig, ExecutorEventHandler, ExecutorOutput,
};
pub use llm_tool::LlmTool;
