//! Plan-and-execute agent against an OpenAI-compatible server
//!
//! # Configuration
//!
//! Set environment variables (or put them in `.env`):
//! ```bash
//! export BASE_URL="http://localhost:11434/v1"
//! export MODEL_NAME="llama3.1"
//! export SERPER_API_KEY="your-key-here"
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --example plan_execute -p agent-plan -- "what is the capital of France?"
//! ```

use agent_llm::providers::{OpenAIConfig, OpenAIProvider};
use agent_plan::{
    AgentStepExecutor, LlmPlanner, PlanConfig, PlanExecuteController, PlanObserver, StepResult,
};
use agent_runtime::{AgentExecutor, ExecutorEventHandler};
use agent_tools::{SerperSearch, ToolRegistry};
use agent_utils::{Config, init_tracing};
use async_trait::async_trait;
use serde_json::Value;
use std::env;
use std::sync::Arc;

struct Printer;

#[async_trait]
impl PlanObserver for Printer {
    async fn on_plan(&self, steps: &[String]) {
        println!("📋 Plan: {steps:?}\n");
    }

    async fn on_step(&self, result: &StepResult) {
        println!("🔧 {}\n   {}\n", result.step, result.result_text());
    }

    async fn on_replan(&self, steps: &[String]) {
        println!("📋 Updated plan: {steps:?}\n");
    }

    async fn on_response(&self, response: &str) {
        println!("✅ {response}");
    }
}

#[async_trait]
impl ExecutorEventHandler for Printer {
    async fn on_tool_start(&self, _id: &str, name: &str, input: &Value) {
        println!("   ↳ {name} {input}");
    }

    async fn on_tool_done(
        &self,
        _id: &str,
        name: &str,
        result: Result<&Value, &str>,
        duration_ms: u64,
    ) {
        if let Err(error) = result {
            println!("   ↳ {name} failed after {duration_ms}ms: {error}");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let task = env::args()
        .nth(1)
        .unwrap_or_else(|| "what is the hometown of the mens 2024 Australia open winner?".to_string());

    let app = Config::from_env()?;
    let config = PlanConfig::from_app_config(&app);
    let provider = Arc::new(OpenAIProvider::with_config(OpenAIConfig::from_app_config(&app))?);

    let printer = Arc::new(Printer);
    let tools = ToolRegistry::new().with_tool(Arc::new(SerperSearch::from_app_config(&app)?));
    let agent = AgentExecutor::builder()
        .provider(provider.clone())
        .tool_registry(Arc::new(tools))
        .model(&config.model)
        .temperature(config.temperature)
        .system_prompt("You are a helpful agent.")
        .event_handler(printer.clone())
        .build()?;

    let controller = PlanExecuteController::from_config(
        Arc::new(LlmPlanner::from_provider(provider, &config)),
        Arc::new(AgentStepExecutor::new(Arc::new(agent))),
        &config,
    )
    .with_observer(printer);

    println!("=== Plan and Execute ===\n");
    println!("Task: {task}\n");

    let run = controller.run(task).await?;
    println!("\nFinished after {} node executions", run.iterations);
    Ok(())
}
