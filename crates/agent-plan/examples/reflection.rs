//! Reflexion research agent: draft, search, revise
//!
//! # Configuration
//!
//! Requires `SERPER_API_KEY`; model settings come from `BASE_URL` and
//! `MODEL_NAME` (see `.env`).
//!
//! # Usage
//!
//! ```bash
//! cargo run --example reflection -p agent-plan -- "How should we handle the climate crisis?"
//! ```

use agent_llm::providers::{OpenAIConfig, OpenAIProvider};
use agent_plan::{PlanConfig, ReflectionLoop};
use agent_tools::SerperSearch;
use agent_utils::{Config, init_tracing};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let question = env::args()
        .nth(1)
        .unwrap_or_else(|| "What is the most valuable stock share?".to_string());

    let app = Config::from_env()?;
    let config = PlanConfig::from_app_config(&app);
    let provider = Arc::new(OpenAIProvider::with_config(OpenAIConfig::from_app_config(&app))?);
    let search = Arc::new(SerperSearch::from_app_config(&app)?);

    let out = ReflectionLoop::from_provider(provider, search, &config)
        .run(question)
        .await?;

    for (i, message) in out.messages.iter().enumerate() {
        println!("Step {i} [{:?}]", message.role);
        for call in message.tool_calls() {
            println!("{}: {:#}", call.name, call.input);
        }
        let text = message.full_text();
        if !text.is_empty() {
            println!("{text}");
        }
        println!();
    }

    println!("=== Final answer ({} revisions) ===\n", out.revisions);
    println!("{}", out.final_text());
    if let Some(answer) = &out.answer {
        for reference in answer.references() {
            println!("{reference}");
        }
    }
    Ok(())
}
