//! ReWOO agent: step-by-step evidence gathering, then a single solve call
//!
//! # Usage
//!
//! ```bash
//! export SERPER_API_KEY="your-key-here"
//! cargo run --example rewoo -p agent-plan -- "What is the most valuable stock share?"
//! ```

use agent_llm::providers::{OpenAIConfig, OpenAIProvider};
use agent_plan::{PlanConfig, RewooLoop};
use agent_tools::SerperSearch;
use agent_utils::{Config, init_tracing};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let task = env::args()
        .nth(1)
        .unwrap_or_else(|| "What is the most valuable stock share?".to_string());

    let app = Config::from_env()?;
    let config = PlanConfig::from_app_config(&app);
    let provider = Arc::new(OpenAIProvider::with_config(OpenAIConfig::from_app_config(&app))?);
    let search = Arc::new(SerperSearch::from_app_config(&app)?);

    let out = RewooLoop::from_provider(provider, search, &config)
        .run(task)
        .await?;

    for evidence in &out.evidence {
        println!("{}", evidence.step);
        println!("   {}\n", evidence.result);
    }
    println!("=== Answer ===\n{}", out.answer);
    Ok(())
}
