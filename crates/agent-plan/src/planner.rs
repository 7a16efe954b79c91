//! Model-backed planner and step executor

use crate::config::PlanConfig;
use crate::controller::{Planner, StepExecutor};
use crate::error::{PlanError, Result};
use crate::extract::Payload;
use crate::prompts;
use crate::retry::{Invoke, ModelInvoker, PayloadValidator, Responded, RetryResponder};
use crate::store::PlanStore;
use agent_llm::{LLMProvider, Message};
use agent_runtime::AgentExecutor;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// [`Planner`] that asks a model for JSON plans
///
/// Each call is validated and retried. When every attempt is unusable the
/// last reply is passed through as plain text: the planner turns it into a
/// one-step plan and the replanner into the final response. Only a blank
/// last reply aborts with [`PlanError::UnusableOutput`].
pub struct LlmPlanner {
    planner: RetryResponder<PayloadValidator>,
    replanner: RetryResponder<PayloadValidator>,
}

impl LlmPlanner {
    /// Create a planner on top of `invoker`
    pub fn new(invoker: Arc<dyn Invoke>, max_attempts: usize) -> Self {
        Self {
            planner: RetryResponder::new(invoker.clone(), PayloadValidator::plan(), max_attempts),
            replanner: RetryResponder::new(invoker, PayloadValidator::replan(), max_attempts),
        }
    }

    /// Create a planner calling `provider` with the settings in `config`
    pub fn from_provider(provider: Arc<dyn LLMProvider>, config: &PlanConfig) -> Self {
        let invoker = ModelInvoker::from_config(provider, config);
        Self::new(Arc::new(invoker), config.max_attempts)
    }
}

/// What a planning call settled on
enum Usable {
    Payload(Payload),
    /// Trimmed text of the last, unparseable reply
    Raw(String),
}

fn usable(stage: &'static str, responded: Responded<Payload>) -> Result<Usable> {
    match responded {
        Responded::Valid {
            value, attempts, ..
        } => {
            debug!(stage = stage, attempts = attempts, "Structured output accepted");
            Ok(Usable::Payload(value))
        }
        Responded::Exhausted {
            message,
            error,
            attempts,
        } => {
            let raw = message.full_text();
            if raw.trim().is_empty() {
                return Err(PlanError::UnusableOutput {
                    stage,
                    attempts,
                    error,
                    raw,
                });
            }
            warn!(
                stage = stage,
                attempts = attempts,
                error = %error,
                "No structured output, passing the last reply through"
            );
            Ok(Usable::Raw(raw.trim().to_string()))
        }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, task: &str) -> Result<Vec<String>> {
        let history = [Message::system(prompts::PLANNER_SYSTEM), Message::user(task)];
        match usable("planner", self.planner.respond(&history).await?)? {
            Usable::Payload(Payload::Steps(steps)) => Ok(steps),
            Usable::Payload(Payload::Response(_)) => Err(PlanError::EmptyPlan { stage: "planner" }),
            Usable::Raw(raw) => Ok(vec![raw]),
        }
    }

    async fn replan(&self, store: &PlanStore) -> Result<Payload> {
        let history = [Message::user(prompts::replanner(store)?)];
        match usable("replanner", self.replanner.respond(&history).await?)? {
            Usable::Payload(payload) => Ok(payload),
            Usable::Raw(raw) => Ok(Payload::Response(raw)),
        }
    }
}

/// [`StepExecutor`] delegating each step to a tool-using agent
pub struct AgentStepExecutor {
    agent: Arc<AgentExecutor>,
}

impl AgentStepExecutor {
    pub fn new(agent: Arc<AgentExecutor>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl StepExecutor for AgentStepExecutor {
    async fn execute(&self, plan: &[String], step: &str) -> agent_core::Result<String> {
        let instruction = prompts::step_instruction(plan, step)?;
        info!(step = %step, "Executing step");
        self.agent.run(instruction).await
    }
}
