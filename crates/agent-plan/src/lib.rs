//! Bounded planning loops for LLM agents
//!
//! This crate provides three agent loops built on a shared bounded driver:
//!
//! - [`PlanExecuteController`]: plan, execute the first step, replan, until
//!   the replanner answers
//! - [`ReflectionLoop`]: draft, research, revise
//! - [`RewooLoop`]: evidence-chaining with named workers
//!
//! Structured model output goes through [`extract`] and the
//! [`RetryResponder`], which re-prompts the model with its validation errors a
//! bounded number of times.
//!
//! # Example
//!
//! ```no_run
//! use agent_plan::{AgentStepExecutor, LlmPlanner, PlanConfig, PlanExecuteController};
//! use agent_llm::providers::OpenAIProvider;
//! use agent_runtime::AgentExecutor;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(OpenAIProvider::from_env()?);
//! let config = PlanConfig::default();
//! let executor = AgentExecutor::builder().provider(provider.clone()).build()?;
//!
//! let controller = PlanExecuteController::from_config(
//!     Arc::new(LlmPlanner::from_provider(provider, &config)),
//!     Arc::new(AgentStepExecutor::new(Arc::new(executor))),
//!     &config,
//! );
//! let run = controller.run("what is the capital of France?").await?;
//! println!("{}", run.response);
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod config;
pub mod controller;
pub mod error;
pub mod extract;
pub mod machine;
pub mod observer;
pub mod planner;
pub mod prompts;
pub mod reflection;
pub mod retry;
pub mod rewoo;
pub mod store;

pub use agents::{PlanExecuteAgent, ReflectionAgent, RewooAgent};
pub use config::{PlanConfig, PlanConfigBuilder};
pub use controller::{PlanExecuteController, PlanRun, Planner, StepExecutor};
pub use error::{ExtractionError, PlanError, Result, ValidationError};
pub use extract::Payload;
pub use machine::{StateMachine, run_to_completion};
pub use observer::{PlanObserver, TracingObserver};
pub use planner::{AgentStepExecutor, LlmPlanner};
pub use reflection::{
    ActorInvoker, Answer, AnswerQuestion, Critique, ReflectionLoop, ReflectionOutput, ReviseAnswer,
};
pub use retry::{
    Invoke, ModelInvoker, PayloadValidator, Responded, RetryResponder, ToolCallValidator, Validate,
};
pub use rewoo::{Evidence, RewooLoop, RewooOutput, RewooStep};
pub use store::{PlanStore, StepOutcome, StepResult};
