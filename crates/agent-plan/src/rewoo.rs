//! Reasoning-without-observation loop
//!
//! ```text
//! plan -> tool -> review -> (tool | solve) -> END
//! ```
//!
//! The model proposes one `Step: ... #E = Worker[input]` line at a time. Each
//! step is run by the named worker and its result is shown to the reviewer,
//! which proposes the next step. When no step can be parsed, the solver
//! combines the gathered evidence into the answer.

use crate::config::PlanConfig;
use crate::error::{PlanError, Result};
use crate::machine::{StateMachine, run_to_completion};
use crate::prompts;
use crate::retry::{Invoke, ModelInvoker};
use agent_llm::{LLMProvider, Message};
use agent_runtime::LlmTool;
use agent_tools::Tool;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

static STEP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Step( \d*)*:\s*(.+)\s*(#E\d*)\s*=\s*(\w+)\s*\[([^\]]+)\]")
        .expect("valid step pattern")
});

/// Worker name for web search
pub const WEB_SEARCH: &str = "WebSearch";
/// Worker name for a direct model call
pub const LLM: &str = "LLM";

/// One parsed plan step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewooStep {
    pub description: String,
    /// Evidence variable, e.g. `#E1`
    pub variable: String,
    /// Worker name
    pub tool: String,
    pub input: String,
}

impl fmt::Display for RewooStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Step: {} {} = {}[{}]",
            self.description, self.variable, self.tool, self.input
        )
    }
}

/// First step line found in `text`
pub fn parse_step(text: &str) -> Option<RewooStep> {
    let caps = STEP_PATTERN.captures(text)?;
    Some(RewooStep {
        description: caps.get(2)?.as_str().trim().to_string(),
        variable: caps.get(3)?.as_str().to_string(),
        tool: caps.get(4)?.as_str().to_string(),
        input: caps.get(5)?.as_str().trim().to_string(),
    })
}

/// An executed step and what its worker returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub step: RewooStep,
    pub result: String,
}

/// Result of a ReWOO run
#[derive(Debug, Clone)]
pub struct RewooOutput {
    /// Solver answer
    pub answer: String,
    /// Evidence in execution order
    pub evidence: Vec<Evidence>,
    /// Node executions used
    pub iterations: usize,
}

/// Plans one step at a time and solves from the gathered evidence
pub struct RewooLoop {
    invoker: Arc<dyn Invoke>,
    workers: BTreeMap<String, Arc<dyn Tool>>,
    recursion_limit: usize,
}

impl RewooLoop {
    /// Create a loop with no workers
    pub fn new(invoker: Arc<dyn Invoke>) -> Self {
        Self {
            invoker,
            workers: BTreeMap::new(),
            recursion_limit: 50,
        }
    }

    /// Create a loop with the `WebSearch` and `LLM` workers
    pub fn from_provider(
        provider: Arc<dyn LLMProvider>,
        search: Arc<dyn Tool>,
        config: &PlanConfig,
    ) -> Self {
        let llm = LlmTool::new(provider.clone(), &config.model).with_temperature(config.temperature);
        Self::new(Arc::new(ModelInvoker::from_config(provider, config)))
            .with_worker(WEB_SEARCH, search)
            .with_worker(LLM, Arc::new(llm))
            .with_recursion_limit(config.recursion_limit)
    }

    /// Register `tool` under the worker name used in plan steps
    #[must_use]
    pub fn with_worker(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.workers.insert(name.into(), tool);
        self
    }

    /// Set the node execution ceiling
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Registered worker names
    pub fn workers(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    /// Solve `task`
    pub async fn run(&self, task: impl Into<String>) -> Result<RewooOutput> {
        self.run_with_limit(task, self.recursion_limit).await
    }

    /// Solve `task` with an explicit node execution ceiling
    pub async fn run_with_limit(&self, task: impl Into<String>, limit: usize) -> Result<RewooOutput> {
        let mut run = Run {
            owner: self,
            task: task.into(),
            node: Node::Plan,
            step: None,
            evidence: Vec::new(),
            answer: String::new(),
        };
        info!(task = %run.task, limit = limit, "Starting ReWOO run");

        let iterations = run_to_completion(&mut run, limit).await?;
        info!(
            iterations = iterations,
            evidence = run.evidence.len(),
            "ReWOO run finished"
        );
        Ok(RewooOutput {
            answer: run.answer,
            evidence: run.evidence,
            iterations,
        })
    }

    async fn ask(&self, prompt: String) -> Result<String> {
        let reply = self.invoker.invoke(&[Message::user(prompt)]).await?;
        Ok(reply.full_text())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Plan,
    Tool,
    Review,
    Solve,
    Done,
}

struct Run<'a> {
    owner: &'a RewooLoop,
    task: String,
    node: Node,
    step: Option<RewooStep>,
    evidence: Vec<Evidence>,
    answer: String,
}

impl Run<'_> {
    fn results(&self) -> Vec<String> {
        self.evidence.iter().map(|e| e.result.clone()).collect()
    }

    fn route(&mut self, reply: &str) {
        self.step = parse_step(reply);
        self.node = match &self.step {
            Some(step) => {
                debug!(step = %step, "Next step");
                Node::Tool
            }
            None => Node::Solve,
        };
    }

    async fn plan(&mut self) -> Result<()> {
        let reply = self.owner.ask(prompts::rewoo_plan(&self.task)?).await?;
        self.route(&reply);
        Ok(())
    }

    async fn tool(&mut self) -> Result<()> {
        let Some(step) = self.step.clone() else {
            self.node = Node::Solve;
            return Ok(());
        };
        let worker = self
            .owner
            .workers
            .get(&step.tool)
            .ok_or_else(|| PlanError::UnknownWorker(step.tool.clone()))?;

        let result = match worker.execute(json!({ "query": step.input })).await {
            Ok(Value::String(text)) => text,
            Ok(other) => other.to_string(),
            Err(e) => {
                warn!(worker = %step.tool, error = %e, "Worker failed");
                format!("Error: {e}")
            }
        };
        self.evidence.push(Evidence { step, result });
        self.node = Node::Review;
        Ok(())
    }

    async fn review(&mut self) -> Result<()> {
        let last = self
            .step
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let prompt = prompts::rewoo_review(&self.task, &last, &self.results())?;
        let reply = self.owner.ask(prompt).await?;
        self.route(&reply);
        Ok(())
    }

    async fn solve(&mut self) -> Result<()> {
        let prompt = prompts::rewoo_solve(&self.task, &self.results())?;
        self.answer = self.owner.ask(prompt).await?;
        self.node = Node::Done;
        Ok(())
    }
}

#[async_trait]
impl<'a> StateMachine for Run<'a> {
    fn node(&self) -> &'static str {
        match self.node {
            Node::Plan => "plan",
            Node::Tool => "tool",
            Node::Review => "review",
            Node::Solve => "solve",
            Node::Done => "end",
        }
    }

    fn is_done(&self) -> bool {
        self.node == Node::Done
    }

    async fn advance(&mut self) -> Result<()> {
        match self.node {
            Node::Plan => self.plan().await,
            Node::Tool => self.tool().await,
            Node::Review => self.review().await,
            Node::Solve => self.solve().await,
            Node::Done => Ok(()),
        }
    }
}
