//! Reflexion-style research loop
//!
//! ```text
//! draft -> execute_tools -> revise -> (execute_tools | END)
//! ```
//!
//! The actor answers through a forced function call that carries the answer,
//! a self-critique and follow-up search queries. The queries are run, their
//! results are fed back as tool results, and the actor revises. The loop ends
//! once the trailing run of assistant and tool turns exceeds
//! `max_iterations`.

use crate::config::PlanConfig;
use crate::error::Result;
use crate::machine::{StateMachine, run_to_completion};
use crate::prompts;
use crate::retry::{Invoke, ModelInvoker, Responded, RetryResponder, ToolCallValidator};
use agent_llm::tools::schema;
use agent_llm::{LLMError, LLMProvider, Message, ToolDefinition};
use agent_tools::Tool;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Self-critique of an answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    /// What is missing
    pub missing: String,
    /// What is superfluous
    pub superfluous: String,
}

/// First answer with critique and search queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerQuestion {
    pub answer: String,
    pub reflection: Critique,
    pub search_queries: Vec<String>,
}

/// Revised answer, citing its references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviseAnswer {
    pub answer: String,
    pub reflection: Critique,
    pub search_queries: Vec<String>,
    pub references: Vec<String>,
}

fn answer_properties() -> serde_json::Map<String, Value> {
    let mut reflection = schema::object(
        json!({
            "missing": schema::string("Critique of what is missing."),
            "superfluous": schema::string("Critique of what is superfluous"),
        }),
        &["missing", "superfluous"],
    );
    reflection["description"] = json!("Your reflection on the initial answer.");

    let mut props = serde_json::Map::new();
    props.insert(
        "answer".to_string(),
        schema::string("~250 word detailed answer to the question."),
    );
    props.insert("reflection".to_string(), reflection);
    props.insert(
        "search_queries".to_string(),
        schema::string_array(
            "1-3 search queries for researching improvements to address the critique of your current answer.",
        ),
    );
    props
}

impl AnswerQuestion {
    pub const NAME: &'static str = "AnswerQuestion";

    /// Function the drafting actor must call
    pub fn tool_definition() -> ToolDefinition {
        ToolDefinition::new(
            Self::NAME,
            "Answer the question. Provide an answer, reflection, and then follow up with search queries to improve the answer.",
            schema::object(
                Value::Object(answer_properties()),
                &["answer", "reflection", "search_queries"],
            ),
        )
    }
}

impl ReviseAnswer {
    pub const NAME: &'static str = "ReviseAnswer";

    /// Function the revising actor must call
    pub fn tool_definition() -> ToolDefinition {
        let mut props = answer_properties();
        props.insert(
            "references".to_string(),
            schema::string_array("Citations motivating your updated answer."),
        );
        ToolDefinition::new(
            Self::NAME,
            "Revise your original answer to your question. Provide an answer, reflection, cite your reflection with references, and finally add search queries to improve the answer.",
            schema::object(
                Value::Object(props),
                &["answer", "reflection", "search_queries", "references"],
            ),
        )
    }
}

/// Latest valid answer of a reflection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Answer {
    Draft(AnswerQuestion),
    Revision(ReviseAnswer),
}

impl Answer {
    pub fn text(&self) -> &str {
        match self {
            Self::Draft(a) => &a.answer,
            Self::Revision(r) => &r.answer,
        }
    }

    pub fn critique(&self) -> &Critique {
        match self {
            Self::Draft(a) => &a.reflection,
            Self::Revision(r) => &r.reflection,
        }
    }

    /// References cited by a revision; drafts cite none
    pub fn references(&self) -> &[String] {
        match self {
            Self::Draft(_) => &[],
            Self::Revision(r) => &r.references,
        }
    }
}

/// Wraps the conversation in the actor prompt before every call
///
/// The system prompt carries the current time, so it is rendered per call.
pub struct ActorInvoker {
    model: ModelInvoker,
    first_instruction: String,
    function_name: String,
}

impl ActorInvoker {
    /// Actor answering with `tool`, following `first_instruction`
    pub fn new(model: ModelInvoker, first_instruction: impl Into<String>, tool: ToolDefinition) -> Self {
        Self {
            function_name: tool.name.clone(),
            model: model.with_output_tool(tool),
            first_instruction: first_instruction.into(),
        }
    }

    /// The drafting actor
    pub fn drafter(model: ModelInvoker) -> Self {
        Self::new(
            model,
            prompts::INITIAL_ANSWER_INSTRUCTION,
            AnswerQuestion::tool_definition(),
        )
    }

    /// The revising actor
    pub fn revisor(model: ModelInvoker) -> Self {
        Self::new(
            model,
            prompts::REVISE_INSTRUCTIONS,
            ReviseAnswer::tool_definition(),
        )
    }
}

#[async_trait]
impl Invoke for ActorInvoker {
    async fn invoke(&self, messages: &[Message]) -> agent_llm::Result<Message> {
        let system = prompts::actor_system(&self.first_instruction, Utc::now())
            .map_err(|e| LLMError::InvalidRequest(e.to_string()))?;
        let reminder = prompts::actor_reminder(&self.function_name)
            .map_err(|e| LLMError::InvalidRequest(e.to_string()))?;

        let mut wrapped = Vec::with_capacity(messages.len() + 2);
        wrapped.push(Message::system(system));
        wrapped.extend_from_slice(messages);
        wrapped.push(Message::user(reminder));
        self.model.invoke(&wrapped).await
    }
}

/// Result of a reflection run
#[derive(Debug, Clone)]
pub struct ReflectionOutput {
    /// Latest answer that passed validation
    pub answer: Option<Answer>,
    /// Full conversation, starting with the question
    pub messages: Vec<Message>,
    /// Revise node executions
    pub revisions: usize,
    /// Node executions used
    pub iterations: usize,
}

impl ReflectionOutput {
    /// Best available answer text
    ///
    /// Falls back to the text of the last message when no attempt validated.
    pub fn final_text(&self) -> String {
        match &self.answer {
            Some(answer) => answer.text().to_string(),
            None => self
                .messages
                .last()
                .map(Message::full_text)
                .unwrap_or_default(),
        }
    }
}

/// Draft, research and revise until the turn ceiling is exceeded
pub struct ReflectionLoop {
    drafter: RetryResponder<ToolCallValidator<AnswerQuestion>>,
    revisor: RetryResponder<ToolCallValidator<ReviseAnswer>>,
    search: Arc<dyn Tool>,
    max_iterations: usize,
    recursion_limit: usize,
}

impl ReflectionLoop {
    /// Create a loop from a drafting and a revising actor
    pub fn new(drafter: Arc<dyn Invoke>, revisor: Arc<dyn Invoke>, search: Arc<dyn Tool>) -> Self {
        Self::with_attempts(drafter, revisor, search, 3)
    }

    fn with_attempts(
        drafter: Arc<dyn Invoke>,
        revisor: Arc<dyn Invoke>,
        search: Arc<dyn Tool>,
        max_attempts: usize,
    ) -> Self {
        Self {
            drafter: RetryResponder::new(
                drafter,
                ToolCallValidator::new(AnswerQuestion::tool_definition()),
                max_attempts,
            ),
            revisor: RetryResponder::new(
                revisor,
                ToolCallValidator::new(ReviseAnswer::tool_definition()),
                max_attempts,
            ),
            search,
            max_iterations: 5,
            recursion_limit: 50,
        }
    }

    /// Create a loop calling `provider` with the settings in `config`
    pub fn from_provider(
        provider: Arc<dyn LLMProvider>,
        search: Arc<dyn Tool>,
        config: &PlanConfig,
    ) -> Self {
        let model = ModelInvoker::from_config(provider, config);
        Self::with_attempts(
            Arc::new(ActorInvoker::drafter(model.clone())),
            Arc::new(ActorInvoker::revisor(model)),
            search,
            config.max_attempts,
        )
        .with_max_iterations(config.max_reflection_iterations)
        .with_recursion_limit(config.recursion_limit)
    }

    /// Set the trailing turn ceiling
    #[must_use]
    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
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

    /// Answer `question`
    pub async fn run(&self, question: impl Into<String>) -> Result<ReflectionOutput> {
        self.run_with_limit(question, self.recursion_limit).await
    }

    /// Answer `question` with an explicit node execution ceiling
    pub async fn run_with_limit(
        &self,
        question: impl Into<String>,
        limit: usize,
    ) -> Result<ReflectionOutput> {
        let mut run = Run {
            owner: self,
            messages: vec![Message::user(question)],
            node: Node::Draft,
            answer: None,
            revisions: 0,
        };
        info!(limit = limit, max_iterations = self.max_iterations, "Starting reflection run");

        let iterations = run_to_completion(&mut run, limit).await?;
        info!(iterations = iterations, revisions = run.revisions, "Reflection run finished");

        Ok(ReflectionOutput {
            answer: run.answer,
            messages: run.messages,
            revisions: run.revisions,
            iterations,
        })
    }

    async fn search_all(&self, queries: &[String]) -> Vec<String> {
        let searches = queries
            .iter()
            .map(|query| self.search.execute(json!({ "query": query })));
        join_all(searches)
            .await
            .into_iter()
            .map(|result| match result {
                Ok(Value::String(text)) => text,
                Ok(other) => other.to_string(),
                Err(e) => {
                    warn!(error = %e, "Search failed");
                    format!("Error: {e}")
                }
            })
            .collect()
    }
}

/// Number of assistant and tool turns at the end of `messages`
pub fn trailing_turns(messages: &[Message]) -> usize {
    messages
        .iter()
        .rev()
        .take_while(|m| m.is_model_or_tool_turn())
        .count()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Draft,
    ExecuteTools,
    Revise,
    Done,
}

struct Run<'a> {
    owner: &'a ReflectionLoop,
    messages: Vec<Message>,
    node: Node,
    answer: Option<Answer>,
    revisions: usize,
}

#[derive(Deserialize)]
struct Queries {
    search_queries: Vec<String>,
}

impl Run<'_> {
    async fn draft(&mut self) -> Result<()> {
        let responded = self.owner.drafter.respond(&self.messages).await?;
        if let Responded::Valid { value, .. } = &responded {
            self.answer = Some(Answer::Draft(value.clone()));
        }
        self.messages.push(responded.into_message());
        self.node = Node::ExecuteTools;
        Ok(())
    }

    async fn execute_tools(&mut self) -> Result<()> {
        let calls: Vec<(String, String, Value)> = self
            .messages
            .last()
            .map(|m| {
                m.tool_calls()
                    .into_iter()
                    .map(|c| (c.id.to_string(), c.name.to_string(), c.input.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (id, name, input) in calls {
            if name != AnswerQuestion::NAME && name != ReviseAnswer::NAME {
                warn!(tool = %name, "Ignoring call to unknown tool");
                self.messages.push(Message::tool_error(
                    id,
                    format!(
                        "Error: {name} is not a valid tool, try one of [{}, {}].",
                        AnswerQuestion::NAME,
                        ReviseAnswer::NAME
                    ),
                ));
                continue;
            }
            let queries = match serde_json::from_value::<Queries>(input) {
                Ok(q) => q.search_queries,
                Err(e) => {
                    self.messages
                        .push(Message::tool_error(id, format!("Error: {e}")));
                    continue;
                }
            };
            debug!(tool = %name, queries = ?queries, "Running search queries");
            let results = self.owner.search_all(&queries).await;
            let content = serde_json::to_string(&results).map_err(LLMError::from)?;
            self.messages.push(Message::tool_result(id, content));
        }

        self.node = Node::Revise;
        Ok(())
    }

    async fn revise(&mut self) -> Result<()> {
        let responded = self.owner.revisor.respond(&self.messages).await?;
        if let Responded::Valid { value, .. } = &responded {
            self.answer = Some(Answer::Revision(value.clone()));
        }
        self.messages.push(responded.into_message());
        self.revisions += 1;

        let turns = trailing_turns(&self.messages);
        self.node = if turns > self.owner.max_iterations {
            Node::Done
        } else {
            Node::ExecuteTools
        };
        debug!(turns = turns, revisions = self.revisions, "Revision recorded");
        Ok(())
    }
}

#[async_trait]
impl<'a> StateMachine for Run<'a> {
    fn node(&self) -> &'static str {
        match self.node {
            Node::Draft => "draft",
            Node::ExecuteTools => "execute_tools",
            Node::Revise => "revise",
            Node::Done => "end",
        }
    }

    fn is_done(&self) -> bool {
        self.node == Node::Done
    }

    async fn advance(&mut self) -> Result<()> {
        match self.node {
            Node::Draft => self.draft().await,
            Node::ExecuteTools => self.execute_tools().await,
            Node::Revise => self.revise().await,
            Node::Done => Ok(()),
        }
    }
}
