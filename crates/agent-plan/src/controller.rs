//! Plan-and-execute loop
//!
//! ```text
//! Planning -> Executing -> Replanning -> (Executing | Done)
//! ```
//!
//! The planner produces a step list, the executor runs the first remaining
//! step, and the replanner either replaces the remaining plan or answers the
//! user. Every node execution counts against the recursion limit.

use crate::config::PlanConfig;
use crate::error::{PlanError, Result};
use crate::extract::Payload;
use crate::machine::{StateMachine, run_to_completion};
use crate::observer::PlanObserver;
use crate::store::{PlanStore, StepResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Produces and revises plans
#[async_trait]
pub trait Planner: Send + Sync {
    /// Initial step list for `task`
    async fn plan(&self, task: &str) -> Result<Vec<String>>;

    /// New remaining steps or a final response, given the progress so far
    async fn replan(&self, store: &PlanStore) -> Result<Payload>;
}

/// Executes one plan step
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Execute `step`, the first entry of `plan`
    async fn execute(&self, plan: &[String], step: &str) -> agent_core::Result<String>;
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct PlanRun {
    /// Final response, verbatim from the replanner
    pub response: String,
    /// Final run state
    pub store: PlanStore,
    /// Node executions used
    pub iterations: usize,
}

/// Drives the plan-and-execute loop
#[derive(Clone)]
pub struct PlanExecuteController {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn StepExecutor>,
    observer: Option<Arc<dyn PlanObserver>>,
    recursion_limit: usize,
    call_timeout: Option<Duration>,
}

impl PlanExecuteController {
    /// Create a controller with the default limit of 50 node executions
    pub fn new(planner: Arc<dyn Planner>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            planner,
            executor,
            observer: None,
            recursion_limit: 50,
            call_timeout: None,
        }
    }

    /// Create a controller using the limits from `config`
    pub fn from_config(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn StepExecutor>,
        config: &PlanConfig,
    ) -> Self {
        let controller = Self::new(planner, executor).with_recursion_limit(config.recursion_limit);
        match config.call_timeout {
            Some(timeout) => controller.with_call_timeout(timeout),
            None => controller,
        }
    }

    /// Report progress to `observer`
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PlanObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the node execution ceiling
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Bound every planner call and step execution
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Run `task` to a final response
    pub async fn run(&self, task: impl Into<String>) -> Result<PlanRun> {
        self.run_with_limit(task, self.recursion_limit).await
    }

    /// Run `task` with an explicit node execution ceiling
    pub async fn run_with_limit(&self, task: impl Into<String>, limit: usize) -> Result<PlanRun> {
        let mut run = Run {
            controller: self,
            store: PlanStore::new(task),
            phase: Phase::Planning,
        };
        info!(task = %run.store.task(), limit = limit, "Starting plan-execute run");

        let iterations = run_to_completion(&mut run, limit).await?;
        let store = run.store;
        let response = store.response().unwrap_or_default().to_string();
        info!(
            iterations = iterations,
            steps = store.past_steps().len(),
            "Plan-execute run finished"
        );

        Ok(PlanRun {
            response,
            store,
            iterations,
        })
    }

    async fn bounded<T, F>(&self, stage: &'static str, call: F) -> Result<T>
    where
        T: Send,
        F: Future<Output = Result<T>> + Send,
    {
        match self.call_timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| PlanError::Timeout { stage, after })?,
            None => call.await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Planning,
    Executing,
    Replanning,
    Done,
}

struct Run<'a> {
    controller: &'a PlanExecuteController,
    store: PlanStore,
    phase: Phase,
}

impl Run<'_> {
    async fn plan(&mut self) -> Result<()> {
        let c = self.controller;
        let steps = c.bounded("planner", c.planner.plan(self.store.task())).await?;
        if steps.is_empty() {
            return Err(PlanError::EmptyPlan { stage: "planner" });
        }
        if let Some(observer) = &c.observer {
            observer.on_plan(&steps).await;
        }
        self.store.replace_plan(steps);
        self.phase = Phase::Executing;
        Ok(())
    }

    async fn execute(&mut self) -> Result<()> {
        let c = self.controller;
        let Some(step) = self.store.next_step().map(str::to_string) else {
            return Err(PlanError::EmptyPlan { stage: "executor" });
        };

        let call = c.executor.execute(self.store.plan(), &step);
        let outcome = match c.call_timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .unwrap_or_else(|_| Err(agent_core::Error::Timeout(after))),
            None => call.await,
        };

        let result = match outcome {
            Ok(text) => StepResult::success(step, text),
            Err(e) => {
                warn!(step = %step, error = %e, "Step failed");
                StepResult::failure(step, e.to_string())
            }
        };
        if let Some(observer) = &c.observer {
            observer.on_step(&result).await;
        }
        self.store.record(result);
        self.phase = Phase::Replanning;
        Ok(())
    }

    async fn replan(&mut self) -> Result<()> {
        let c = self.controller;
        match c.bounded("replanner", c.planner.replan(&self.store)).await? {
            Payload::Steps(steps) => {
                if steps.is_empty() {
                    return Err(PlanError::EmptyPlan { stage: "replanner" });
                }
                if let Some(observer) = &c.observer {
                    observer.on_replan(&steps).await;
                }
                self.store.replace_plan(steps);
                self.phase = Phase::Executing;
            }
            Payload::Response(response) => {
                if let Some(observer) = &c.observer {
                    observer.on_response(&response).await;
                }
                self.store.finish(response);
                self.phase = Phase::Done;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> StateMachine for Run<'a> {
    fn node(&self) -> &'static str {
        match self.phase {
            Phase::Planning => "planner",
            Phase::Executing => "agent",
            Phase::Replanning => "replan",
            Phase::Done => "end",
        }
    }

    fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    async fn advance(&mut self) -> Result<()> {
        match self.phase {
            Phase::Planning => self.plan().await,
            Phase::Executing => self.execute().await,
            Phase::Replanning => self.replan().await,
            Phase::Done => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::LlmPlanner;
    use crate::retry::Invoke;
    use crate::store::StepOutcome;
    use agent_llm::Message;
    use mockall::{Sequence, mock};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    mock! {
        pub Planner {}

        #[async_trait]
        impl Planner for Planner {
            async fn plan(&self, task: &str) -> Result<Vec<String>>;
            async fn replan(&self, store: &PlanStore) -> Result<Payload>;
        }
    }

    mock! {
        pub Executor {}

        #[async_trait]
        impl StepExecutor for Executor {
            async fn execute(&self, plan: &[String], step: &str) -> agent_core::Result<String>;
        }
    }

    fn steps(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    fn controller(planner: MockPlanner, executor: MockExecutor) -> PlanExecuteController {
        PlanExecuteController::new(Arc::new(planner), Arc::new(executor))
    }

    #[tokio::test]
    async fn test_capital_of_france() {
        let mut planner = MockPlanner::new();
        planner
            .expect_plan()
            .withf(|task| task == "what is the capital of France?")
            .times(1)
            .returning(|_| Ok(steps(&["Find the capital of France"])));
        planner
            .expect_replan()
            .withf(|store| store.past_steps().len() == 1)
            .times(1)
            .returning(|_| Ok(Payload::Response("Paris".to_string())));

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|plan, step| plan.len() == 1 && step == "Find the capital of France")
            .times(1)
            .returning(|_, _| Ok("Paris is the capital of France.".to_string()));

        let run = assert_ok!(
            controller(planner, executor)
                .run("what is the capital of France?")
                .await
        );
        assert_eq!(run.response, "Paris");
        assert_eq!(run.iterations, 3);
        assert_eq!(
            run.store.past_steps(),
            [StepResult::success(
                "Find the capital of France",
                "Paris is the capital of France."
            )]
        );
    }

    #[tokio::test]
    async fn test_only_first_step_is_executed() {
        let mut planner = MockPlanner::new();
        planner
            .expect_plan()
            .returning(|_| Ok(steps(&["A", "B", "C"])));
        planner
            .expect_replan()
            .times(1)
            .returning(|_| Ok(Payload::Response("done".to_string())));

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|plan, step| plan.len() == 3 && step == "A")
            .times(1)
            .returning(|_, _| Ok("a".to_string()));

        let run = assert_ok!(controller(planner, executor).run("t").await);
        assert_eq!(run.store.past_steps().len(), 1);
        assert_eq!(run.store.past_steps()[0].step, "A");
        assert_eq!(run.store.plan(), steps(&["A", "B", "C"]));
    }

    #[tokio::test]
    async fn test_replan_replaces_remaining_steps() {
        let mut seq = Sequence::new();
        let mut planner = MockPlanner::new();
        planner
            .expect_plan()
            .returning(|_| Ok(steps(&["A", "B", "C"])));
        planner
            .expect_replan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Payload::Steps(steps(&["D", "E"]))));
        planner
            .expect_replan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Payload::Response("X".to_string())));

        let executed = Arc::new(Mutex::new(Vec::new()));
        let seen = executed.clone();
        let mut executor = MockExecutor::new();
        executor.expect_execute().times(2).returning(move |_, step| {
            seen.lock().unwrap().push(step.to_string());
            Ok(format!("did {step}"))
        });

        let run = assert_ok!(controller(planner, executor).run("t").await);
        assert_eq!(*executed.lock().unwrap(), steps(&["A", "D"]));
        assert_eq!(run.store.plan(), steps(&["D", "E"]));
        assert_eq!(run.response, "X");
        assert_eq!(run.iterations, 5);
    }

    #[tokio::test]
    async fn test_response_is_returned_verbatim() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_| Ok(steps(&["A"])));
        planner
            .expect_replan()
            .returning(|_| Ok(Payload::Response("  exactly this\n".to_string())));

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .returning(|_, _| Ok("a".to_string()));

        let run = assert_ok!(controller(planner, executor).run("t").await);
        assert_eq!(run.response, "  exactly this\n");
        assert_eq!(run.store.response(), Some("  exactly this\n"));
        assert_eq!(run.store.past_steps().len(), 1);
    }

    #[tokio::test]
    async fn test_step_failure_is_recorded_not_raised() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_| Ok(steps(&["Search"])));
        planner
            .expect_replan()
            .withf(|store| {
                store.past_steps()[0].outcome
                    == StepOutcome::Failure(
                        "Agent processing failed: search unavailable".to_string(),
                    )
            })
            .returning(|_| Ok(Payload::Response("unknown".to_string())));

        let mut executor = MockExecutor::new();
        executor.expect_execute().times(1).returning(|_, _| {
            Err(agent_core::Error::ProcessingFailed(
                "search unavailable".to_string(),
            ))
        });

        let run = assert_ok!(controller(planner, executor).run("t").await);
        assert_eq!(run.response, "unknown");
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_| Ok(steps(&["A"])));
        planner
            .expect_replan()
            .returning(|_| Ok(Payload::Steps(steps(&["A"]))));

        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .returning(|_, _| Ok("again".to_string()));

        let err = assert_err!(
            controller(planner, executor)
                .with_recursion_limit(7)
                .run("t")
                .await
        );
        assert!(matches!(err, PlanError::IterationLimitExceeded { limit: 7 }));
    }

    #[tokio::test]
    async fn test_run_with_limit_overrides_default() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_| Ok(steps(&["A"])));
        planner
            .expect_replan()
            .returning(|_| Ok(Payload::Response("ok".to_string())));
        let mut executor = MockExecutor::new();
        executor.expect_execute().returning(|_, _| Ok(String::new()));

        let c = controller(planner, executor);
        assert_err!(c.run_with_limit("t", 2).await);
        assert_ok!(c.run_with_limit("t", 3).await);
    }

    #[tokio::test]
    async fn test_empty_initial_plan() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_| Ok(vec![]));
        planner.expect_replan().never();
        let mut executor = MockExecutor::new();
        executor.expect_execute().never();

        let err = assert_err!(controller(planner, executor).run("t").await);
        assert!(matches!(err, PlanError::EmptyPlan { stage: "planner" }));
    }

    /// Model replaying fixed replies
    struct Replies(Mutex<VecDeque<&'static str>>);

    impl Replies {
        fn new(replies: &[&'static str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(replies.iter().copied().collect())))
        }
    }

    #[async_trait]
    impl Invoke for Replies {
        async fn invoke(&self, _messages: &[Message]) -> agent_llm::Result<Message> {
            let reply = self.0.lock().unwrap().pop_front().unwrap_or("");
            Ok(Message::assistant(reply))
        }
    }

    #[tokio::test]
    async fn test_prose_plan_runs_as_single_step() {
        let model = Replies::new(&[
            "I would search for it.",
            "Let me think.",
            "Search for the capital of France",
            "{\"response\": \"Paris\"}",
        ]);
        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .withf(|plan, step| plan.len() == 1 && step == "Search for the capital of France")
            .times(1)
            .returning(|_, _| Ok("Paris".to_string()));

        let c = PlanExecuteController::new(
            Arc::new(LlmPlanner::new(model, 3)),
            Arc::new(executor),
        );
        let run = assert_ok!(c.run("what is the capital of France?").await);
        assert_eq!(run.response, "Paris");
        assert_eq!(run.iterations, 3);
    }

    #[tokio::test]
    async fn test_prose_replan_becomes_response() {
        let model = Replies::new(&[
            "{\"steps\": [\"Find the capital of France\"]}",
            "The capital of France is Paris.",
            "The capital of France is Paris.",
            "The capital of France is Paris.",
        ]);
        let mut executor = MockExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok("Paris".to_string()));

        let c = PlanExecuteController::new(
            Arc::new(LlmPlanner::new(model, 3)),
            Arc::new(executor),
        );
        let run = assert_ok!(c.run("what is the capital of France?").await);
        assert_eq!(run.response, "The capital of France is Paris.");
        assert_eq!(run.store.response(), Some("The capital of France is Paris."));
        assert_eq!(run.store.past_steps().len(), 1);
    }

    struct SlowPlanner;

    #[async_trait]
    impl Planner for SlowPlanner {
        async fn plan(&self, _task: &str) -> Result<Vec<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(steps(&["A"]))
        }

        async fn replan(&self, _store: &PlanStore) -> Result<Payload> {
            Ok(Payload::Response("unreachable".to_string()))
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl StepExecutor for SlowExecutor {
        async fn execute(&self, _plan: &[String], _step: &str) -> agent_core::Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_planner_timeout_aborts() {
        let c = PlanExecuteController::new(Arc::new(SlowPlanner), Arc::new(SlowExecutor))
            .with_call_timeout(Duration::from_secs(5));
        let err = assert_err!(c.run("t").await);
        assert!(matches!(err, PlanError::Timeout { stage: "planner", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_becomes_failure() {
        let mut planner = MockPlanner::new();
        planner.expect_plan().returning(|_| Ok(steps(&["A"])));
        planner
            .expect_replan()
            .returning(|store| Ok(Payload::Response(store.past_steps()[0].result_text())));

        let c = PlanExecuteController::new(Arc::new(planner), Arc::new(SlowExecutor))
            .with_call_timeout(Duration::from_secs(5));
        let run = assert_ok!(c.run("t").await);
        assert_eq!(run.response, "Error: Timed out after 5s");
    }
}
