//! Run state shared by the plan-execute nodes

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a single step ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum StepOutcome {
    /// The executor's answer
    Success(String),
    /// Why the executor failed
    Failure(String),
}

impl StepOutcome {
    /// Whether the step succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// An executed step and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub outcome: StepOutcome,
}

impl StepResult {
    /// Record a successful step
    pub fn success(step: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Success(text.into()),
        }
    }

    /// Record a failed step
    pub fn failure(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            outcome: StepOutcome::Failure(reason.into()),
        }
    }

    /// Outcome as the replanner reads it
    pub fn result_text(&self) -> String {
        match &self.outcome {
            StepOutcome::Success(text) => text.clone(),
            StepOutcome::Failure(reason) => format!("Error: {reason}"),
        }
    }
}

impl fmt::Display for StepResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.result_text())
    }
}

/// State of one plan-execute run
///
/// Owned by a single run. `past_steps` only grows; `response` is set at most
/// once and ends the run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStore {
    task: String,
    plan: Vec<String>,
    past_steps: Vec<StepResult>,
    response: Option<String>,
}

impl PlanStore {
    /// Start a run for `task`
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Self::default()
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    /// Remaining steps, in order
    pub fn plan(&self) -> &[String] {
        &self.plan
    }

    pub fn past_steps(&self) -> &[StepResult] {
        &self.past_steps
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Replace the remaining plan wholesale
    pub fn replace_plan(&mut self, steps: Vec<String>) {
        self.plan = steps;
    }

    /// The step to execute next
    pub fn next_step(&self) -> Option<&str> {
        self.plan.first().map(String::as_str)
    }

    /// Append an executed step
    pub fn record(&mut self, result: StepResult) {
        self.past_steps.push(result);
    }

    /// Set the final response
    ///
    /// Returns `false` and leaves the store unchanged if a response is
    /// already set.
    pub fn finish(&mut self, response: impl Into<String>) -> bool {
        if self.response.is_some() {
            return false;
        }
        self.response = Some(response.into());
        true
    }

    pub fn is_done(&self) -> bool {
        self.response.is_some()
    }

    /// Remaining plan as a numbered list, one step per line
    pub fn numbered_plan(&self) -> String {
        numbered(&self.plan)
    }
}

/// Render steps as `1. a\n2. b`
pub fn numbered(steps: &[String]) -> String {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {step}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_is_empty() {
        let store = PlanStore::new("what is the capital of France?");
        assert_eq!(store.task(), "what is the capital of France?");
        assert!(store.plan().is_empty());
        assert!(store.past_steps().is_empty());
        assert!(store.next_step().is_none());
        assert!(!store.is_done());
    }

    #[test]
    fn test_replace_plan_is_wholesale() {
        let mut store = PlanStore::new("t");
        store.replace_plan(vec!["A".into(), "B".into(), "C".into()]);
        assert_eq!(store.next_step(), Some("A"));

        store.replace_plan(vec!["D".into(), "E".into()]);
        assert_eq!(store.plan(), ["D".to_string(), "E".to_string()]);
        assert_eq!(store.numbered_plan(), "1. D\n2. E");
    }

    #[test]
    fn test_finish_does_not_overwrite() {
        let mut store = PlanStore::new("t");
        store.record(StepResult::success("A", "a"));
        assert!(store.finish("X"));
        assert!(!store.finish("Y"));
        assert_eq!(store.response(), Some("X"));
        assert_eq!(store.past_steps().len(), 1);
    }

    #[test]
    fn test_failure_reads_narratively() {
        let ok = StepResult::success("Look up", "Paris");
        let failed = StepResult::failure("Search", "connection refused");
        assert_eq!(ok.result_text(), "Paris");
        assert_eq!(failed.result_text(), "Error: connection refused");
        assert_eq!(failed.to_string(), "Search: Error: connection refused");
        assert!(!failed.outcome.is_success());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(StepResult::failure("s", "boom")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"step": "s", "outcome": {"status": "failure", "text": "boom"}})
        );
    }
}
