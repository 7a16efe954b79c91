//! Error types for the planning loops

use std::time::Duration;
use thiserror::Error;

/// Result type for planning operations
pub type Result<T> = std::result::Result<T, PlanError>;

/// Model output contained no parseable structured payload
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// Nothing left after trimming
    #[error("model output is empty")]
    Empty,

    /// The candidate is not valid JSON
    #[error("could not parse structured payload {candidate:?}: {reason}")]
    Malformed { candidate: String, reason: String },
}

/// A response did not match the expected schema
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Text could not be parsed at all
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    /// Parsed, but the shape is wrong
    #[error("payload does not match schema: {0}")]
    Schema(String),

    /// The model answered without calling the required tool
    #[error("expected a call to the {expected} tool")]
    MissingToolCall { expected: String },
}

/// Errors that abort a planning run
#[derive(Error, Debug)]
pub enum PlanError {
    /// Model transport failure
    #[error("LLM error: {0}")]
    Llm(#[from] agent_llm::LLMError),

    /// Every retry failed and the last reply was blank
    #[error("{stage} produced no usable output after {attempts} attempts ({error}); last output: {raw:?}")]
    UnusableOutput {
        stage: &'static str,
        attempts: usize,
        error: ValidationError,
        raw: String,
    },

    /// The loop executed more nodes than allowed
    #[error("iteration limit of {limit} exceeded without a final response")]
    IterationLimitExceeded { limit: usize },

    /// A planner or model call did not return in time
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// A plan or replan produced no steps
    #[error("{stage} produced an empty plan")]
    EmptyPlan { stage: &'static str },

    /// A ReWOO step named a worker that is not registered
    #[error("unknown worker '{0}'")]
    UnknownWorker(String),

    /// Prompt template failed to render
    #[error("failed to render prompt '{name}': {detail}")]
    Prompt { name: &'static str, detail: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<agent_utils::ConfigError> for PlanError {
    fn from(err: agent_utils::ConfigError) -> Self {
        PlanError::Config(err.to_string())
    }
}

impl From<PlanError> for agent_core::Error {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::IterationLimitExceeded { limit } => agent_core::Error::IterationLimit { limit },
            PlanError::Timeout { after, .. } => agent_core::Error::Timeout(after),
            PlanError::Config(msg) => agent_core::Error::InitializationFailed(msg),
            other => agent_core::Error::ProcessingFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_into_core_error() {
        let err: agent_core::Error = PlanError::IterationLimitExceeded { limit: 50 }.into();
        assert!(matches!(err, agent_core::Error::IterationLimit { limit: 50 }));

        let err: agent_core::Error = PlanError::Timeout {
            stage: "replan",
            after: Duration::from_secs(3),
        }
        .into();
        assert!(matches!(err, agent_core::Error::Timeout(d) if d == Duration::from_secs(3)));

        let err: agent_core::Error = PlanError::UnknownWorker("Calculator".to_string()).into();
        assert!(err.to_string().contains("Calculator"));
    }

    #[test]
    fn test_extraction_error_is_a_validation_error() {
        let err: ValidationError = ExtractionError::Empty.into();
        assert_eq!(err.to_string(), "model output is empty");
    }
}
