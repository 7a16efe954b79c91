//! Execution context for agents
//!
//! The `Context` carries per-call settings into an agent and the run record
//! back out of it. Values are stored as JSON so that agents from different
//! crates can share it without knowing each other's types.

use serde::{Serialize, de::DeserializeOwned};
use std::collections::HashMap;

/// Well-known context keys
pub mod keys {
    /// Session ID for tracking
    pub const SESSION_ID: &str = "session_id";
    /// Per-call override of the loop iteration ceiling (integer)
    pub const RECURSION_LIMIT: &str = "recursion_limit";
    /// Executed plan steps with their outcomes, written by plan agents
    pub const PAST_STEPS: &str = "past_steps";
    /// The plan that was still pending when the run ended
    pub const REMAINING_PLAN: &str = "remaining_plan";
    /// Intermediate evidence gathered by evidence-chaining agents
    pub const EVIDENCE: &str = "evidence";
    /// Number of revisions performed by a reflection agent
    pub const REVISIONS: &str = "revisions";
}

/// Context passed to agents during execution
///
/// # Example
///
/// ```
/// use agent_core::Context;
///
/// let ctx = Context::new()
///     .with_session_id("session-123")
///     .with_recursion_limit(20);
///
/// assert_eq!(ctx.session_id(), Some("session-123"));
/// assert_eq!(ctx.recursion_limit(), Some(20));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Context {
    data: HashMap<String, serde_json::Value>,
}

impl Context {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session ID
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.insert(keys::SESSION_ID, serde_json::json!(session_id.into()));
        self
    }

    /// Override the iteration ceiling for runs using this context
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.insert(keys::RECURSION_LIMIT, serde_json::json!(limit));
        self
    }

    /// Get the session ID
    pub fn session_id(&self) -> Option<&str> {
        self.get(keys::SESSION_ID).and_then(|v| v.as_str())
    }

    /// Get the iteration ceiling override, if any
    pub fn recursion_limit(&self) -> Option<usize> {
        self.get(keys::RECURSION_LIMIT)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Insert a value into the context
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.data.insert(key.into(), value);
    }

    /// Get a value from the context
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.get(key)
    }

    /// Insert a typed value into the context
    pub fn insert_typed<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> crate::Result<()> {
        let json_value = serde_json::to_value(value).map_err(|e| {
            crate::Error::ProcessingFailed(format!("Failed to serialize context value: {e}"))
        })?;
        self.data.insert(key.into(), json_value);
        Ok(())
    }

    /// Get a typed value from the context
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> crate::Result<Option<T>> {
        self.data
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    crate::Error::ProcessingFailed(format!(
                        "Failed to deserialize context value: {e}"
                    ))
                })
            })
            .transpose()
    }

    /// Check if a key exists in the context
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Remove a value from the context
    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.data.remove(key)
    }

    /// Get the number of entries in the context
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the context is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
