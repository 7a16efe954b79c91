//! Configuration for the planning loops

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by the plan-execute, reflection and ReWOO loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Model identifier sent with every completion request
    pub model: String,

    /// Sampling temperature for planning calls
    pub temperature: f32,

    /// Maximum tokens per completion
    pub max_tokens: usize,

    /// Attempts per validated call, including the first
    pub max_attempts: usize,

    /// Maximum node executions per run
    pub recursion_limit: usize,

    /// Reflection stops once this many trailing assistant/tool turns are exceeded
    pub max_reflection_iterations: usize,

    /// Per-call deadline for planner calls and step executions
    pub call_timeout: Option<Duration>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1".to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            max_attempts: 3,
            recursion_limit: 50,
            max_reflection_iterations: 5,
            call_timeout: None,
        }
    }
}

impl PlanConfig {
    /// Create a new configuration builder
    pub fn builder() -> PlanConfigBuilder {
        PlanConfigBuilder::default()
    }

    /// Take model, temperature and recursion limit from the application config
    pub fn from_app_config(config: &agent_utils::Config) -> Self {
        Self {
            model: config.model_name.clone(),
            temperature: config.temperature,
            recursion_limit: config.recursion_limit,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(PlanError::Config("model must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(PlanError::Config(
                "max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.recursion_limit == 0 {
            return Err(PlanError::Config(
                "recursion_limit must be greater than 0".to_string(),
            ));
        }
        if self.call_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PlanError::Config(
                "call_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PlanConfig`]
#[derive(Debug, Default)]
pub struct PlanConfigBuilder {
    config: PlanConfig,
}

impl PlanConfigBuilder {
    /// Set the model
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    /// Set attempts per validated call
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Set the node execution ceiling
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.config.recursion_limit = limit;
        self
    }

    /// Set the reflection turn ceiling
    pub fn max_reflection_iterations(mut self, n: usize) -> Self {
        self.config.max_reflection_iterations = n;
        self
    }

    /// Set the per-call deadline
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = Some(timeout);
        self
    }

    /// Build and validate
    pub fn build(self) -> Result<PlanConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlanConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.recursion_limit, 50);
        assert_eq!(config.max_reflection_iterations, 5);
        assert!(config.call_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_validates() {
        assert!(PlanConfig::builder().max_attempts(0).build().is_err());
        assert!(PlanConfig::builder().recursion_limit(0).build().is_err());
        assert!(PlanConfig::builder().model(" ").build().is_err());
        assert!(
            PlanConfig::builder()
                .call_timeout(Duration::ZERO)
                .build()
                .is_err()
        );

        let config = PlanConfig::builder()
            .model("mistral")
            .call_timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(config.model, "mistral");
        assert_eq!(config.call_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_app_config() {
        let app = agent_utils::Config {
            model_name: "qwen2.5".to_string(),
            recursion_limit: 12,
            temperature: 0.2,
            ..agent_utils::Config::default()
        };
        let config = PlanConfig::from_app_config(&app);
        assert_eq!(config.model, "qwen2.5");
        assert_eq!(config.recursion_limit, 12);
        assert_eq!(config.max_attempts, 3);
    }
}
