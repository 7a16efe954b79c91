//! Configuration management utilities
//!
//! Agents talk to an OpenAI-compatible chat endpoint (Ollama, vLLM, LM Studio
//! or OpenAI itself) and optionally to the Serper search API. Both are
//! configured through environment variables, optionally seeded from a `.env`
//! file in the working directory.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable names read by [`Config::from_env`]
pub mod vars {
    /// Base URL of the OpenAI-compatible API, including the `/v1` suffix
    pub const BASE_URL: &str = "BASE_URL";
    /// Model identifier sent with every completion request
    pub const MODEL_NAME: &str = "MODEL_NAME";
    /// Bearer token for the chat endpoint (optional for local servers)
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    /// Serper.dev API key used by the web search tool
    pub const SERPER_API_KEY: &str = "SERPER_API_KEY";
    /// Sampling temperature
    pub const TEMPERATURE: &str = "TEMPERATURE";
    /// Maximum number of loop node executions per run
    pub const RECURSION_LIMIT: &str = "RECURSION_LIMIT";
}

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "llama3.1";
const DEFAULT_RECURSION_LIMIT: usize = 50;

/// Errors raised while reading configuration
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// A value parsed but is out of range
    #[error("Configuration error: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat completion API
    pub base_url: String,
    /// Model name
    pub model_name: String,
    /// API key for the chat endpoint, if it needs one
    pub api_key: Option<String>,
    /// Serper API key, if web search is available
    pub serper_api_key: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Loop iteration ceiling
    pub recursion_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model_name: DEFAULT_MODEL.to_string(),
            api_key: None,
            serper_api_key: None,
            temperature: 0.0,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenv::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    ///
    /// Unset or empty variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let temperature = match get(vars::TEMPERATURE) {
            Some(raw) => raw.trim().parse::<f32>().map_err(|e| ConfigError::InvalidValue {
                name: vars::TEMPERATURE,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.temperature,
        };

        let recursion_limit = match get(vars::RECURSION_LIMIT) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|e| ConfigError::InvalidValue {
                name: vars::RECURSION_LIMIT,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => defaults.recursion_limit,
        };

        let config = Self {
            base_url: get(vars::BASE_URL).unwrap_or(defaults.base_url),
            model_name: get(vars::MODEL_NAME).unwrap_or(defaults.model_name),
            api_key: get(vars::OPENAI_API_KEY),
            serper_api_key: get(vars::SERPER_API_KEY),
            temperature,
            recursion_limit,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Invalid(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if self.recursion_limit == 0 {
            return Err(ConfigError::Invalid(
                "recursion_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
