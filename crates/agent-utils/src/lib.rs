//! Shared utilities for agent-rs
//!
//! This crate provides common functionality used across the agent-rs workspace:
//! tracing setup and the environment-driven configuration that the demos and
//! agents read their model endpoint from.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError};
pub use logging::{init_tracing, try_init_tracing};
