//! Core abstractions for agent-rs
//!
//! This crate defines the [`Agent`] trait, the shared [`Context`] that loops
//! record their runs into, and the common error type.

pub mod agent;
pub mod context;
pub mod error;

pub use agent::Agent;
pub use context::Context;
pub use error::{Error, Result};
