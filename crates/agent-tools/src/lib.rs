//! Tool management and execution framework
//!
//! This crate provides the [`Tool`] trait, a [`ToolRegistry`] and the
//! built-in web search tool used by the research agents.

pub mod registry;
pub mod search;
pub mod tool;

pub use registry::ToolRegistry;
pub use search::{SearchError, SerperSearch};
pub use tool::Tool;
