//! [`Agent`] implementations for the planning loops
//!
//! Each agent answers with the loop's final text and leaves the run record in
//! the [`Context`]. A `recursion_limit` in the context overrides the loop's
//! own ceiling for that call.

use crate::controller::PlanExecuteController;
use crate::reflection::ReflectionLoop;
use crate::rewoo::RewooLoop;
use agent_core::context::keys;
use agent_core::{Agent, Context, Result};
use async_trait::async_trait;

/// Plan-and-execute agent
///
/// Writes [`keys::PAST_STEPS`] and [`keys::REMAINING_PLAN`].
pub struct PlanExecuteAgent {
    controller: PlanExecuteController,
    name: String,
}

impl PlanExecuteAgent {
    pub fn new(controller: PlanExecuteController, name: impl Into<String>) -> Self {
        Self {
            controller,
            name: name.into(),
        }
    }

    pub fn controller(&self) -> &PlanExecuteController {
        &self.controller
    }
}

#[async_trait]
impl Agent for PlanExecuteAgent {
    async fn process(&self, input: String, context: &mut Context) -> Result<String> {
        let limit = context
            .recursion_limit()
            .unwrap_or(self.controller.recursion_limit());
        let run = self.controller.run_with_limit(input, limit).await?;
        context.insert_typed(keys::PAST_STEPS, &run.store.past_steps())?;
        context.insert_typed(keys::REMAINING_PLAN, &run.store.plan())?;
        Ok(run.response)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Reflection agent; writes [`keys::REVISIONS`]
pub struct ReflectionAgent {
    inner: ReflectionLoop,
    name: String,
}

impl ReflectionAgent {
    pub fn new(inner: ReflectionLoop, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Agent for ReflectionAgent {
    async fn process(&self, input: String, context: &mut Context) -> Result<String> {
        let limit = context
            .recursion_limit()
            .unwrap_or(self.inner.recursion_limit());
        let out = self.inner.run_with_limit(input, limit).await?;
        context.insert_typed(keys::REVISIONS, &out.revisions)?;
        Ok(out.final_text())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// ReWOO agent; writes [`keys::EVIDENCE`]
pub struct RewooAgent {
    inner: RewooLoop,
    name: String,
}

impl RewooAgent {
    pub fn new(inner: RewooLoop, name: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Agent for RewooAgent {
    async fn process(&self, input: String, context: &mut Context) -> Result<String> {
        let limit = context
            .recursion_limit()
            .unwrap_or(self.inner.recursion_limit());
        let out = self.inner.run_with_limit(input, limit).await?;
        context.insert_typed(keys::EVIDENCE, &out.evidence)?;
        Ok(out.answer)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
