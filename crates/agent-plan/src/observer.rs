//! Progress callbacks for plan runs

use crate::store::StepResult;
use async_trait::async_trait;
use tracing::info;

/// Receives progress events while a plan run is in flight
///
/// All methods default to doing nothing.
#[async_trait]
pub trait PlanObserver: Send + Sync {
    /// The initial plan was produced
    async fn on_plan(&self, _steps: &[String]) {}

    /// A step finished
    async fn on_step(&self, _result: &StepResult) {}

    /// The replanner replaced the remaining plan
    async fn on_replan(&self, _steps: &[String]) {}

    /// The run produced its final response
    async fn on_response(&self, _response: &str) {}
}

/// Logs every event at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

#[async_trait]
impl PlanObserver for TracingObserver {
    async fn on_plan(&self, steps: &[String]) {
        info!(steps = ?steps, "Plan created");
    }

    async fn on_step(&self, result: &StepResult) {
        info!(
            step = %result.step,
            success = result.outcome.is_success(),
            result = %result.result_text(),
            "Step executed"
        );
    }

    async fn on_replan(&self, steps: &[String]) {
        info!(steps = ?steps, "Plan updated");
    }

    async fn on_response(&self, response: &str) {
        info!(response = %response, "Final response");
    }
}
