//! Collaborator contracts consumed by the scheduler.
//!
//! The scheduler never injects faults or manages incidents itself; it talks
//! to these seams. Production wiring passes real clients, tests pass mocks.

use std::time::Duration;

use havoc_core::{ActiveExecution, ActiveIncident, ExecutionResult, ExperimentSpec};
use havoc_core::{IncidentId, IncidentSpec};

/// Transport-level failure reaching a collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("collaborator call timed out after {0:?}")]
    Timeout(Duration),
}

/// The execution engine that actually injects faults and evaluates
/// steady-state hypotheses.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run the experiment to completion and report the outcome.
    async fn execute_experiment(
        &self,
        spec: &ExperimentSpec,
    ) -> Result<ExecutionResult, CollaboratorError>;

    /// Currently active runs, used to enforce per-experiment concurrency
    /// ceilings.
    async fn active_executions(&self) -> Result<Vec<ActiveExecution>, CollaboratorError>;
}

/// Narrow incident-tracking contract: open incidents on escalation, read
/// active ones during admission control.
#[async_trait::async_trait]
pub trait IncidentManager: Send + Sync {
    async fn create_incident(&self, spec: IncidentSpec) -> Result<IncidentId, CollaboratorError>;

    async fn active_incidents(&self) -> Result<Vec<ActiveIncident>, CollaboratorError>;
}

/// Fire-and-forget telemetry sink.
///
/// Implementations must swallow their own delivery failures; the scheduler
/// never checks the outcome.
pub trait Telemetry: Send + Sync {
    fn track(&self, event: &str, properties: serde_json::Value);
}

/// Telemetry sink that discards everything.
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track(&self, _event: &str, _properties: serde_json::Value) {}
}

/// Pluggable system-health gate evaluated before each dispatch.
#[async_trait::async_trait]
pub trait HealthCheck: Send + Sync {
    /// `Err(reason)` blocks the trigger.
    async fn check(&self) -> Result<(), String>;
}

/// Default health check: the system is always considered healthy.
pub struct AlwaysHealthy;

#[async_trait::async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn check(&self) -> Result<(), String> {
        Ok(())
    }
}
