//! Chaos experiment scheduling and safety-control engine.
//!
//! This crate decides *when* a predefined chaos experiment may run against a
//! live environment. It provides:
//! - Cron-driven scheduling with one dispatcher loop over all experiments
//! - Layered admission control (kill-switches, business hours, incidents,
//!   health, rate limits)
//! - Per-experiment run/failure tracking with an overlap guard
//! - Failure escalation: repeated failures unschedule the experiment and
//!   open an incident
//!
//! Fault injection itself is delegated to an [`ExecutionEngine`]
//! implementation; incident tracking to an [`IncidentManager`].

pub mod error;
pub mod escalation;
pub mod events;
pub mod preconditions;
pub mod rate_limit;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod traits;

pub use error::ScheduleError;
pub use escalation::EscalationPolicy;
pub use events::{EventBus, SchedulerEvent, SubscriptionId};
pub use preconditions::{BlockReason, PreconditionEvaluator, PreconditionOutcome};
pub use rate_limit::RateLimitPolicy;
pub use registry::{ExperimentRegistry, ScheduledExperimentSnapshot};
pub use runner::{ExperimentScheduler, SchedulerStatus};
pub use schedule::{next_fire, normalize_cron, validate_schedule};
pub use traits::{
    AlwaysHealthy, CollaboratorError, ExecutionEngine, HealthCheck, IncidentManager, NoopTelemetry,
    Telemetry,
};
