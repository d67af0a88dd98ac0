//! Layered admission control evaluated before every dispatch.
//!
//! Checks run in a fixed order and the first failing check wins. A blocked
//! outcome is a normal skip, not an error: the trigger is consumed, counters
//! stay untouched, and the reason is logged at info level by the caller.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use havoc_core::config::SafetyConfig;
use havoc_core::{Environment, ExperimentSpec, IncidentSeverity};
use tracing::{debug, warn};

use crate::rate_limit::RateLimitPolicy;
use crate::traits::{HealthCheck, IncidentManager};

/// Why a due trigger was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    GloballyDisabled,
    EnvironmentDisabled(Environment),
    ExperimentDisabled,
    /// Current local time falls inside the environment's protected window.
    BusinessHours(Environment),
    ActiveIncident(IncidentSeverity),
    /// The incident query failed or timed out; skipping is the safe side.
    IncidentQueryFailed(String),
    Unhealthy(String),
    RateLimited { recent: usize, max: u32 },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::GloballyDisabled => write!(f, "chaos experimentation globally disabled"),
            BlockReason::EnvironmentDisabled(env) => {
                write!(f, "environment '{}' disabled", env)
            }
            BlockReason::ExperimentDisabled => write!(f, "experiment disabled"),
            BlockReason::BusinessHours(env) => {
                write!(f, "inside protected business hours for '{}'", env)
            }
            BlockReason::ActiveIncident(sev) => {
                write!(f, "active incident with severity '{}'", sev)
            }
            BlockReason::IncidentQueryFailed(err) => {
                write!(f, "incident status unavailable: {}", err)
            }
            BlockReason::Unhealthy(reason) => write!(f, "system unhealthy: {}", reason),
            BlockReason::RateLimited { recent, max } => {
                write!(f, "rate limit reached ({} runs in window, max {})", recent, max)
            }
        }
    }
}

/// Outcome of one admission evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionOutcome {
    Allowed,
    Blocked(BlockReason),
}

impl PreconditionOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PreconditionOutcome::Allowed)
    }
}

/// Evaluates the safety preconditions for a due experiment.
pub struct PreconditionEvaluator {
    config: Arc<SafetyConfig>,
    incidents: Arc<dyn IncidentManager>,
    health: Arc<dyn HealthCheck>,
    rate_limit: RateLimitPolicy,
}

impl PreconditionEvaluator {
    pub fn new(
        config: Arc<SafetyConfig>,
        incidents: Arc<dyn IncidentManager>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let rate_limit = RateLimitPolicy::from_config(&config.rate_limiting);
        Self {
            config,
            incidents,
            health,
            rate_limit,
        }
    }

    pub fn rate_limit(&self) -> RateLimitPolicy {
        self.rate_limit
    }

    /// Decide whether `spec` may dispatch right now.
    ///
    /// `recent_dispatches` is the trailing-window attempt count the registry
    /// recorded for this experiment id. Only the incident and health gates
    /// reach out to collaborators; both are bounded by the configured
    /// timeout.
    pub async fn should_run(
        &self,
        spec: &ExperimentSpec,
        now: DateTime<Utc>,
        recent_dispatches: usize,
    ) -> PreconditionOutcome {
        if !self.config.global.enabled {
            return PreconditionOutcome::Blocked(BlockReason::GloballyDisabled);
        }

        if !self.config.environment_enabled(spec.environment) {
            return PreconditionOutcome::Blocked(BlockReason::EnvironmentDisabled(
                spec.environment,
            ));
        }

        if !spec.enabled {
            return PreconditionOutcome::Blocked(BlockReason::ExperimentDisabled);
        }

        if self.inside_business_hours(spec, now) {
            return PreconditionOutcome::Blocked(BlockReason::BusinessHours(spec.environment));
        }

        if let Some(blocked) = self.incident_gate().await {
            return PreconditionOutcome::Blocked(blocked);
        }

        if let Err(reason) = self.health_gate().await {
            return PreconditionOutcome::Blocked(BlockReason::Unhealthy(reason));
        }

        if self.rate_limit.exceeded(recent_dispatches) {
            return PreconditionOutcome::Blocked(BlockReason::RateLimited {
                recent: recent_dispatches,
                max: self.rate_limit.max_per_window,
            });
        }

        PreconditionOutcome::Allowed
    }

    /// Business-hours window of the experiment's environment, evaluated in
    /// the experiment's own timezone (the only timezone the record carries).
    fn inside_business_hours(&self, spec: &ExperimentSpec, now: DateTime<Utc>) -> bool {
        let Some(window) = self.config.business_hours(spec.environment) else {
            return false;
        };
        let Ok(tz) = spec.schedule.timezone.parse::<chrono_tz::Tz>() else {
            // Unparseable timezone already failed schedule validation;
            // treat it as outside the window rather than blocking forever.
            return false;
        };
        let local = now.with_timezone(&tz).naive_local();
        let blocked = window.blocks(local);
        if blocked {
            debug!(
                experiment_id = %spec.id,
                weekday = local.weekday().number_from_monday(),
                "inside business-hours window"
            );
        }
        blocked
    }

    /// Any critical/high incident blocks everything. A failed or timed-out
    /// query blocks too.
    async fn incident_gate(&self) -> Option<BlockReason> {
        let query = self.incidents.active_incidents();
        match tokio::time::timeout(self.config.collaborator_timeout(), query).await {
            Ok(Ok(incidents)) => incidents
                .iter()
                .find(|i| i.severity.blocks_experiments())
                .map(|i| BlockReason::ActiveIncident(i.severity)),
            Ok(Err(err)) => {
                warn!(error = %err, "active-incident query failed");
                Some(BlockReason::IncidentQueryFailed(err.to_string()))
            }
            Err(_) => {
                warn!("active-incident query timed out");
                Some(BlockReason::IncidentQueryFailed("query timed out".to_string()))
            }
        }
    }

    async fn health_gate(&self) -> Result<(), String> {
        match tokio::time::timeout(self.config.collaborator_timeout(), self.health.check()).await {
            Ok(result) => result,
            Err(_) => Err("health check timed out".to_string()),
        }
    }
}
