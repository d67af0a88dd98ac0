use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use havoc_core::config::SafetyConfig;
use havoc_core::ExperimentSpec;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Notify;
use tracing::info;

use crate::error::ScheduleError;
use crate::escalation::EscalationPolicy;
use crate::events::{EventBus, SchedulerEvent, SubscriptionId};
use crate::preconditions::PreconditionEvaluator;
use crate::registry::{ExperimentRegistry, ScheduledExperimentSnapshot, ScheduledExperimentState};
use crate::schedule::{next_fire, validate_schedule};
use crate::traits::{
    AlwaysHealthy, ExecutionEngine, HealthCheck, IncidentManager, NoopTelemetry, Telemetry,
};

/// Everything a trigger task needs, cheap to clone into spawned tasks.
#[derive(Clone)]
pub(super) struct DispatchContext {
    pub(super) config: Arc<SafetyConfig>,
    pub(super) registry: ExperimentRegistry,
    pub(super) engine: Arc<dyn ExecutionEngine>,
    pub(super) incidents: Arc<dyn IncidentManager>,
    pub(super) telemetry: Arc<dyn Telemetry>,
    pub(super) preconditions: Arc<PreconditionEvaluator>,
    pub(super) escalation: EscalationPolicy,
    pub(super) events: EventBus,
}

impl DispatchContext {
    /// Publish to subscribers and mirror to the telemetry sink.
    pub(super) fn emit(&self, event: SchedulerEvent) {
        self.telemetry.track(event.name(), event.properties());
        self.events.publish(&event);
    }
}

/// Point-in-time view of scheduler health.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub scheduled_count: usize,
    pub total_runs: u64,
    pub total_failures: u64,
    pub uptime_secs: Option<i64>,
}

/// The chaos experiment scheduler.
///
/// Owns the registry of scheduled experiments and, while started, drives a
/// single dispatcher loop that fires due triggers. Fault injection and
/// incident tracking are delegated to the injected collaborators.
pub struct ExperimentScheduler {
    pub(super) ctx: DispatchContext,
    pub(super) running: Arc<AtomicBool>,
    started_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub(super) shutdown: Arc<Notify>,
}

impl ExperimentScheduler {
    /// Create a scheduler with a no-op telemetry sink and an always-healthy
    /// health check. Override either with the `with_*` builders.
    pub fn new(
        config: SafetyConfig,
        engine: Arc<dyn ExecutionEngine>,
        incidents: Arc<dyn IncidentManager>,
    ) -> Self {
        let config = Arc::new(config);
        let preconditions = Arc::new(PreconditionEvaluator::new(
            Arc::clone(&config),
            Arc::clone(&incidents),
            Arc::new(AlwaysHealthy),
        ));
        let escalation = EscalationPolicy::new(config.disable_threshold);
        Self {
            ctx: DispatchContext {
                config,
                registry: ExperimentRegistry::new(),
                engine,
                incidents,
                telemetry: Arc::new(NoopTelemetry),
                preconditions,
                escalation,
                events: EventBus::new(),
            },
            running: Arc::new(AtomicBool::new(false)),
            started_at: Arc::new(RwLock::new(None)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.ctx.telemetry = telemetry;
        self
    }

    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.ctx.preconditions = Arc::new(PreconditionEvaluator::new(
            Arc::clone(&self.ctx.config),
            Arc::clone(&self.ctx.incidents),
            health,
        ));
        self
    }

    /// Start the dispatcher loop. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) -> Result<(), ScheduleError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ScheduleError::AlreadyRunning);
        }
        *self
            .started_at
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

        let scheduled_count = self.ctx.registry.len();
        info!(scheduled_count, "scheduler started");
        self.ctx.emit(SchedulerEvent::SchedulerStarted { scheduled_count });

        let ctx = self.ctx.clone();
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            ctx.run_loop(running, shutdown).await;
        });
        Ok(())
    }

    /// Stop the dispatcher loop. Idempotent; in-flight dispatches are
    /// allowed to complete.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        *self
            .started_at
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.shutdown.notify_waiters();
        info!("scheduler stopped");
        self.ctx.emit(SchedulerEvent::SchedulerStopped);
    }

    /// Admit an experiment into the registry.
    ///
    /// The schedule must be enabled and carry a parseable cron expression
    /// and timezone with at least one future firing.
    pub fn schedule_experiment(&self, spec: ExperimentSpec) -> Result<(), ScheduleError> {
        if !spec.schedule.enabled {
            return Err(ScheduleError::invalid_schedule(
                spec.id.as_str(),
                "schedule is disabled",
            ));
        }
        validate_schedule(&spec.schedule.cron_expression, &spec.schedule.timezone)
            .map_err(|reason| ScheduleError::invalid_schedule(spec.id.as_str(), reason))?;

        let next_run = next_fire(
            &spec.schedule.cron_expression,
            &spec.schedule.timezone,
            Utc::now(),
        )
        .ok_or_else(|| {
            ScheduleError::invalid_schedule(spec.id.as_str(), "schedule has no future firings")
        })?;

        let experiment_id = spec.id.clone();
        let name = spec.name.clone();
        self.ctx
            .registry
            .insert(ScheduledExperimentState::new(spec, Some(next_run)))?;

        info!(experiment_id = %experiment_id, next_run = %next_run, "experiment scheduled");
        self.ctx.emit(SchedulerEvent::ExperimentScheduled {
            experiment_id,
            name,
            next_run: Some(next_run),
        });
        Ok(())
    }

    /// Remove an experiment from the registry. Pending firings are
    /// cancelled; an in-flight dispatch completes and its result is
    /// discarded.
    pub fn unschedule_experiment(&self, id: &str) -> Result<(), ScheduleError> {
        let removed = self.ctx.registry.remove(id)?;
        info!(
            experiment_id = %id,
            name = %removed.name,
            run_count = removed.run_count,
            failure_count = removed.failure_count,
            "experiment unscheduled"
        );
        self.ctx.emit(SchedulerEvent::ExperimentUnscheduled {
            experiment_id: id.to_string(),
            run_count: removed.run_count,
            failure_count: removed.failure_count,
        });
        Ok(())
    }

    /// Replace an existing entry with a new spec.
    ///
    /// The old entry is always removed first; the new spec is only admitted
    /// if its schedule is enabled. On a validation error the experiment ends
    /// up unscheduled and the error is surfaced.
    pub fn update_scheduled_experiment(&self, spec: ExperimentSpec) -> Result<(), ScheduleError> {
        if self.ctx.registry.contains(&spec.id) {
            self.unschedule_experiment(&spec.id)?;
        }
        if spec.schedule.enabled {
            self.schedule_experiment(spec)?;
        }
        Ok(())
    }

    /// Deactivate every entry's firings without touching counters.
    pub fn pause_all(&self) {
        let paused_count = self.ctx.registry.pause_all();
        info!(paused_count, "scheduler paused");
        self.ctx.emit(SchedulerEvent::SchedulerPaused { paused_count });
    }

    /// Reactivate every paused entry with a freshly computed next firing.
    pub fn resume_all(&self) {
        let now = Utc::now();
        let resumed_count = self.ctx.registry.resume_all(|spec| {
            next_fire(&spec.schedule.cron_expression, &spec.schedule.timezone, now)
        });
        info!(resumed_count, "scheduler resumed");
        self.ctx
            .emit(SchedulerEvent::SchedulerResumed { resumed_count });
    }

    pub fn get_scheduled_experiments(&self) -> Vec<ScheduledExperimentSnapshot> {
        self.ctx.registry.snapshot()
    }

    pub fn status(&self) -> SchedulerStatus {
        let (total_runs, total_failures) = self.ctx.registry.totals();
        let uptime_secs = self
            .started_at
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|t| (Utc::now() - t).num_seconds());
        SchedulerStatus {
            is_running: self.running.load(Ordering::SeqCst),
            scheduled_count: self.ctx.registry.len(),
            total_runs,
            total_failures,
            uptime_secs,
        }
    }

    /// Attach an observer; events published after this call are delivered.
    pub fn subscribe(&self) -> (SubscriptionId, UnboundedReceiver<SchedulerEvent>) {
        self.ctx.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.ctx.events.unsubscribe(id);
    }
}

impl Drop for ExperimentScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }
}
