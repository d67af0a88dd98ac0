use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use havoc_core::ExecutionResult;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::SchedulerEvent;
use crate::preconditions::PreconditionOutcome;
use crate::registry::DueTrigger;
use crate::schedule::next_fire;
use crate::traits::CollaboratorError;

use super::core::DispatchContext;

impl DispatchContext {
    /// Dispatcher loop: scan the registry every tick, spawn one task per
    /// due trigger. Runs until stop is signalled.
    pub(super) async fn run_loop(self, running: Arc<AtomicBool>, shutdown: Arc<Notify>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                _ = ticker.tick() => {
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    self.dispatch_due(Utc::now());
                }
            }
        }
        debug!("dispatcher loop exited");
    }

    /// Claim every due entry and spawn its trigger. A panicking or failing
    /// trigger never affects other entries.
    fn dispatch_due(&self, now: DateTime<Utc>) {
        let due = self.registry.claim_due(now, |spec| {
            next_fire(&spec.schedule.cron_expression, &spec.schedule.timezone, now)
        });
        for trigger in due {
            let ctx = self.clone();
            tokio::spawn(async move {
                ctx.run_trigger(trigger).await;
            });
        }
    }

    /// Execute one trigger firing end to end.
    ///
    /// Skips (overlap, preconditions, concurrency ceiling) consume the
    /// firing without touching counters. A dispatch that reaches the engine
    /// updates exactly one of run_count/failure_count and may escalate.
    pub(super) async fn run_trigger(&self, trigger: DueTrigger) {
        let id = trigger.id.as_str();
        let spec = &trigger.spec;
        let now = Utc::now();

        match self.registry.is_in_flight(id) {
            Some(false) => {}
            Some(true) => {
                debug!(experiment_id = %id, "previous run still in flight, skipping trigger");
                return;
            }
            // Unscheduled between claim and dispatch.
            None => return,
        }

        let window = self.preconditions.rate_limit().window;
        let recent = self.registry.recent_dispatches(id, now, window);
        match self.preconditions.should_run(spec, now, recent).await {
            PreconditionOutcome::Allowed => {}
            PreconditionOutcome::Blocked(reason) => {
                info!(experiment_id = %id, %reason, "trigger skipped");
                return;
            }
        }

        if let Some(limit) = spec.schedule.max_concurrent_runs {
            match self.active_run_count(id).await {
                Ok(active) if active >= limit as usize => {
                    info!(
                        experiment_id = %id,
                        active,
                        limit,
                        "concurrency ceiling reached, skipping trigger"
                    );
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(experiment_id = %id, error = %err, "active-execution query failed, skipping trigger");
                    return;
                }
            }
        }

        if !self.registry.begin_dispatch(id, now) {
            return;
        }

        let call = self.engine.execute_experiment(spec);
        let outcome = tokio::time::timeout(self.config.collaborator_timeout(), call).await;
        match outcome {
            Ok(Ok(result)) if result.success => self.record_success(&trigger, result),
            Ok(Ok(result)) => {
                let error = result.error;
                self.record_failure(&trigger, error, false).await;
            }
            Ok(Err(err)) => {
                self.record_failure(&trigger, Some(err.to_string()), true)
                    .await;
            }
            Err(_) => {
                let err = CollaboratorError::Timeout(self.config.collaborator_timeout());
                self.record_failure(&trigger, Some(err.to_string()), true)
                    .await;
            }
        }

        self.registry.end_dispatch(id);
    }

    fn record_success(&self, trigger: &DueTrigger, result: ExecutionResult) {
        let id = trigger.id.as_str();
        let now = Utc::now();
        let schedule = &trigger.spec.schedule;
        let next_run = next_fire(&schedule.cron_expression, &schedule.timezone, now);

        match self.registry.record_success(id, now, next_run) {
            Some(run_count) => {
                debug!(experiment_id = %id, run_count, "experiment executed");
                self.emit(SchedulerEvent::ExperimentExecuted {
                    experiment_id: id.to_string(),
                    execution_id: result.execution_id,
                    run_count,
                    next_run,
                });
            }
            // Unscheduled mid-flight; result discarded.
            None => debug!(experiment_id = %id, "success for unscheduled experiment discarded"),
        }
    }

    /// Record a failed run and escalate past the disable threshold.
    ///
    /// `raised` distinguishes an engine call that errored or timed out from
    /// an execution that completed and reported failure.
    async fn record_failure(&self, trigger: &DueTrigger, error: Option<String>, raised: bool) {
        let id = trigger.id.as_str();
        let Some(failure_count) = self.registry.record_failure(id, error.clone()) else {
            debug!(experiment_id = %id, "failure for unscheduled experiment discarded");
            return;
        };

        warn!(experiment_id = %id, failure_count, error = ?error, "experiment run failed");
        if raised {
            self.emit(SchedulerEvent::ExperimentError {
                experiment_id: id.to_string(),
                failure_count,
                error: error.clone().unwrap_or_else(|| "unknown error".to_string()),
            });
        } else {
            self.emit(SchedulerEvent::ExperimentFailed {
                experiment_id: id.to_string(),
                failure_count,
                error: error.clone(),
            });
        }

        if self.escalation.should_escalate(failure_count) {
            self.escalate(trigger, failure_count, error.as_deref()).await;
        }
    }

    /// Unschedule the failing experiment and open exactly one incident.
    /// Incident-manager failures are logged and never propagate.
    async fn escalate(&self, trigger: &DueTrigger, failure_count: u32, last_error: Option<&str>) {
        let id = trigger.id.as_str();
        warn!(
            experiment_id = %id,
            failure_count,
            threshold = self.escalation.threshold(),
            "failure threshold reached, unscheduling experiment"
        );

        match self.registry.remove(id) {
            Ok(removed) => self.emit(SchedulerEvent::ExperimentUnscheduled {
                experiment_id: id.to_string(),
                run_count: removed.run_count,
                failure_count: removed.failure_count,
            }),
            // Already gone (concurrent unschedule); nothing left to do.
            Err(_) => return,
        }

        let incident = self
            .escalation
            .incident_for(&trigger.spec, failure_count, last_error);
        let call = self.incidents.create_incident(incident);
        match tokio::time::timeout(self.config.collaborator_timeout(), call).await {
            Ok(Ok(incident_id)) => {
                info!(experiment_id = %id, %incident_id, "escalation incident created");
            }
            Ok(Err(err)) => {
                warn!(experiment_id = %id, error = %err, "escalation incident creation failed");
            }
            Err(_) => {
                warn!(experiment_id = %id, "escalation incident creation timed out");
            }
        }
    }

    /// Active runs of `id` currently reported by the engine.
    async fn active_run_count(&self, id: &str) -> Result<usize, CollaboratorError> {
        let call = self.engine.active_executions();
        let active = tokio::time::timeout(self.config.collaborator_timeout(), call)
            .await
            .map_err(|_| CollaboratorError::Timeout(self.config.collaborator_timeout()))??;
        Ok(active.iter().filter(|e| e.experiment_id == id).count())
    }
}
