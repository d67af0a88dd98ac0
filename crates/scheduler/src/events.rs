//! Scheduler event catalog and observer bus.
//!
//! Components that care about scheduler activity (dashboards, CLIs, audit
//! sinks) subscribe to the [`EventBus`]; each subscriber gets its own
//! unbounded channel and an unsubscribe handle. Publishing never blocks and
//! silently prunes subscribers whose receiver was dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Events emitted by the scheduler, in per-experiment mutation order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    SchedulerStarted {
        scheduled_count: usize,
    },
    SchedulerStopped,
    SchedulerPaused {
        paused_count: usize,
    },
    SchedulerResumed {
        resumed_count: usize,
    },
    ExperimentScheduled {
        experiment_id: String,
        name: String,
        next_run: Option<DateTime<Utc>>,
    },
    ExperimentUnscheduled {
        experiment_id: String,
        run_count: u64,
        failure_count: u32,
    },
    ExperimentExecuted {
        experiment_id: String,
        execution_id: Option<String>,
        run_count: u64,
        next_run: Option<DateTime<Utc>>,
    },
    ExperimentFailed {
        experiment_id: String,
        failure_count: u32,
        error: Option<String>,
    },
    /// Like `ExperimentFailed`, but the engine call itself raised or timed
    /// out rather than reporting a failed run.
    ExperimentError {
        experiment_id: String,
        failure_count: u32,
        error: String,
    },
}

impl SchedulerEvent {
    /// Stable event name for telemetry sinks.
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerEvent::SchedulerStarted { .. } => "scheduler_started",
            SchedulerEvent::SchedulerStopped => "scheduler_stopped",
            SchedulerEvent::SchedulerPaused { .. } => "scheduler_paused",
            SchedulerEvent::SchedulerResumed { .. } => "scheduler_resumed",
            SchedulerEvent::ExperimentScheduled { .. } => "experiment_scheduled",
            SchedulerEvent::ExperimentUnscheduled { .. } => "experiment_unscheduled",
            SchedulerEvent::ExperimentExecuted { .. } => "scheduled_experiment_executed",
            SchedulerEvent::ExperimentFailed { .. } => "scheduled_experiment_failed",
            SchedulerEvent::ExperimentError { .. } => "scheduled_experiment_error",
        }
    }

    /// Event payload as JSON (experiment id and counters included).
    pub fn properties(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Handle returned by [`EventBus::subscribe`]; pass it back to
/// [`EventBus::unsubscribe`] to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Multi-consumer observer bus for [`SchedulerEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<u64, UnboundedSender<SchedulerEvent>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attach a new subscriber. Events published after this call are
    /// delivered to the returned receiver.
    pub fn subscribe(&self) -> (SubscriptionId, UnboundedReceiver<SchedulerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (SubscriptionId(id), rx)
    }

    /// Detach a subscriber. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id.0);
    }

    /// Deliver an event to every live subscriber, dropping closed ones.
    pub fn publish(&self, event: &SchedulerEvent) {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled_event(id: &str) -> SchedulerEvent {
        SchedulerEvent::ExperimentScheduled {
            experiment_id: id.to_string(),
            name: format!("Experiment {}", id),
            next_run: Some(Utc::now()),
        }
    }

    #[test]
    fn event_names_are_stable() {
        assert_eq!(scheduled_event("e1").name(), "experiment_scheduled");
        assert_eq!(
            SchedulerEvent::ExperimentFailed {
                experiment_id: "e1".into(),
                failure_count: 1,
                error: None,
            }
            .name(),
            "scheduled_experiment_failed"
        );
        assert_eq!(SchedulerEvent::SchedulerStopped.name(), "scheduler_stopped");
    }

    #[test]
    fn properties_carry_experiment_id() {
        let props = scheduled_event("exp-42").properties();
        assert_eq!(props["event"], "experiment_scheduled");
        assert_eq!(props["experiment_id"], "exp-42");
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let (_id_a, mut rx_a) = bus.subscribe();
        let (_id_b, mut rx_b) = bus.subscribe();

        bus.publish(&scheduled_event("e1"));

        assert_eq!(rx_a.recv().await.unwrap().name(), "experiment_scheduled");
        assert_eq!(rx_b.recv().await.unwrap().name(), "experiment_scheduled");
    }

    #[tokio::test]
    async fn unsubscribe_detaches() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();
        bus.unsubscribe(id);

        bus.publish(&scheduled_event("e1"));
        assert!(rx.recv().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn dropped_receivers_are_pruned_on_publish() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe();
        drop(rx);

        bus.publish(&scheduled_event("e1"));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
