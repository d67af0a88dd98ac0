//! Failure escalation policy.
//!
//! Repeated failures of one experiment are a signal that the experiment
//! itself (or its target) is broken; past the threshold the scheduler stops
//! retrying, removes the entry, and opens exactly one incident.

use havoc_core::{ExperimentSpec, IncidentSeverity, IncidentSpec};
use serde_json::json;

/// Threshold-based escalation decision plus incident construction.
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    disable_threshold: u32,
}

impl EscalationPolicy {
    pub fn new(disable_threshold: u32) -> Self {
        Self { disable_threshold }
    }

    pub fn threshold(&self) -> u32 {
        self.disable_threshold
    }

    /// True once the failure count reaches the disable threshold.
    pub fn should_escalate(&self, failure_count: u32) -> bool {
        failure_count >= self.disable_threshold
    }

    /// Build the incident describing why the experiment was unscheduled.
    pub fn incident_for(
        &self,
        spec: &ExperimentSpec,
        failure_count: u32,
        last_error: Option<&str>,
    ) -> IncidentSpec {
        IncidentSpec {
            title: format!("Chaos experiment '{}' disabled after repeated failures", spec.name),
            description: format!(
                "Scheduled chaos experiment '{}' ({}) failed {} consecutive times and has \
                 been removed from the schedule. Manual review is required before re-enabling.",
                spec.name, spec.id, failure_count
            ),
            severity: IncidentSeverity::Medium,
            source: "havoc-scheduler".to_string(),
            tags: vec![
                "chaos".to_string(),
                "scheduled-experiment".to_string(),
                "failure".to_string(),
            ],
            metadata: json!({
                "experiment_id": spec.id,
                "failure_count": failure_count,
                "last_error": last_error,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use havoc_core::{Environment, ScheduleSpec};

    fn spec() -> ExperimentSpec {
        ExperimentSpec {
            id: "exp-9".to_string(),
            name: "Pod kill".to_string(),
            environment: Environment::Staging,
            enabled: true,
            schedule: ScheduleSpec {
                enabled: true,
                cron_expression: "0 3 * * *".to_string(),
                timezone: "UTC".to_string(),
                max_concurrent_runs: None,
            },
            fault_type: "container_kill".to_string(),
            fault_parameters: serde_json::Value::Null,
            duration_secs: 30,
            target_selector: serde_json::Value::Null,
        }
    }

    #[test]
    fn escalates_at_threshold() {
        let policy = EscalationPolicy::new(3);
        assert!(!policy.should_escalate(2));
        assert!(policy.should_escalate(3));
        assert!(policy.should_escalate(4));
    }

    #[test]
    fn threshold_is_configurable() {
        let policy = EscalationPolicy::new(1);
        assert!(policy.should_escalate(1));
    }

    #[test]
    fn incident_carries_experiment_context() {
        let policy = EscalationPolicy::new(3);
        let incident = policy.incident_for(&spec(), 3, Some("connection refused"));

        assert_eq!(incident.severity, IncidentSeverity::Medium);
        assert_eq!(incident.source, "havoc-scheduler");
        assert_eq!(incident.tags, vec!["chaos", "scheduled-experiment", "failure"]);
        assert_eq!(incident.metadata["experiment_id"], "exp-9");
        assert_eq!(incident.metadata["failure_count"], 3);
        assert_eq!(incident.metadata["last_error"], "connection refused");
        assert!(incident.title.contains("Pod kill"));
    }

    #[test]
    fn incident_without_last_error() {
        let policy = EscalationPolicy::new(3);
        let incident = policy.incident_for(&spec(), 3, None);
        assert!(incident.metadata["last_error"].is_null());
    }
}
