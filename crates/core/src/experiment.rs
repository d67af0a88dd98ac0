//! Experiment record types shared between the scheduler and its collaborators.
//!
//! An [`ExperimentSpec`] is immutable per run: the scheduler forwards the
//! fault fields verbatim to the execution engine and never interprets them.

use serde::{Deserialize, Serialize};

/// Target environment an experiment runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Stable lowercase label for logs and event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cron schedule attached to an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// Whether the schedule itself is active. Independent of
    /// [`ExperimentSpec::enabled`].
    pub enabled: bool,
    /// Standard 5-field cron expression (6-field with seconds also accepted).
    pub cron_expression: String,
    /// IANA timezone the schedule is evaluated in (e.g. "Asia/Manila").
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Ceiling on concurrently active runs of this experiment, if any.
    #[serde(default)]
    pub max_concurrent_runs: Option<u32>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A chaos experiment definition.
///
/// The scheduler only reads `id`, `name`, `environment`, `enabled`, and
/// `schedule`; the fault fields are opaque payload for the execution engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Unique experiment identifier.
    pub id: String,
    /// Human-readable name, carried into events and incidents.
    pub name: String,
    pub environment: Environment,
    /// Master on/off switch, independent of `schedule.enabled`.
    pub enabled: bool,
    pub schedule: ScheduleSpec,
    /// Fault type identifier (e.g. "cpu_stress", "network_latency").
    pub fault_type: String,
    /// Fault-specific parameters, forwarded verbatim.
    #[serde(default)]
    pub fault_parameters: serde_json::Value,
    /// Experiment duration in seconds.
    pub duration_secs: u64,
    /// Target selection, forwarded verbatim.
    #[serde(default)]
    pub target_selector: serde_json::Value,
}

/// Outcome of a single dispatch to the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Engine-assigned identifier for the run, if one was started.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Failure detail when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

/// One currently active run, as reported by the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveExecution {
    pub experiment_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> ExperimentSpec {
        ExperimentSpec {
            id: "exp-cpu-01".to_string(),
            name: "CPU stress on checkout".to_string(),
            environment: Environment::Staging,
            enabled: true,
            schedule: ScheduleSpec {
                enabled: true,
                cron_expression: "0 3 * * *".to_string(),
                timezone: "UTC".to_string(),
                max_concurrent_runs: Some(1),
            },
            fault_type: "cpu_stress".to_string(),
            fault_parameters: serde_json::json!({"load_pct": 80}),
            duration_secs: 120,
            target_selector: serde_json::json!({"service": "checkout"}),
        }
    }

    #[test]
    fn environment_serde_snake_case() {
        let json = serde_json::to_string(&Environment::Production).unwrap();
        assert_eq!(json, "\"production\"");
        let parsed: Environment = serde_json::from_str("\"staging\"").unwrap();
        assert_eq!(parsed, Environment::Staging);
    }

    #[test]
    fn schedule_defaults_timezone_to_utc() {
        let json = r#"{"enabled":true,"cron_expression":"*/5 * * * *"}"#;
        let parsed: ScheduleSpec = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.timezone, "UTC");
        assert_eq!(parsed.max_concurrent_runs, None);
    }

    #[test]
    fn experiment_spec_roundtrip() {
        let spec = sample_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: ExperimentSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn execution_result_optional_fields_default() {
        let parsed: ExecutionResult = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(parsed.success);
        assert_eq!(parsed.execution_id, None);
        assert_eq!(parsed.error, None);
    }
}
