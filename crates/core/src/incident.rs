//! Incident manager contract types.
//!
//! The scheduler consumes a narrow slice of the incident system: it creates
//! incidents on failure escalation and reads active incidents during
//! admission control. Everything else (classification, postmortems, paging)
//! is owned by the external incident manager.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier assigned by the incident manager.
pub type IncidentId = Uuid;

/// Incident severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl IncidentSeverity {
    /// Numeric rank for comparison (higher = more severe).
    pub fn rank(&self) -> u8 {
        match self {
            IncidentSeverity::Critical => 3,
            IncidentSeverity::High => 2,
            IncidentSeverity::Medium => 1,
            IncidentSeverity::Low => 0,
        }
    }

    /// Whether an active incident at this severity blocks all experiments.
    pub fn blocks_experiments(&self) -> bool {
        matches!(self, IncidentSeverity::Critical | IncidentSeverity::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Critical => "critical",
            IncidentSeverity::High => "high",
            IncidentSeverity::Medium => "medium",
            IncidentSeverity::Low => "low",
        }
    }
}

impl std::fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload for creating an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSpec {
    pub title: String,
    pub description: String,
    pub severity: IncidentSeverity,
    /// Which subsystem raised the incident.
    pub source: String,
    pub tags: Vec<String>,
    /// Structured context (experiment id, failure count, last error, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A currently open incident, as reported by the incident manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveIncident {
    pub id: IncidentId,
    pub severity: IncidentSeverity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_rank_ordering() {
        assert!(IncidentSeverity::Critical.rank() > IncidentSeverity::High.rank());
        assert!(IncidentSeverity::High.rank() > IncidentSeverity::Medium.rank());
        assert!(IncidentSeverity::Medium.rank() > IncidentSeverity::Low.rank());
    }

    #[test]
    fn only_critical_and_high_block() {
        assert!(IncidentSeverity::Critical.blocks_experiments());
        assert!(IncidentSeverity::High.blocks_experiments());
        assert!(!IncidentSeverity::Medium.blocks_experiments());
        assert!(!IncidentSeverity::Low.blocks_experiments());
    }

    #[test]
    fn severity_serde_lowercase() {
        let json = serde_json::to_string(&IncidentSeverity::High).unwrap();
        assert_eq!(json, "\"high\"");
        let parsed: IncidentSeverity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(parsed, IncidentSeverity::Critical);
    }
}
