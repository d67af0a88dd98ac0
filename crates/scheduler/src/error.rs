use thiserror::Error;

/// Caller-facing scheduler errors, raised synchronously from the API.
///
/// Skips and execution failures are not errors: they are normal trigger
/// outcomes, surfaced through events and counters instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid schedule for experiment '{id}': {reason}")]
    InvalidSchedule { id: String, reason: String },

    #[error("experiment '{0}' is already scheduled")]
    AlreadyScheduled(String),

    #[error("experiment '{0}' is not scheduled")]
    NotScheduled(String),

    #[error("scheduler is already running")]
    AlreadyRunning,
}

impl ScheduleError {
    pub fn invalid_schedule(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSchedule {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
