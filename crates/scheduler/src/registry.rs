//! Mutable per-experiment scheduling state.
//!
//! The registry is the only shared mutable resource in the engine. All
//! mutation goes through one `RwLock`-protected map keyed by experiment id,
//! so trigger tasks for different experiments can run concurrently while
//! counter updates stay serialized. Locks are never held across awaits.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use havoc_core::ExperimentSpec;
use serde::Serialize;
use tracing::debug;

use crate::error::ScheduleError;
use crate::rate_limit::count_in_window;

/// Dispatch-history entries kept per experiment (FIFO eviction). Only the
/// trailing rate-limit window is ever inspected, so a small cap suffices.
const HISTORY_CAP: usize = 256;

/// Scheduling state for a single experiment. One instance per scheduled id.
#[derive(Debug, Clone)]
pub(crate) struct ScheduledExperimentState {
    pub experiment: ExperimentSpec,
    /// Timer-handle analog: false while paused, true while eligible to fire.
    pub active: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u32,
    /// Overlap guard: true while a dispatch for this id is outstanding.
    pub in_flight: bool,
    /// Timestamps of dispatch attempts (successful or failed), newest last.
    pub dispatch_history: VecDeque<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ScheduledExperimentState {
    pub fn new(experiment: ExperimentSpec, next_run: Option<DateTime<Utc>>) -> Self {
        Self {
            experiment,
            active: true,
            last_run: None,
            next_run,
            run_count: 0,
            failure_count: 0,
            in_flight: false,
            dispatch_history: VecDeque::new(),
            last_error: None,
        }
    }
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledExperimentSnapshot {
    pub id: String,
    pub experiment: ExperimentSpec,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u32,
    pub is_active: bool,
}

/// A trigger firing claimed from the registry by the dispatcher loop.
#[derive(Debug, Clone)]
pub(crate) struct DueTrigger {
    pub id: String,
    pub spec: ExperimentSpec,
}

/// Final counters of an entry removed from the registry.
#[derive(Debug, Clone)]
pub(crate) struct RemovedEntry {
    pub name: String,
    pub run_count: u64,
    pub failure_count: u32,
}

/// Thread-safe registry of scheduled experiments, keyed by id.
#[derive(Clone)]
pub struct ExperimentRegistry {
    inner: Arc<RwLock<HashMap<String, ScheduledExperimentState>>>,
}

impl ExperimentRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ScheduledExperimentState>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ScheduledExperimentState>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new entry. At most one entry may exist per experiment id.
    pub(crate) fn insert(&self, state: ScheduledExperimentState) -> Result<(), ScheduleError> {
        let mut map = self.write();
        let id = state.experiment.id.clone();
        if map.contains_key(&id) {
            return Err(ScheduleError::AlreadyScheduled(id));
        }
        map.insert(id, state);
        Ok(())
    }

    /// Remove an entry, returning its final counters.
    pub(crate) fn remove(&self, id: &str) -> Result<RemovedEntry, ScheduleError> {
        let mut map = self.write();
        match map.remove(id) {
            Some(state) => Ok(RemovedEntry {
                name: state.experiment.name,
                run_count: state.run_count,
                failure_count: state.failure_count,
            }),
            None => Err(ScheduleError::NotScheduled(id.to_string())),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Collect all entries due at `now` and advance their `next_run`.
    ///
    /// Advancing happens at claim time for every outcome (including later
    /// skips), reproducing independent-timer semantics: a firing is
    /// consumed, the next attempt is the next cron instant.
    pub(crate) fn claim_due<F>(&self, now: DateTime<Utc>, next_fire: F) -> Vec<DueTrigger>
    where
        F: Fn(&ExperimentSpec) -> Option<DateTime<Utc>>,
    {
        let mut map = self.write();
        let mut due = Vec::new();
        for (id, state) in map.iter_mut() {
            if !state.active {
                continue;
            }
            let Some(next) = state.next_run else { continue };
            if next > now {
                continue;
            }
            state.next_run = next_fire(&state.experiment);
            due.push(DueTrigger {
                id: id.clone(),
                spec: state.experiment.clone(),
            });
        }
        due
    }

    /// `None` if the entry no longer exists.
    pub(crate) fn is_in_flight(&self, id: &str) -> Option<bool> {
        self.read().get(id).map(|s| s.in_flight)
    }

    /// Claim the in-flight guard and record a dispatch attempt.
    ///
    /// Returns false if the entry is gone or already in flight.
    pub(crate) fn begin_dispatch(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.write();
        let Some(state) = map.get_mut(id) else {
            return false;
        };
        if state.in_flight {
            return false;
        }
        state.in_flight = true;
        state.dispatch_history.push_back(now);
        while state.dispatch_history.len() > HISTORY_CAP {
            state.dispatch_history.pop_front();
        }
        true
    }

    /// Release the in-flight guard. Entries removed mid-dispatch are a no-op.
    pub(crate) fn end_dispatch(&self, id: &str) {
        if let Some(state) = self.write().get_mut(id) {
            state.in_flight = false;
        }
    }

    /// Record a successful run. Returns the new run count, or `None` if the
    /// entry was removed while the dispatch was outstanding (result
    /// discarded).
    pub(crate) fn record_success(
        &self,
        id: &str,
        now: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Option<u64> {
        let mut map = self.write();
        let state = map.get_mut(id)?;
        state.run_count += 1;
        state.last_run = Some(now);
        state.next_run = next_run;
        state.last_error = None;
        Some(state.run_count)
    }

    /// Record a failed run. Returns the new failure count, or `None` if the
    /// entry was removed while the dispatch was outstanding.
    pub(crate) fn record_failure(&self, id: &str, error: Option<String>) -> Option<u32> {
        let mut map = self.write();
        let state = map.get_mut(id)?;
        state.failure_count += 1;
        if error.is_some() {
            state.last_error = error;
        }
        Some(state.failure_count)
    }

    /// Dispatch attempts for `id` in the trailing window ending at `now`.
    pub(crate) fn recent_dispatches(&self, id: &str, now: DateTime<Utc>, window: Duration) -> usize {
        self.read()
            .get(id)
            .map(|s| count_in_window(&s.dispatch_history, now, window))
            .unwrap_or(0)
    }

    /// Deactivate every entry without touching counters. Returns how many
    /// were active.
    pub(crate) fn pause_all(&self) -> usize {
        let mut map = self.write();
        let mut paused = 0;
        for state in map.values_mut() {
            if state.active {
                state.active = false;
                paused += 1;
            }
        }
        paused
    }

    /// Reactivate every entry with a freshly computed next-fire instant.
    pub(crate) fn resume_all<F>(&self, next_fire: F) -> usize
    where
        F: Fn(&ExperimentSpec) -> Option<DateTime<Utc>>,
    {
        let mut map = self.write();
        let mut resumed = 0;
        for state in map.values_mut() {
            if !state.active {
                state.active = true;
                state.next_run = next_fire(&state.experiment);
                resumed += 1;
            }
        }
        debug!(resumed, "registry entries reactivated");
        resumed
    }

    pub fn snapshot(&self) -> Vec<ScheduledExperimentSnapshot> {
        self.read()
            .iter()
            .map(|(id, s)| ScheduledExperimentSnapshot {
                id: id.clone(),
                experiment: s.experiment.clone(),
                last_run: s.last_run,
                next_run: s.next_run,
                run_count: s.run_count,
                failure_count: s.failure_count,
                is_active: s.active,
            })
            .collect()
    }

    /// Sum of run and failure counts across all current entries.
    pub fn totals(&self) -> (u64, u64) {
        self.read().values().fold((0, 0), |(runs, fails), s| {
            (runs + s.run_count, fails + u64::from(s.failure_count))
        })
    }

    #[cfg(test)]
    pub(crate) fn get_state(&self, id: &str) -> Option<ScheduledExperimentState> {
        self.read().get(id).cloned()
    }

    #[cfg(test)]
    pub(crate) fn set_in_flight(&self, id: &str, value: bool) {
        if let Some(state) = self.write().get_mut(id) {
            state.in_flight = value;
        }
    }
}

impl Default for ExperimentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use havoc_core::{Environment, ScheduleSpec};

    fn spec(id: &str) -> ExperimentSpec {
        ExperimentSpec {
            id: id.to_string(),
            name: format!("Experiment {}", id),
            environment: Environment::Development,
            enabled: true,
            schedule: ScheduleSpec {
                enabled: true,
                cron_expression: "*/5 * * * *".to_string(),
                timezone: "UTC".to_string(),
                max_concurrent_runs: None,
            },
            fault_type: "cpu_stress".to_string(),
            fault_parameters: serde_json::Value::Null,
            duration_secs: 60,
            target_selector: serde_json::Value::Null,
        }
    }

    fn registry_with(id: &str, next_run: Option<DateTime<Utc>>) -> ExperimentRegistry {
        let reg = ExperimentRegistry::new();
        reg.insert(ScheduledExperimentState::new(spec(id), next_run))
            .unwrap();
        reg
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let reg = registry_with("e1", None);
        let err = reg
            .insert(ScheduledExperimentState::new(spec("e1"), None))
            .unwrap_err();
        assert_eq!(err, ScheduleError::AlreadyScheduled("e1".to_string()));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_returns_final_counters() {
        let reg = registry_with("e1", None);
        reg.begin_dispatch("e1", Utc::now());
        reg.record_failure("e1", Some("boom".to_string()));
        reg.end_dispatch("e1");

        let removed = reg.remove("e1").unwrap();
        assert_eq!(removed.failure_count, 1);
        assert_eq!(removed.run_count, 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_missing_is_not_scheduled() {
        let reg = ExperimentRegistry::new();
        assert_eq!(
            reg.remove("ghost").unwrap_err(),
            ScheduleError::NotScheduled("ghost".to_string())
        );
    }

    #[test]
    fn claim_due_advances_next_run() {
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(5);
        let reg = registry_with("e1", Some(now - chrono::Duration::seconds(1)));

        let due = reg.claim_due(now, |_| Some(later));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "e1");
        assert_eq!(reg.get_state("e1").unwrap().next_run, Some(later));

        // Second scan at the same instant: nothing due any more.
        assert!(reg.claim_due(now, |_| Some(later)).is_empty());
    }

    #[test]
    fn claim_due_skips_inactive_entries() {
        let now = Utc::now();
        let reg = registry_with("e1", Some(now - chrono::Duration::seconds(1)));
        reg.pause_all();
        assert!(reg.claim_due(now, |_| None).is_empty());
    }

    #[test]
    fn begin_dispatch_is_exclusive() {
        let reg = registry_with("e1", None);
        assert!(reg.begin_dispatch("e1", Utc::now()));
        assert!(!reg.begin_dispatch("e1", Utc::now()));
        reg.end_dispatch("e1");
        assert!(reg.begin_dispatch("e1", Utc::now()));
    }

    #[test]
    fn recent_dispatches_counts_window_only() {
        let now = Utc::now();
        let reg = registry_with("e1", None);
        reg.begin_dispatch("e1", now - chrono::Duration::hours(2));
        reg.end_dispatch("e1");
        reg.begin_dispatch("e1", now - chrono::Duration::minutes(10));
        reg.end_dispatch("e1");
        reg.begin_dispatch("e1", now);

        assert_eq!(
            reg.recent_dispatches("e1", now, Duration::from_secs(3600)),
            2
        );
    }

    #[test]
    fn counters_survive_pause_resume() {
        let now = Utc::now();
        let reg = registry_with("e1", Some(now));
        reg.begin_dispatch("e1", now);
        reg.record_success("e1", now, Some(now + chrono::Duration::minutes(5)));
        reg.end_dispatch("e1");

        assert_eq!(reg.pause_all(), 1);
        let stale = reg.get_state("e1").unwrap().next_run;
        let fresh = now + chrono::Duration::hours(1);
        assert_eq!(reg.resume_all(|_| Some(fresh)), 1);

        let state = reg.get_state("e1").unwrap();
        assert_eq!(state.run_count, 1);
        assert!(state.active);
        assert_eq!(state.next_run, Some(fresh));
        assert_ne!(state.next_run, stale);
    }

    #[test]
    fn results_for_removed_entries_are_discarded() {
        let reg = registry_with("e1", None);
        reg.begin_dispatch("e1", Utc::now());
        reg.remove("e1").unwrap();

        assert_eq!(reg.record_success("e1", Utc::now(), None), None);
        assert_eq!(reg.record_failure("e1", None), None);
        reg.end_dispatch("e1"); // no-op, must not panic
    }

    #[test]
    fn totals_sum_across_entries() {
        let now = Utc::now();
        let reg = registry_with("e1", None);
        reg.insert(ScheduledExperimentState::new(spec("e2"), None))
            .unwrap();
        reg.record_success("e1", now, None);
        reg.record_success("e1", now, None);
        reg.record_failure("e2", None);

        assert_eq!(reg.totals(), (2, 1));
    }
}
