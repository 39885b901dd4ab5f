//! foglet-status — the status reporter.
//!
//! Sink for per-workload lifecycle states, message throughput counters
//! and per-module supervisor status. Writers are the lifecycle engine
//! (workload states), the routing core (message counters) and the
//! supervisor (module status); readers are the local API and the
//! controller client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use foglet_core::{WorkloadState, WorkloadUuid};

/// Supervisor-visible status of a long-running module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Starting,
    Running,
    Stopped,
}

/// Transitions kept per workload for diagnostics.
const STATE_HISTORY_LIMIT: usize = 32;

/// Shared status sink.
#[derive(Default)]
pub struct StatusReporter {
    workload_states: RwLock<HashMap<WorkloadUuid, WorkloadState>>,
    state_history: RwLock<HashMap<WorkloadUuid, Vec<WorkloadState>>>,
    published_per_workload: RwLock<HashMap<WorkloadUuid, u64>>,
    module_statuses: RwLock<HashMap<String, ModuleStatus>>,
    processed_messages: AtomicU64,
    /// f32 bit pattern; written by the speed sampler only.
    average_speed_bits: AtomicU32,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Workload states ───────────────────────────────────────────

    pub fn set_workload_state(&self, uuid: &str, state: WorkloadState) {
        self.workload_states
            .write()
            .expect("status lock")
            .insert(uuid.to_string(), state);

        let mut history = self.state_history.write().expect("status lock");
        let entries = history.entry(uuid.to_string()).or_default();
        entries.push(state);
        if entries.len() > STATE_HISTORY_LIMIT {
            entries.remove(0);
        }
    }

    /// Recent reported transitions for a workload, oldest first.
    pub fn workload_state_history(&self, uuid: &str) -> Vec<WorkloadState> {
        self.state_history
            .read()
            .expect("status lock")
            .get(uuid)
            .cloned()
            .unwrap_or_default()
    }

    pub fn workload_state(&self, uuid: &str) -> Option<WorkloadState> {
        self.workload_states
            .read()
            .expect("status lock")
            .get(uuid)
            .copied()
    }

    pub fn workload_states(&self) -> HashMap<WorkloadUuid, WorkloadState> {
        self.workload_states.read().expect("status lock").clone()
    }

    pub fn forget_workload(&self, uuid: &str) {
        self.workload_states.write().expect("status lock").remove(uuid);
        self.state_history.write().expect("status lock").remove(uuid);
    }

    // ── Message counters ──────────────────────────────────────────

    pub fn increment_processed_messages(&self) {
        self.processed_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_messages(&self) -> u64 {
        self.processed_messages.load(Ordering::Relaxed)
    }

    pub fn set_processed_messages(&self, count: u64) {
        self.processed_messages.store(count, Ordering::Relaxed);
    }

    pub fn set_average_speed(&self, messages_per_second: f32) {
        self.average_speed_bits
            .store(messages_per_second.to_bits(), Ordering::Relaxed);
    }

    pub fn average_speed(&self) -> f32 {
        f32::from_bits(self.average_speed_bits.load(Ordering::Relaxed))
    }

    // ── Per-workload published counters ───────────────────────────

    pub fn increment_published(&self, uuid: &str) {
        *self
            .published_per_workload
            .write()
            .expect("status lock")
            .entry(uuid.to_string())
            .or_insert(0) += 1;
    }

    pub fn published_messages_per_workload(&self) -> HashMap<WorkloadUuid, u64> {
        self.published_per_workload.read().expect("status lock").clone()
    }

    /// Ensure a zero counter exists for `uuid`.
    pub fn ensure_published_entry(&self, uuid: &str) {
        self.published_per_workload
            .write()
            .expect("status lock")
            .entry(uuid.to_string())
            .or_insert(0);
    }

    /// Drop counters for workloads not in `keep`.
    pub fn retain_published_entries(&self, keep: &[WorkloadUuid]) {
        self.published_per_workload
            .write()
            .expect("status lock")
            .retain(|uuid, _| keep.iter().any(|k| k == uuid));
    }

    // ── Module statuses ───────────────────────────────────────────

    pub fn set_module_status(&self, module: &str, status: ModuleStatus) {
        self.module_statuses
            .write()
            .expect("status lock")
            .insert(module.to_string(), status);
    }

    pub fn module_status(&self, module: &str) -> Option<ModuleStatus> {
        self.module_statuses
            .read()
            .expect("status lock")
            .get(module)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workload_state_round_trip() {
        let status = StatusReporter::new();
        assert!(status.workload_state("w1").is_none());

        status.set_workload_state("w1", WorkloadState::Pulling);
        assert_eq!(status.workload_state("w1"), Some(WorkloadState::Pulling));

        status.set_workload_state("w1", WorkloadState::Running);
        assert_eq!(status.workload_state("w1"), Some(WorkloadState::Running));

        status.forget_workload("w1");
        assert!(status.workload_state("w1").is_none());
    }

    #[test]
    fn history_keeps_reports_in_order() {
        let status = StatusReporter::new();
        status.set_workload_state("w1", WorkloadState::Pulling);
        status.set_workload_state("w1", WorkloadState::Starting);
        status.set_workload_state("w1", WorkloadState::Running);

        assert_eq!(
            status.workload_state_history("w1"),
            vec![
                WorkloadState::Pulling,
                WorkloadState::Starting,
                WorkloadState::Running
            ]
        );
    }

    #[test]
    fn history_is_bounded() {
        let status = StatusReporter::new();
        for _ in 0..50 {
            status.set_workload_state("w1", WorkloadState::Running);
        }
        assert_eq!(status.workload_state_history("w1").len(), 32);
    }

    #[test]
    fn processed_counter_increments() {
        let status = StatusReporter::new();
        status.increment_processed_messages();
        status.increment_processed_messages();
        assert_eq!(status.processed_messages(), 2);

        status.set_processed_messages(10);
        assert_eq!(status.processed_messages(), 10);
    }

    #[test]
    fn average_speed_stores_floats() {
        let status = StatusReporter::new();
        assert_eq!(status.average_speed(), 0.0);
        status.set_average_speed(12.5);
        assert_eq!(status.average_speed(), 12.5);
    }

    #[test]
    fn published_counters_reconcile() {
        let status = StatusReporter::new();
        status.increment_published("w1");
        status.increment_published("w1");
        status.ensure_published_entry("w2");

        let counters = status.published_messages_per_workload();
        assert_eq!(counters["w1"], 2);
        assert_eq!(counters["w2"], 0);

        // w1 departed; only w2 survives.
        status.retain_published_entries(&["w2".to_string()]);
        let counters = status.published_messages_per_workload();
        assert!(!counters.contains_key("w1"));
        assert!(counters.contains_key("w2"));
    }

    #[test]
    fn module_status_round_trip() {
        let status = StatusReporter::new();
        status.set_module_status("message-router", ModuleStatus::Running);
        assert_eq!(
            status.module_status("message-router"),
            Some(ModuleStatus::Running)
        );
        assert!(status.module_status("lifecycle").is_none());
    }
}
