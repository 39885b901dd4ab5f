//! foglet-registry — the workload registry.
//!
//! Holds the latest desired and the current workload sets, the routing
//! table and the registry list, all controller-owned. Reads return
//! owned snapshots; writes replace whole snapshots. The agent's only
//! in-place mutations are the runtime-assigned workload fields, applied
//! through [`WorkloadRegistry::update_latest`].

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tracing::debug;

use foglet_core::{Registry, Route, Workload, WorkloadUuid};

#[derive(Default)]
struct Inner {
    latest_workloads: Vec<Workload>,
    current_workloads: Vec<Workload>,
    routes: HashMap<WorkloadUuid, Route>,
    registries: Vec<Registry>,
}

/// Shared store of controller-declared state.
#[derive(Default)]
pub struct WorkloadRegistry {
    inner: RwLock<Inner>,
    /// Config-change subscribers (control websockets), keyed by uuid.
    config_listeners: RwLock<HashMap<WorkloadUuid, mpsc::UnboundedSender<()>>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Snapshots ─────────────────────────────────────────────────

    pub fn latest_workloads(&self) -> Vec<Workload> {
        self.inner.read().expect("registry lock").latest_workloads.clone()
    }

    pub fn current_workloads(&self) -> Vec<Workload> {
        self.inner.read().expect("registry lock").current_workloads.clone()
    }

    pub fn routes(&self) -> HashMap<WorkloadUuid, Route> {
        self.inner.read().expect("registry lock").routes.clone()
    }

    pub fn registries(&self) -> Vec<Registry> {
        self.inner.read().expect("registry lock").registries.clone()
    }

    // ── Whole-snapshot replacement ────────────────────────────────

    pub fn set_latest_workloads(&self, workloads: Vec<Workload>) {
        let mut inner = self.inner.write().expect("registry lock");
        debug!(count = workloads.len(), "latest workloads replaced");
        inner.latest_workloads = workloads;
    }

    pub fn set_current_workloads(&self, workloads: Vec<Workload>) {
        let mut inner = self.inner.write().expect("registry lock");
        inner.current_workloads = workloads;
    }

    pub fn set_routes(&self, routes: HashMap<WorkloadUuid, Route>) {
        let mut inner = self.inner.write().expect("registry lock");
        debug!(count = routes.len(), "routes replaced");
        inner.routes = routes;
    }

    pub fn set_registries(&self, registries: Vec<Registry>) {
        let mut inner = self.inner.write().expect("registry lock");
        inner.registries = registries;
    }

    // ── Lookups ───────────────────────────────────────────────────

    pub fn find_latest_by_uuid(&self, uuid: &str) -> Option<Workload> {
        self.inner
            .read()
            .expect("registry lock")
            .latest_workloads
            .iter()
            .find(|w| w.uuid == uuid)
            .cloned()
    }

    pub fn find_current_by_uuid(&self, uuid: &str) -> Option<Workload> {
        self.inner
            .read()
            .expect("registry lock")
            .current_workloads
            .iter()
            .find(|w| w.uuid == uuid)
            .cloned()
    }

    pub fn registry_by_id(&self, id: i32) -> Option<Registry> {
        self.inner
            .read()
            .expect("registry lock")
            .registries
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// Whether `uuid` appears in the given workload list.
    pub fn workload_exists(list: &[Workload], uuid: &str) -> bool {
        list.iter().any(|w| w.uuid == uuid)
    }

    // ── Field mutation ────────────────────────────────────────────

    /// Apply `mutate` to the latest workload with `uuid`. Returns false
    /// when no such workload exists.
    pub fn update_latest<F>(&self, uuid: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Workload),
    {
        let mut inner = self.inner.write().expect("registry lock");
        match inner.latest_workloads.iter_mut().find(|w| w.uuid == uuid) {
            Some(workload) => {
                mutate(workload);
                true
            }
            None => false,
        }
    }

    /// Replace a workload's config blob and notify its control socket.
    pub fn set_workload_config(&self, uuid: &str, config: serde_json::Value) -> bool {
        let updated = self.update_latest(uuid, |w| w.config = config);
        if updated {
            self.notify_config_changed(uuid);
        }
        updated
    }

    // ── Config-change notifications ───────────────────────────────

    /// Register a control-socket sender for config-change pings.
    pub fn subscribe_config_changes(&self, uuid: &str, sink: mpsc::UnboundedSender<()>) {
        self.config_listeners
            .write()
            .expect("registry lock")
            .insert(uuid.to_string(), sink);
    }

    pub fn unsubscribe_config_changes(&self, uuid: &str) {
        self.config_listeners
            .write()
            .expect("registry lock")
            .remove(uuid);
    }

    fn notify_config_changed(&self, uuid: &str) {
        let mut listeners = self.config_listeners.write().expect("registry lock");
        if let Some(sink) = listeners.get(uuid) {
            if sink.send(()).is_err() {
                listeners.remove(uuid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(uuid: &str) -> Workload {
        Workload::new(uuid, format!("{uuid}-img:1"), 5)
    }

    #[test]
    fn snapshots_are_owned_copies() {
        let registry = WorkloadRegistry::new();
        registry.set_latest_workloads(vec![workload("w1")]);

        let mut snapshot = registry.latest_workloads();
        snapshot[0].uuid = "mutated".to_string();

        assert_eq!(registry.latest_workloads()[0].uuid, "w1");
    }

    #[test]
    fn find_latest_by_uuid() {
        let registry = WorkloadRegistry::new();
        registry.set_latest_workloads(vec![workload("w1"), workload("w2")]);

        assert_eq!(registry.find_latest_by_uuid("w2").unwrap().uuid, "w2");
        assert!(registry.find_latest_by_uuid("ghost").is_none());
    }

    #[test]
    fn current_set_is_independent_of_latest() {
        let registry = WorkloadRegistry::new();
        registry.set_latest_workloads(vec![workload("w1"), workload("w2")]);
        registry.set_current_workloads(vec![workload("w1")]);

        assert!(registry.find_current_by_uuid("w1").is_some());
        assert!(registry.find_current_by_uuid("w2").is_none());
        assert_eq!(registry.current_workloads().len(), 1);
        assert_eq!(registry.latest_workloads().len(), 2);
    }

    #[test]
    fn registry_lookup_by_id() {
        let registry = WorkloadRegistry::new();
        registry.set_registries(vec![Registry {
            id: 5,
            url: "quay.example/ns".to_string(),
            username: String::new(),
            password: String::new(),
            cert: None,
            dev_mode_enabled: false,
        }]);

        assert!(registry.registry_by_id(5).is_some());
        assert!(registry.registry_by_id(42).is_none());
    }

    #[test]
    fn workload_exists_scans_a_list() {
        let list = vec![workload("w1")];
        assert!(WorkloadRegistry::workload_exists(&list, "w1"));
        assert!(!WorkloadRegistry::workload_exists(&list, "w2"));
    }

    #[test]
    fn update_latest_mutates_in_place() {
        let registry = WorkloadRegistry::new();
        registry.set_latest_workloads(vec![workload("w1")]);

        let updated = registry.update_latest("w1", |w| {
            w.container_id = Some("ctr-1".to_string());
            w.rebuild = false;
        });
        assert!(updated);
        assert_eq!(
            registry.find_latest_by_uuid("w1").unwrap().container_id.as_deref(),
            Some("ctr-1")
        );

        assert!(!registry.update_latest("ghost", |_| {}));
    }

    #[test]
    fn config_change_notifies_subscriber() {
        let registry = WorkloadRegistry::new();
        registry.set_latest_workloads(vec![workload("w1")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.subscribe_config_changes("w1", tx);

        assert!(registry.set_workload_config("w1", serde_json::json!({"rate": 2})));
        assert!(rx.try_recv().is_ok());

        registry.unsubscribe_config_changes("w1");
        registry.set_workload_config("w1", serde_json::json!({"rate": 3}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dead_subscriber_is_pruned_on_notify() {
        let registry = WorkloadRegistry::new();
        registry.set_latest_workloads(vec![workload("w1")]);

        let (tx, rx) = mpsc::unbounded_channel();
        registry.subscribe_config_changes("w1", tx);
        drop(rx);

        registry.set_workload_config("w1", serde_json::json!({}));
        assert!(registry
            .config_listeners
            .read()
            .expect("registry lock")
            .is_empty());
    }
}
