//! The lifecycle engine: command dispatch and the per-workload state
//! machine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use foglet_core::{ContainerTask, TaskAction, Workload, WorkloadState, CACHE_REGISTRY_ID};
use foglet_registry::WorkloadRegistry;
use foglet_runtime::ContainerRuntime;
use foglet_status::StatusReporter;

use crate::error::{LifecycleError, LifecycleResult};

/// Drives container tasks against the runtime.
pub struct LifecycleEngine {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Arc<WorkloadRegistry>,
    status: Arc<StatusReporter>,
    /// Host IP handed to created containers.
    host_ip: String,
    /// Process-wide removal serialization.
    delete_lock: Mutex<()>,
    /// Per-uuid command ordering; tokio mutexes queue waiters FIFO.
    uuid_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        registry: Arc<WorkloadRegistry>,
        status: Arc<StatusReporter>,
        host_ip: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            registry,
            status,
            host_ip: host_ip.into(),
            delete_lock: Mutex::new(()),
            uuid_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Execute one container task. Safe to replay: ADD of an existing
    /// container and REMOVE of a missing one are no-ops.
    pub async fn execute(&self, task: ContainerTask) -> LifecycleResult<()> {
        let serial = self.uuid_lock(&task.workload_uuid);
        let _ordered = serial.lock().await;

        info!(uuid = %task.workload_uuid, action = ?task.action, "executing container task");
        match task.action {
            TaskAction::Add => match self.registry.find_latest_by_uuid(&task.workload_uuid) {
                Some(workload) => self.add_container(workload).await,
                None => Ok(()),
            },
            TaskAction::Update => match self.registry.find_latest_by_uuid(&task.workload_uuid) {
                Some(workload) => self.update_container(workload).await,
                None => Ok(()),
            },
            TaskAction::Remove => self.remove_container_by_uuid(&task.workload_uuid, false).await,
            TaskAction::RemoveWithCleanUp => {
                self.remove_container_by_uuid(&task.workload_uuid, true).await
            }
            TaskAction::Stop => self.stop_container(&task.workload_uuid).await,
        }
    }

    fn uuid_lock(&self, uuid: &str) -> Arc<Mutex<()>> {
        self.uuid_locks
            .lock()
            .expect("uuid locks")
            .entry(uuid.to_string())
            .or_default()
            .clone()
    }

    // ── ADD ───────────────────────────────────────────────────────

    async fn add_container(&self, workload: Workload) -> LifecycleResult<()> {
        if self.runtime.container_by_uuid(&workload.uuid).await?.is_some() {
            return Ok(());
        }
        self.create_container(workload, true).await
    }

    // ── UPDATE ────────────────────────────────────────────────────

    async fn update_container(&self, workload: Workload) -> LifecycleResult<()> {
        let uuid = workload.uuid.clone();
        self.registry.update_latest(&uuid, |w| w.updating = true);

        // Rebuild against a non-cache registry is the one condition
        // under which the old image is purged along with the container.
        let with_clean_up = workload.rebuild && workload.registry_id != CACHE_REGISTRY_ID;

        let result = async {
            self.remove_container_by_uuid(&uuid, with_clean_up).await?;
            let fresh = self
                .registry
                .find_latest_by_uuid(&uuid)
                .unwrap_or(workload);
            self.create_container(fresh, true).await
        }
        .await;

        self.registry.update_latest(&uuid, |w| w.updating = false);
        result
    }

    // ── Create ────────────────────────────────────────────────────

    async fn create_container(&self, workload: Workload, pull_image: bool) -> LifecycleResult<()> {
        let uuid = workload.uuid.clone();
        self.status.set_workload_state(&uuid, WorkloadState::Pulling);

        let registry = self
            .registry
            .registry_by_id(workload.registry_id)
            .ok_or_else(|| {
                self.status.set_workload_state(&uuid, WorkloadState::Failed);
                LifecycleError::Config(workload.registry_id)
            })?;

        if pull_image && !registry.is_cache() {
            match self
                .runtime
                .pull_image(&workload.image_name, &registry)
                .await
            {
                Ok(()) => {
                    info!(%uuid, image = %workload.image_name, "image pulled");
                }
                Err(e) => {
                    // Not fatal: retry the create from the local cache.
                    warn!(
                        %uuid,
                        image = %workload.image_name,
                        error = %e,
                        "unable to pull image from registry, trying local cache"
                    );
                    let cached = match self.runtime.find_local_image(&workload.image_name).await {
                        Ok(found) => found,
                        Err(e) => {
                            warn!(%uuid, error = %e, "local image lookup failed");
                            false
                        }
                    };
                    if !cached {
                        self.status.set_workload_state(&uuid, WorkloadState::Failed);
                        return Err(LifecycleError::ImageUnavailable(workload.image_name));
                    }
                }
            }
        }

        self.status.set_workload_state(&uuid, WorkloadState::Starting);

        let container_id = self
            .runtime
            .create_container(&workload, &self.host_ip)
            .await
            .map_err(|e| {
                self.status.set_workload_state(&uuid, WorkloadState::Failed);
                LifecycleError::Create(e)
            })?;

        let container_ip = match self.runtime.container_ip(&container_id).await {
            Ok(ip) => Some(ip),
            Err(e) => {
                warn!(%uuid, error = %e, "container ip unavailable after create");
                None
            }
        };

        self.registry.update_latest(&uuid, |w| {
            w.container_id = Some(container_id.clone());
            w.container_ip = container_ip.clone();
            w.rebuild = false;
        });
        info!(%uuid, container_id = %container_id, "container created");

        self.start_container(&uuid, &container_id).await;
        Ok(())
    }

    // ── Start ─────────────────────────────────────────────────────

    /// Start failures do not abort the enclosing composite; the
    /// supervisor re-drives from desired state on the next tick.
    async fn start_container(&self, uuid: &str, container_id: &str) {
        let start_result = async {
            if !self.runtime.is_container_running(container_id).await? {
                self.runtime.start_container(container_id).await?;
            }
            self.runtime.container_status(container_id).await
        }
        .await;

        match start_result {
            Ok(observed) => {
                let observed = observed.unwrap_or_else(|| "unknown".to_string());
                info!(%uuid, container_id, status = %observed, "container started");

                match self.runtime.container_ip(container_id).await {
                    Ok(ip) => {
                        self.registry
                            .update_latest(uuid, |w| w.container_ip = Some(ip));
                    }
                    Err(e) => warn!(%uuid, error = %e, "container ip refresh failed"),
                }

                let state = match observed.as_str() {
                    "running" => WorkloadState::Running,
                    "unknown" => WorkloadState::Unknown,
                    _ => WorkloadState::Failed,
                };
                self.status.set_workload_state(uuid, state);
            }
            Err(e) => {
                error!(%uuid, container_id, error = %e, "container start failed");
                self.status.set_workload_state(uuid, WorkloadState::Failed);
            }
        }
    }

    // ── Stop ──────────────────────────────────────────────────────

    /// Best-effort stop: runtime failures are logged, never returned.
    async fn stop_container(&self, uuid: &str) -> LifecycleResult<()> {
        if let Some(container) = self.runtime.container_by_uuid(uuid).await? {
            self.status.set_workload_state(uuid, WorkloadState::Stopping);
            if let Err(e) = self.runtime.stop_container(&container.id).await {
                error!(%uuid, container_id = %container.id, error = %e, "container stop failed");
            }
        }
        self.status.set_workload_state(uuid, WorkloadState::Stopped);
        Ok(())
    }

    // ── Remove ────────────────────────────────────────────────────

    async fn remove_container_by_uuid(&self, uuid: &str, with_clean_up: bool) -> LifecycleResult<()> {
        let _serialized = self.delete_lock.lock().await;

        let Some(container) = self.runtime.container_by_uuid(uuid).await? else {
            self.status.set_workload_state(uuid, WorkloadState::Stopped);
            return Ok(());
        };

        self.status.set_workload_state(uuid, WorkloadState::Deleting);
        self.stop_container(uuid).await?;
        self.remove_container(uuid, &container.id, &container.image_id, with_clean_up)
            .await
    }

    async fn remove_container(
        &self,
        uuid: &str,
        container_id: &str,
        image_id: &str,
        with_clean_up: bool,
    ) -> LifecycleResult<()> {
        self.runtime.remove_container(container_id).await?;
        info!(%uuid, container_id, "container removed");

        if with_clean_up {
            // Conflicts (another container still references the image)
            // and not-found are expected here and never fail the remove.
            if let Err(e) = self.runtime.remove_image(image_id).await {
                warn!(%uuid, image_id, error = %e, "image cleanup skipped");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foglet_core::Registry;
    use foglet_runtime::fake::FakeRuntime;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        registry: Arc<WorkloadRegistry>,
        status: Arc<StatusReporter>,
        engine: LifecycleEngine,
    }

    fn remote_registry(id: i32) -> Registry {
        Registry {
            id,
            url: "quay.example/ns".to_string(),
            username: String::new(),
            password: String::new(),
            cert: None,
            dev_mode_enabled: false,
        }
    }

    fn harness(workloads: Vec<Workload>, registries: Vec<Registry>) -> Harness {
        let runtime = Arc::new(FakeRuntime::new());
        let registry = Arc::new(WorkloadRegistry::new());
        registry.set_latest_workloads(workloads);
        registry.set_registries(registries);
        let status = Arc::new(StatusReporter::new());
        let engine = LifecycleEngine::new(
            runtime.clone(),
            registry.clone(),
            status.clone(),
            "10.0.0.1",
        );
        Harness {
            runtime,
            registry,
            status,
            engine,
        }
    }

    fn task(action: TaskAction, uuid: &str) -> ContainerTask {
        ContainerTask::new(action, uuid)
    }

    #[tokio::test]
    async fn add_pulls_creates_and_starts() {
        let h = harness(
            vec![Workload::new("w1", "img:1", 5)],
            vec![remote_registry(5)],
        );

        h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("pull"), 1);
        assert_eq!(h.runtime.call_count("create"), 1);
        assert_eq!(
            h.status.workload_state_history("w1"),
            vec![
                WorkloadState::Pulling,
                WorkloadState::Starting,
                WorkloadState::Running
            ]
        );
        assert!(h.runtime.container("w1").unwrap().running);
        let stored = h.registry.find_latest_by_uuid("w1").unwrap();
        assert!(stored.container_id.is_some());
        assert!(stored.container_ip.is_some());
    }

    #[tokio::test]
    async fn add_with_pull_failure_falls_back_to_cache() {
        let h = harness(
            vec![Workload::new("w1", "img:1", 5)],
            vec![remote_registry(5)],
        );
        h.runtime.fail_pulls();
        h.runtime.put_local_image("img:1");

        h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap();

        // One create attempt exactly, on the fallback path.
        assert_eq!(h.runtime.call_count("create"), 1);
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Running));
        assert!(!h.registry.find_latest_by_uuid("w1").unwrap().rebuild);
    }

    #[tokio::test]
    async fn add_with_pull_failure_and_no_cache_fails() {
        let h = harness(
            vec![Workload::new("w1", "img:1", 5)],
            vec![remote_registry(5)],
        );
        h.runtime.fail_pulls();

        let err = h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::ImageUnavailable(_)));
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Failed));
        assert_eq!(h.runtime.call_count("create"), 0);
    }

    #[tokio::test]
    async fn add_for_existing_container_is_a_no_op() {
        let h = harness(
            vec![Workload::new("w1", "img:1", 5)],
            vec![remote_registry(5)],
        );
        h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("pull"), 0);
        assert_eq!(h.runtime.call_count("create"), 0);
    }

    #[tokio::test]
    async fn add_for_unknown_uuid_is_a_no_op() {
        let h = harness(vec![], vec![remote_registry(5)]);
        h.engine.execute(task(TaskAction::Add, "ghost")).await.unwrap();
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn add_without_registry_config_fails() {
        let h = harness(vec![Workload::new("w1", "img:1", 9)], vec![]);
        let err = h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Config(9)));
    }

    #[tokio::test]
    async fn cache_registry_skips_the_pull() {
        let mut cache = remote_registry(5);
        cache.url = "from_cache".to_string();
        let h = harness(vec![Workload::new("w1", "img:1", 5)], vec![cache]);

        h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("pull"), 0);
        assert_eq!(h.runtime.call_count("create"), 1);
    }

    #[tokio::test]
    async fn update_with_rebuild_cleans_up_the_old_image() {
        let mut workload = Workload::new("w1", "img:2", 42);
        workload.rebuild = true;
        let h = harness(vec![workload], vec![remote_registry(42)]);
        h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Update, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("remove_container"), 1);
        assert_eq!(h.runtime.call_count("remove_image"), 1);
        assert_eq!(h.runtime.call_count("create"), 1);
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Running));

        let stored = h.registry.find_latest_by_uuid("w1").unwrap();
        assert!(!stored.updating);
        assert!(!stored.rebuild);
    }

    #[tokio::test]
    async fn update_without_rebuild_keeps_the_image() {
        let h = harness(
            vec![Workload::new("w1", "img:2", 42)],
            vec![remote_registry(42)],
        );
        h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Update, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("remove_container"), 1);
        assert_eq!(h.runtime.call_count("remove_image"), 0);
    }

    #[tokio::test]
    async fn update_with_cache_registry_never_cleans_up() {
        let mut workload = Workload::new("w1", "img:2", CACHE_REGISTRY_ID);
        workload.rebuild = true;
        let mut cache = remote_registry(CACHE_REGISTRY_ID);
        cache.url = "from_cache".to_string();
        let h = harness(vec![workload], vec![cache]);
        h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Update, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("remove_image"), 0);
    }

    #[tokio::test]
    async fn update_clears_updating_even_on_failure() {
        let h = harness(
            vec![Workload::new("w1", "img:2", 42)],
            vec![remote_registry(42)],
        );
        h.runtime.put_container("w1", "img:1", true);
        h.runtime.fail_creates();

        let result = h.engine.execute(task(TaskAction::Update, "w1")).await;
        assert!(result.is_err());
        assert!(!h.registry.find_latest_by_uuid("w1").unwrap().updating);
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Failed));
    }

    #[tokio::test]
    async fn remove_of_unknown_uuid_reports_stopped_once() {
        let h = harness(vec![], vec![]);

        h.engine.execute(task(TaskAction::Remove, "ghost")).await.unwrap();

        assert_eq!(h.runtime.calls(), vec!["get ghost"]);
        assert_eq!(
            h.status.workload_state_history("ghost"),
            vec![WorkloadState::Stopped]
        );
    }

    #[tokio::test]
    async fn remove_stops_then_removes() {
        let h = harness(vec![], vec![]);
        let id = h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Remove, "w1")).await.unwrap();

        assert!(h.runtime.container("w1").is_none());
        assert_eq!(h.runtime.call_count("remove_image"), 0);
        let history = h.status.workload_state_history("w1");
        assert_eq!(
            history,
            vec![
                WorkloadState::Deleting,
                WorkloadState::Stopping,
                WorkloadState::Stopped
            ]
        );
        // The stop targeted the actual container.
        assert!(h.runtime.calls().contains(&format!("stop {id}")));
    }

    #[tokio::test]
    async fn remove_twice_equals_remove_once() {
        let h = harness(vec![], vec![]);
        h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Remove, "w1")).await.unwrap();
        let removes_after_first = h.runtime.call_count("remove_container");
        h.engine.execute(task(TaskAction::Remove, "w1")).await.unwrap();

        assert_eq!(h.runtime.call_count("remove_container"), removes_after_first);
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Stopped));
    }

    #[tokio::test]
    async fn concurrent_removals_issue_one_runtime_remove() {
        let h = harness(vec![], vec![]);
        h.runtime.put_container("w1", "img:1", true);
        let engine = &h.engine;

        let (a, b) = tokio::join!(
            engine.execute(task(TaskAction::Remove, "w1")),
            engine.execute(task(TaskAction::RemoveWithCleanUp, "w1")),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(h.runtime.call_count("remove_container"), 1);
    }

    #[tokio::test]
    async fn cleanup_image_conflict_is_only_a_warning() {
        let h = harness(vec![], vec![]);
        h.runtime.put_container("w1", "img:1", true);
        h.runtime.fail_image_removal_with_conflict();

        h.engine
            .execute(task(TaskAction::RemoveWithCleanUp, "w1"))
            .await
            .unwrap();

        assert!(h.runtime.container("w1").is_none());
    }

    #[tokio::test]
    async fn stop_reports_stopping_then_stopped() {
        let h = harness(vec![], vec![]);
        h.runtime.put_container("w1", "img:1", true);

        h.engine.execute(task(TaskAction::Stop, "w1")).await.unwrap();

        assert!(!h.runtime.container("w1").unwrap().running);
        assert_eq!(
            h.status.workload_state_history("w1"),
            vec![WorkloadState::Stopping, WorkloadState::Stopped]
        );
        // Stop never removes the container.
        assert_eq!(h.runtime.call_count("remove_container"), 0);
    }

    #[tokio::test]
    async fn start_failure_marks_failed_without_aborting() {
        let h = harness(
            vec![Workload::new("w1", "img:1", 5)],
            vec![remote_registry(5)],
        );
        h.runtime.fail_starts();

        // The composite completes; the failure shows up as state.
        h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap();
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Failed));
    }

    #[tokio::test]
    async fn unexpected_observed_status_maps_to_state() {
        let h = harness(
            vec![Workload::new("w1", "img:1", 5)],
            vec![remote_registry(5)],
        );
        h.runtime.set_status("unknown");

        h.engine.execute(task(TaskAction::Add, "w1")).await.unwrap();
        assert_eq!(h.status.workload_state("w1"), Some(WorkloadState::Unknown));
    }
}
