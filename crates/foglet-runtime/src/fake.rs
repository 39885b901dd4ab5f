//! Scriptable in-memory runtime (for testing).
//!
//! Records every call and lets tests inject failures on specific
//! operations, mirroring how the real daemon misbehaves: pull transport
//! failures, definitive create rejections, image-removal conflicts.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use foglet_core::{Registry, Workload};

use crate::error::{RuntimeError, RuntimeResult};
use crate::{ContainerInfo, ContainerRuntime};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub uuid: String,
    pub image_id: String,
    pub running: bool,
}

#[derive(Default)]
struct State {
    containers: HashMap<String, FakeContainer>,
    local_images: HashSet<String>,
    calls: Vec<String>,
    next_id: u32,
    fail_pull: bool,
    fail_create: bool,
    fail_start: bool,
    image_removal_error: Option<RemovalFailure>,
    status_override: Option<String>,
}

#[derive(Clone, Copy)]
enum RemovalFailure {
    Conflict,
    NotFound,
}

/// In-memory [`ContainerRuntime`] double.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Scripting ─────────────────────────────────────────────────

    /// Every subsequent `pull_image` fails with a transport error.
    pub fn fail_pulls(&self) {
        self.state.lock().expect("fake lock").fail_pull = true;
    }

    /// Every subsequent `create_container` is rejected.
    pub fn fail_creates(&self) {
        self.state.lock().expect("fake lock").fail_create = true;
    }

    /// Every subsequent `start_container` is rejected.
    pub fn fail_starts(&self) {
        self.state.lock().expect("fake lock").fail_start = true;
    }

    /// `remove_image` fails with a conflict (another container still
    /// references the image).
    pub fn fail_image_removal_with_conflict(&self) {
        self.state.lock().expect("fake lock").image_removal_error = Some(RemovalFailure::Conflict);
    }

    /// `remove_image` fails with not-found.
    pub fn fail_image_removal_with_not_found(&self) {
        self.state.lock().expect("fake lock").image_removal_error = Some(RemovalFailure::NotFound);
    }

    /// Force `container_status` to report the given string.
    pub fn set_status(&self, status: &str) {
        self.state.lock().expect("fake lock").status_override = Some(status.to_string());
    }

    /// Mark an image as present in the local cache.
    pub fn put_local_image(&self, image: &str) {
        self.state
            .lock()
            .expect("fake lock")
            .local_images
            .insert(image.to_string());
    }

    /// Seed a pre-existing container for a workload.
    pub fn put_container(&self, uuid: &str, image: &str, running: bool) -> String {
        let mut state = self.state.lock().expect("fake lock");
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.containers.insert(
            uuid.to_string(),
            FakeContainer {
                id: id.clone(),
                uuid: uuid.to_string(),
                image_id: format!("sha:{image}"),
                running,
            },
        );
        id
    }

    // ── Inspection ────────────────────────────────────────────────

    /// Every call made so far, in order, as `"verb argument"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().expect("fake lock").calls.clone()
    }

    /// How many recorded calls start with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .expect("fake lock")
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn container(&self, uuid: &str) -> Option<FakeContainer> {
        self.state
            .lock()
            .expect("fake lock")
            .containers
            .get(uuid)
            .cloned()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().expect("fake lock").containers.len()
    }

    fn record(&self, call: String) {
        self.state.lock().expect("fake lock").calls.push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        self.record("list".to_string());
        let state = self.state.lock().expect("fake lock");
        Ok(state
            .containers
            .values()
            .map(|c| ContainerInfo {
                id: c.id.clone(),
                image_id: c.image_id.clone(),
                status: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }

    async fn container_by_uuid(&self, uuid: &str) -> RuntimeResult<Option<ContainerInfo>> {
        self.record(format!("get {uuid}"));
        let state = self.state.lock().expect("fake lock");
        Ok(state.containers.get(uuid).map(|c| ContainerInfo {
            id: c.id.clone(),
            image_id: c.image_id.clone(),
            status: if c.running { "running" } else { "exited" }.to_string(),
        }))
    }

    async fn find_local_image(&self, image: &str) -> RuntimeResult<bool> {
        self.record(format!("find_local_image {image}"));
        Ok(self
            .state
            .lock()
            .expect("fake lock")
            .local_images
            .contains(image))
    }

    async fn pull_image(&self, image: &str, _registry: &Registry) -> RuntimeResult<()> {
        self.record(format!("pull {image}"));
        let mut state = self.state.lock().expect("fake lock");
        if state.fail_pull {
            return Err(RuntimeError::Unavailable("pull transport failure".to_string()));
        }
        state.local_images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, workload: &Workload, _host_ip: &str) -> RuntimeResult<String> {
        self.record(format!("create {}", workload.uuid));
        let mut state = self.state.lock().expect("fake lock");
        if state.fail_create {
            return Err(RuntimeError::Rejected("create rejected".to_string()));
        }
        if state.containers.contains_key(&workload.uuid) {
            return Err(RuntimeError::Conflict(format!(
                "container already exists for {}",
                workload.uuid
            )));
        }
        state.next_id += 1;
        let id = format!("ctr-{}", state.next_id);
        state.containers.insert(
            workload.uuid.clone(),
            FakeContainer {
                id: id.clone(),
                uuid: workload.uuid.clone(),
                image_id: format!("sha:{}", workload.image_name),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(format!("start {container_id}"));
        let mut state = self.state.lock().expect("fake lock");
        if state.fail_start {
            return Err(RuntimeError::Rejected("start rejected".to_string()));
        }
        let container = state
            .containers
            .values_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(format!("stop {container_id}"));
        let mut state = self.state.lock().expect("fake lock");
        let container = state
            .containers
            .values_mut()
            .find(|c| c.id == container_id)
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        container.running = false;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> RuntimeResult<()> {
        self.record(format!("remove_container {container_id}"));
        let mut state = self.state.lock().expect("fake lock");
        let uuid = state
            .containers
            .values()
            .find(|c| c.id == container_id)
            .map(|c| c.uuid.clone())
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))?;
        state.containers.remove(&uuid);
        Ok(())
    }

    async fn remove_image(&self, image_id: &str) -> RuntimeResult<()> {
        self.record(format!("remove_image {image_id}"));
        let mut state = self.state.lock().expect("fake lock");
        match state.image_removal_error {
            Some(RemovalFailure::Conflict) => {
                Err(RuntimeError::Conflict("image is in use".to_string()))
            }
            Some(RemovalFailure::NotFound) => {
                Err(RuntimeError::NotFound(image_id.to_string()))
            }
            None => {
                let image = image_id.strip_prefix("sha:").unwrap_or(image_id).to_string();
                state.local_images.remove(&image);
                Ok(())
            }
        }
    }

    async fn is_container_running(&self, container_id: &str) -> RuntimeResult<bool> {
        self.record(format!("is_running {container_id}"));
        let state = self.state.lock().expect("fake lock");
        Ok(state
            .containers
            .values()
            .any(|c| c.id == container_id && c.running))
    }

    async fn container_status(&self, container_id: &str) -> RuntimeResult<Option<String>> {
        self.record(format!("status {container_id}"));
        let state = self.state.lock().expect("fake lock");
        if let Some(ref status) = state.status_override {
            return Ok(Some(status.clone()));
        }
        Ok(state
            .containers
            .values()
            .find(|c| c.id == container_id)
            .map(|c| if c.running { "running" } else { "exited" }.to_string()))
    }

    async fn container_ip(&self, container_id: &str) -> RuntimeResult<String> {
        self.record(format!("ip {container_id}"));
        let state = self.state.lock().expect("fake lock");
        state
            .containers
            .values()
            .find(|c| c.id == container_id)
            .map(|c| format!("172.20.0.{}", c.id.trim_start_matches("ctr-")))
            .ok_or_else(|| RuntimeError::NotFound(container_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foglet_core::Workload;

    fn registry() -> Registry {
        Registry {
            id: 5,
            url: "quay.example/ns".to_string(),
            username: String::new(),
            password: String::new(),
            cert: None,
            dev_mode_enabled: false,
        }
    }

    #[tokio::test]
    async fn create_then_start_marks_running() {
        let runtime = FakeRuntime::new();
        let workload = Workload::new("w1", "img:1", 5);

        let id = runtime.create_container(&workload, "10.0.0.1").await.unwrap();
        assert!(!runtime.is_container_running(&id).await.unwrap());

        runtime.start_container(&id).await.unwrap();
        assert!(runtime.is_container_running(&id).await.unwrap());
    }

    #[tokio::test]
    async fn pull_populates_local_cache() {
        let runtime = FakeRuntime::new();
        assert!(!runtime.find_local_image("img:1").await.unwrap());
        runtime.pull_image("img:1", &registry()).await.unwrap();
        assert!(runtime.find_local_image("img:1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_pull_leaves_cache_untouched() {
        let runtime = FakeRuntime::new();
        runtime.fail_pulls();
        assert!(runtime.pull_image("img:1", &registry()).await.is_err());
        assert!(!runtime.find_local_image("img:1").await.unwrap());
    }

    #[tokio::test]
    async fn call_log_records_in_order() {
        let runtime = FakeRuntime::new();
        let workload = Workload::new("w1", "img:1", 5);
        runtime.create_container(&workload, "10.0.0.1").await.unwrap();
        runtime.container_by_uuid("w1").await.unwrap();

        assert_eq!(runtime.calls(), vec!["create w1", "get w1"]);
        assert_eq!(runtime.call_count("create"), 1);
    }

    #[tokio::test]
    async fn remove_container_forgets_the_workload() {
        let runtime = FakeRuntime::new();
        let id = runtime.put_container("w1", "img:1", true);
        runtime.remove_container(&id).await.unwrap();
        assert!(runtime.container("w1").is_none());
    }
}
