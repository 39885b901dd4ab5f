//! foglet-runtime — capability surface over the container runtime.
//!
//! The lifecycle engine talks to the runtime only through the
//! [`ContainerRuntime`] trait. [`docker::DockerRuntime`] implements it
//! against the local Docker daemon; [`fake::FakeRuntime`] is a
//! scriptable in-memory double for tests.

pub mod docker;
pub mod error;
pub mod fake;

use async_trait::async_trait;

use foglet_core::{Registry, Workload};

pub use docker::DockerRuntime;
pub use error::{RuntimeError, RuntimeResult};

/// A container known to the runtime, keyed back to its workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub image_id: String,
    /// Raw runtime status string, e.g. `"running"` or `"exited"`.
    pub status: String,
}

/// Capability surface consumed by the lifecycle engine.
///
/// Every operation is an explicit async call returning a `Result`;
/// nothing is deferred for the caller to run later.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List all containers managed by this agent.
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>>;

    /// Find the container assigned to a workload uuid, if any.
    async fn container_by_uuid(&self, uuid: &str) -> RuntimeResult<Option<ContainerInfo>>;

    /// Whether the image is present in the local cache.
    async fn find_local_image(&self, image: &str) -> RuntimeResult<bool>;

    /// Pull an image from the given registry.
    async fn pull_image(&self, image: &str, registry: &Registry) -> RuntimeResult<()>;

    /// Create a container for the workload; returns the container id.
    async fn create_container(&self, workload: &Workload, host_ip: &str) -> RuntimeResult<String>;

    async fn start_container(&self, container_id: &str) -> RuntimeResult<()>;

    async fn stop_container(&self, container_id: &str) -> RuntimeResult<()>;

    async fn remove_container(&self, container_id: &str) -> RuntimeResult<()>;

    async fn remove_image(&self, image_id: &str) -> RuntimeResult<()>;

    async fn is_container_running(&self, container_id: &str) -> RuntimeResult<bool>;

    /// Raw status string of a container, `None` when unreported.
    async fn container_status(&self, container_id: &str) -> RuntimeResult<Option<String>>;

    async fn container_ip(&self, container_id: &str) -> RuntimeResult<String>;
}
