//! Domain types shared across the agent.
//!
//! Workloads, registries, routes and receivers are owned by the
//! controller and replaced wholesale on every sync; the agent only
//! mutates the runtime-assigned fields (`container_id`, `container_ip`,
//! `rebuild`, `updating`).

use serde::{Deserialize, Serialize};

/// Opaque controller-assigned workload identifier.
pub type WorkloadUuid = String;

/// Registry id meaning "never contact a remote registry".
pub const CACHE_REGISTRY_ID: i32 = 0;

/// Registry url carrying the same meaning as [`CACHE_REGISTRY_ID`].
pub const FROM_CACHE_URL: &str = "from_cache";

// ── Workload ──────────────────────────────────────────────────────

/// A containerized process managed by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workload {
    pub uuid: WorkloadUuid,
    /// Image reference, e.g. `quay.example/app:1.2`.
    pub image_name: String,
    /// Id of the registry the image is pulled from.
    pub registry_id: i32,
    /// When set together with a non-cache registry, UPDATE purges the
    /// old image along with the container.
    pub rebuild: bool,
    /// Assigned container id; `None` until the container is created.
    pub container_id: Option<String>,
    /// Container IP address on the agent network; `None` until started.
    pub container_ip: Option<String>,
    /// Advisory flag read by planners to skip already-updating workloads.
    pub updating: bool,
    /// Configuration blob served to the workload over the local API.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Workload {
    pub fn new(uuid: impl Into<String>, image_name: impl Into<String>, registry_id: i32) -> Self {
        Self {
            uuid: uuid.into(),
            image_name: image_name.into(),
            registry_id,
            rebuild: false,
            container_id: None,
            container_ip: None,
            updating: false,
            config: serde_json::Value::Null,
        }
    }
}

/// Reported lifecycle state of a workload. The lifecycle engine is the
/// sole writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadState {
    Queued,
    Pulling,
    Starting,
    Running,
    Stopping,
    Stopped,
    Deleting,
    Failed,
    Unknown,
}

// ── Registry ──────────────────────────────────────────────────────

/// A remote image store plus credentials, or the local-cache sentinel.
///
/// Immutable after creation; replaced wholesale on refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Registry {
    pub id: i32,
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// PEM certificate for TLS registries.
    #[serde(default)]
    pub cert: Option<String>,
    #[serde(default)]
    pub dev_mode_enabled: bool,
}

impl Registry {
    /// Whether this registry means "only use the local image cache".
    pub fn is_cache(&self) -> bool {
        self.id == CACHE_REGISTRY_ID || self.url == FROM_CACHE_URL
    }
}

// ── Container tasks ───────────────────────────────────────────────

/// Desired-state transition verbs consumed by the lifecycle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    Add,
    Update,
    Remove,
    RemoveWithCleanUp,
    Stop,
}

/// One unit of work for the lifecycle engine, consumed in FIFO order
/// per workload uuid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTask {
    pub action: TaskAction,
    pub workload_uuid: WorkloadUuid,
}

impl ContainerTask {
    pub fn new(action: TaskAction, workload_uuid: impl Into<String>) -> Self {
        Self {
            action,
            workload_uuid: workload_uuid.into(),
        }
    }
}

// ── Routing ───────────────────────────────────────────────────────

/// Mapping from one producing workload to its receivers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Route {
    pub producer: WorkloadUuid,
    pub receivers: Vec<RouteReceiver>,
}

/// A consuming endpoint of a route: either in-process (`local`) or
/// behind a remote connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteReceiver {
    pub workload_uuid: WorkloadUuid,
    pub local: bool,
    /// Present when `local == false`: where to republish messages.
    #[serde(default)]
    pub connector_producer_config: Option<ConnectorProducerConfig>,
}

impl RouteReceiver {
    pub fn local(uuid: impl Into<String>) -> Self {
        Self {
            workload_uuid: uuid.into(),
            local: true,
            connector_producer_config: None,
        }
    }

    pub fn remote(uuid: impl Into<String>, config: ConnectorProducerConfig) -> Self {
        Self {
            workload_uuid: uuid.into(),
            local: false,
            connector_producer_config: Some(config),
        }
    }
}

// ── Connector ─────────────────────────────────────────────────────

/// Connection parameters for a remote connector broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// PEM certificate used to build the connector trust store.
    #[serde(default)]
    pub cert: Option<String>,
    /// Plaintext transport when enabled.
    #[serde(default)]
    pub dev_mode_enabled: bool,
}

/// Where a non-local receiver's messages are republished.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectorProducerConfig {
    pub connector: ConnectorConfig,
    /// Topic on the remote connector, usually the receiver uuid.
    pub topic: String,
    /// Pass key authorizing publication on the topic.
    #[serde(default)]
    pub pass_key: String,
}
