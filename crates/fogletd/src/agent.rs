//! The top-level agent context.
//!
//! Every subsystem is an explicitly constructed value held here and
//! passed downward; tests build fresh contexts with a fake runtime.

use std::sync::Arc;

use tokio::sync::mpsc;

use foglet_broker::BrokerServer;
use foglet_connector::ConnectorPool;
use foglet_core::{AgentConfig, ContainerTask};
use foglet_lifecycle::LifecycleEngine;
use foglet_registry::WorkloadRegistry;
use foglet_routing::MessageRouter;
use foglet_runtime::ContainerRuntime;
use foglet_status::StatusReporter;

/// Depth of the container-task queue between planner and dispatcher.
const TASK_QUEUE_DEPTH: usize = 256;

/// All long-lived subsystems of one agent process.
pub struct Agent {
    pub config: AgentConfig,
    pub registry: Arc<WorkloadRegistry>,
    pub status: Arc<StatusReporter>,
    pub connectors: Arc<ConnectorPool>,
    pub router: Arc<MessageRouter>,
    pub lifecycle: Arc<LifecycleEngine>,
    /// Producer side of the container-task queue.
    pub task_tx: mpsc::Sender<ContainerTask>,
    /// Consumer side, taken once by the dispatcher.
    pub task_rx: Option<mpsc::Receiver<ContainerTask>>,
}

impl Agent {
    /// Wire up all subsystems around the given container runtime.
    pub fn build(config: AgentConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let registry = Arc::new(WorkloadRegistry::new());
        let status = Arc::new(StatusReporter::new());
        let connectors = Arc::new(ConnectorPool::new(
            config.connector.trust_store_dir.clone(),
        ));

        let broker = BrokerServer::new(config.broker.memory_limit_mb * 1024 * 1024);
        let router = Arc::new(MessageRouter::new(
            broker,
            registry.clone(),
            status.clone(),
            connectors.clone(),
        ));

        let host_ip = config
            .agent
            .host_ip
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let lifecycle = Arc::new(LifecycleEngine::new(
            runtime,
            registry.clone(),
            status.clone(),
            host_ip,
        ));

        let (task_tx, task_rx) = mpsc::channel(TASK_QUEUE_DEPTH);

        Self {
            config,
            registry,
            status,
            connectors,
            router,
            lifecycle,
            task_tx,
            task_rx: Some(task_rx),
        }
    }

    /// The API state shared with the local HTTP server.
    pub fn api_state(&self) -> foglet_api::ApiState {
        foglet_api::ApiState {
            router: self.router.clone(),
            registry: self.registry.clone(),
            status: self.status.clone(),
            restblue_url: self.config.api.restblue_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foglet_runtime::fake::FakeRuntime;

    #[test]
    fn build_wires_a_complete_context() {
        let mut agent = Agent::build(AgentConfig::default(), Arc::new(FakeRuntime::new()));
        assert!(agent.task_rx.take().is_some());
        // The queue survives the context being moved around.
        assert!(agent.task_tx.try_send(ContainerTask::new(
            foglet_core::TaskAction::Add,
            "w1"
        )).is_ok());
    }
}
