//! Container-task dispatcher.
//!
//! Pulls tasks off the planner queue and hands them to the lifecycle
//! engine. Tasks for one workload uuid go through a per-uuid worker so
//! they run in submission order; tasks for distinct uuids run
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use foglet_core::{ContainerTask, WorkloadState};
use foglet_lifecycle::LifecycleEngine;
use foglet_status::StatusReporter;

/// Run the dispatcher until the queue closes or shutdown is signaled.
pub async fn run_dispatcher(
    engine: Arc<LifecycleEngine>,
    status: Arc<StatusReporter>,
    mut tasks: mpsc::Receiver<ContainerTask>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut workers: HashMap<String, mpsc::UnboundedSender<ContainerTask>> = HashMap::new();

    loop {
        tokio::select! {
            task = tasks.recv() => {
                let Some(task) = task else { break };
                status.set_workload_state(&task.workload_uuid, WorkloadState::Queued);
                let worker = workers
                    .entry(task.workload_uuid.clone())
                    .or_insert_with(|| spawn_worker(engine.clone()));
                if worker.send(task.clone()).is_err() {
                    // Worker died; replace it and retry once.
                    let worker = spawn_worker(engine.clone());
                    let _ = worker.send(task.clone());
                    workers.insert(task.workload_uuid.clone(), worker);
                }
            }
            _ = shutdown.changed() => {
                info!("task dispatcher shutting down");
                break;
            }
        }
    }
    Ok(())
}

/// One sequential worker per workload uuid.
fn spawn_worker(engine: Arc<LifecycleEngine>) -> mpsc::UnboundedSender<ContainerTask> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ContainerTask>();
    tokio::spawn(async move {
        while let Some(task) = rx.recv().await {
            let uuid = task.workload_uuid.clone();
            let action = task.action;
            if let Err(e) = engine.execute(task).await {
                error!(%uuid, ?action, error = %e, "container task failed");
            }
        }
    });
    tx
}
