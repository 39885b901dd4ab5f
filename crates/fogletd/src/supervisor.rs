//! Module supervisor.
//!
//! Each long-running component is started through [`Supervisor::
//! supervise`]; on error the task's module status is recorded as
//! stopped, a fixed backoff elapses, and the component restarts.
//! Individual task failures never cancel peers. Shutdown propagates
//! via the shared watch channel and stops every loop at its next
//! sleep boundary.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use foglet_status::{ModuleStatus, StatusReporter};

/// Delay before restarting a failed module.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Starts and restarts the agent's long-running components.
pub struct Supervisor {
    status: Arc<StatusReporter>,
    shutdown: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(status: Arc<StatusReporter>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            status,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Run `factory`'s future under supervision. The factory is called
    /// again for every restart.
    pub fn supervise<F, Fut>(&mut self, module: &'static str, factory: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let status = self.status.clone();
        let mut shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                status.set_module_status(module, ModuleStatus::Starting);
                info!(module, "module starting");
                status.set_module_status(module, ModuleStatus::Running);

                tokio::select! {
                    result = factory() => match result {
                        Ok(()) => {
                            // A module returning cleanly has observed
                            // shutdown itself.
                            status.set_module_status(module, ModuleStatus::Stopped);
                            info!(module, "module stopped");
                            break;
                        }
                        Err(e) => {
                            status.set_module_status(module, ModuleStatus::Stopped);
                            error!(module, error = %e, "module failed, restarting");
                        }
                    },
                    _ = shutdown.changed() => {
                        status.set_module_status(module, ModuleStatus::Stopped);
                        info!(module, "module cancelled by shutdown");
                        break;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(RESTART_BACKOFF) => {}
                    _ = shutdown.changed() => break,
                }
            }
        });
        self.handles.push(handle);
    }

    /// Wait for every supervised task to finish.
    pub async fn join_all(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
