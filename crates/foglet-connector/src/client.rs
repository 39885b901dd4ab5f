//! Per-connector client: a session factory plus its session table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use foglet_core::ConnectorConfig;

use crate::error::{ConnectorError, ConnectorResult};
use crate::session::{ConnectorSession, SessionFactory};

struct Inner {
    factory: Option<Arc<SessionFactory>>,
    sessions: HashMap<String, Arc<ConnectorSession>>,
}

/// Long-lived client for one connector.
///
/// All public methods are mutually exclusive per client instance; the
/// inner mutex is the single writer lock.
pub struct ConnectorClient {
    config: ConnectorConfig,
    trust_store_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl ConnectorClient {
    /// Build the client and attempt factory creation. A factory
    /// failure is logged, not fatal: `reinit` can retry later.
    pub fn new(config: ConnectorConfig, trust_store_dir: PathBuf) -> Self {
        let factory = match SessionFactory::create(&config, &trust_store_dir) {
            Ok(factory) => Some(Arc::new(factory)),
            Err(e) => {
                warn!(connector = %config.name, error = %e, "connector session factory creation failed");
                None
            }
        };
        Self {
            config,
            trust_store_dir,
            inner: Mutex::new(Inner {
                factory,
                sessions: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Open an authenticated session for a workload and remember it.
    ///
    /// On failure the whole client closes, matching the factory's
    /// all-or-nothing session ownership.
    pub async fn start_session(&self, workload_uuid: &str) -> ConnectorResult<Arc<ConnectorSession>> {
        let mut inner = self.inner.lock().await;
        let factory = inner
            .factory
            .clone()
            .ok_or_else(|| ConnectorError::Factory(format!("connector {} has no factory", self.config.name)))?;

        match factory.open_session().await {
            Ok(session) => {
                let session = Arc::new(session);
                if let Some(old) = inner
                    .sessions
                    .insert(workload_uuid.to_string(), session.clone())
                {
                    old.close();
                }
                Ok(session)
            }
            Err(e) => {
                close_locked(&mut inner);
                Err(e)
            }
        }
    }

    /// Close and forget the session for a workload, if any.
    pub async fn eject_session(&self, workload_uuid: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.remove(workload_uuid) {
            session.close();
        }
    }

    /// Terminate the factory (which closes its sessions transitively)
    /// and empty the session map.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        close_locked(&mut inner);
    }

    /// Re-initialization is close-then-recreate, never in-place
    /// mutation.
    pub async fn reinit(&self) -> ConnectorResult<()> {
        let mut inner = self.inner.lock().await;
        close_locked(&mut inner);
        let factory = SessionFactory::create(&self.config, &self.trust_store_dir)?;
        inner.factory = Some(Arc::new(factory));
        info!(connector = %self.config.name, "connector client re-initialized");
        Ok(())
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

fn close_locked(inner: &mut Inner) {
    if let Some(factory) = inner.factory.take() {
        factory.close();
    }
    for session in inner.sessions.values() {
        session.close();
    }
    inner.sessions.clear();
}
