//! The connector client pool.
//!
//! Clients are keyed by `(host, port, certificate fingerprint)` so a
//! certificate rotation yields a fresh client instead of mutating a
//! live one. The pool also tracks which workload uuids have producer
//! and consumer sessions attached; the routing core prunes those maps
//! during route reconfiguration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

use foglet_core::{ConnectorConfig, ConnectorProducerConfig, Message};

use crate::client::ConnectorClient;
use crate::error::ConnectorResult;
use crate::session::ConnectorSession;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    host: String,
    port: u16,
    cert_fingerprint: String,
}

impl ClientKey {
    fn for_config(config: &ConnectorConfig) -> Self {
        let cert_fingerprint = config
            .cert
            .as_deref()
            .map(|cert| {
                let digest = Sha256::digest(cert.as_bytes());
                format!("{digest:x}")
            })
            .unwrap_or_default();
        Self {
            host: config.host.clone(),
            port: config.port,
            cert_fingerprint,
        }
    }
}

/// A producer session attached to a non-local receiver.
pub struct AttachedProducer {
    client: Arc<ConnectorClient>,
    pub session: Arc<ConnectorSession>,
    config: ConnectorProducerConfig,
}

impl AttachedProducer {
    /// Forward a message onto the configured connector topic.
    pub async fn forward(&self, message: &Message) -> ConnectorResult<()> {
        self.session
            .publish(&self.config.topic, &self.config.pass_key, message)
            .await
    }
}

#[derive(Default)]
struct Tables {
    clients: HashMap<ClientKey, Arc<ConnectorClient>>,
    producers: HashMap<String, Arc<AttachedProducer>>,
    consumers: HashMap<String, Arc<ConnectorClient>>,
}

/// Pool of connector clients and per-workload session attachments.
pub struct ConnectorPool {
    trust_store_dir: PathBuf,
    tables: Mutex<Tables>,
}

impl ConnectorPool {
    pub fn new(trust_store_dir: PathBuf) -> Self {
        Self {
            trust_store_dir,
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Get the client for a connector config, creating it on first use.
    pub async fn get_or_create(&self, config: &ConnectorConfig) -> Arc<ConnectorClient> {
        let key = ClientKey::for_config(config);
        let mut tables = self.tables.lock().await;
        tables
            .clients
            .entry(key)
            .or_insert_with(|| {
                Arc::new(ConnectorClient::new(
                    config.clone(),
                    self.trust_store_dir.clone(),
                ))
            })
            .clone()
    }

    // ── Producer sessions (non-local receivers) ───────────────────

    /// Attach a connector producer session for a receiver workload.
    pub async fn attach_producer(
        &self,
        receiver_uuid: &str,
        config: &ConnectorProducerConfig,
    ) -> ConnectorResult<Arc<AttachedProducer>> {
        let client = self.get_or_create(&config.connector).await;
        let session = client.start_session(receiver_uuid).await?;
        let attached = Arc::new(AttachedProducer {
            client,
            session,
            config: config.clone(),
        });
        self.tables
            .lock()
            .await
            .producers
            .insert(receiver_uuid.to_string(), attached.clone());
        Ok(attached)
    }

    pub async fn producer(&self, receiver_uuid: &str) -> Option<Arc<AttachedProducer>> {
        self.tables.lock().await.producers.get(receiver_uuid).cloned()
    }

    /// Close and drop the producer session for a receiver.
    pub async fn eject_producer(&self, receiver_uuid: &str) {
        let removed = self.tables.lock().await.producers.remove(receiver_uuid);
        if let Some(attached) = removed {
            attached.client.eject_session(receiver_uuid).await;
        }
    }

    /// Drop producer sessions for receivers not in `keep`.
    pub async fn retain_producers(&self, keep: &[String]) {
        let stale: Vec<String> = {
            let tables = self.tables.lock().await;
            tables
                .producers
                .keys()
                .filter(|uuid| !keep.contains(uuid))
                .cloned()
                .collect()
        };
        for uuid in stale {
            self.eject_producer(&uuid).await;
        }
    }

    // ── Consumer attachments (keyed by publisher uuid) ────────────

    /// Record a connector consumer attachment for a route's publisher.
    pub async fn attach_consumer(&self, publisher_uuid: &str, config: &ConnectorConfig) {
        let client = self.get_or_create(config).await;
        self.tables
            .lock()
            .await
            .consumers
            .insert(publisher_uuid.to_string(), client);
    }

    /// Drop consumer attachments for publishers not in `keep`.
    pub async fn retain_consumers(&self, keep: &[String]) {
        let stale: Vec<(String, Arc<ConnectorClient>)> = {
            let mut tables = self.tables.lock().await;
            let stale_keys: Vec<String> = tables
                .consumers
                .keys()
                .filter(|uuid| !keep.contains(uuid))
                .cloned()
                .collect();
            stale_keys
                .into_iter()
                .filter_map(|k| tables.consumers.remove(&k).map(|c| (k, c)))
                .collect()
        };
        for (uuid, client) in stale {
            client.eject_session(&uuid).await;
        }
    }

    pub async fn producer_uuids(&self) -> Vec<String> {
        self.tables.lock().await.producers.keys().cloned().collect()
    }

    pub async fn consumer_uuids(&self) -> Vec<String> {
        self.tables.lock().await.consumers.keys().cloned().collect()
    }

    /// Close every client and forget all attachments.
    pub async fn close_all(&self) {
        let mut tables = self.tables.lock().await;
        for client in tables.clients.values() {
            client.close().await;
        }
        tables.clients.clear();
        tables.producers.clear();
        tables.consumers.clear();
        warn!("connector pool closed");
    }
}
