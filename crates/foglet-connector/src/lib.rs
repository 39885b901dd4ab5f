//! foglet-connector — sessions to remote connector brokers.
//!
//! A connector relays messages to receivers on other nodes. Each
//! [`ConnectorClient`] owns a session factory plus a map of
//! per-workload sessions; the [`ConnectorPool`] keys clients by
//! `(host, port, certificate fingerprint)` and tracks the per-workload
//! producer/consumer sessions that the routing core prunes on route
//! changes.
//!
//! Dev mode uses plaintext TCP; otherwise a trust-store file is
//! materialized from the connector certificate and loaded into a
//! rustls root store.

mod client;
mod error;
mod pool;
mod session;
mod truststore;

pub use client::ConnectorClient;
pub use error::{ConnectorError, ConnectorResult};
pub use pool::{AttachedProducer, ConnectorPool};
pub use session::{ConnectorSession, SessionFactory};
pub use truststore::materialize_trust_store;
