//! The publisher wrapper: one broker producer fanning out to the
//! receivers of its route.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::warn;

use foglet_broker::BrokerProducer;
use foglet_connector::ConnectorPool;
use foglet_core::{Message, Route};
use foglet_status::StatusReporter;

use crate::error::{RoutingError, RoutingResult};

/// Fans one workload's messages out to every receiver in its route.
pub struct MessagePublisher {
    uuid: String,
    route: RwLock<Route>,
    producer: BrokerProducer,
    closed: AtomicBool,
}

impl MessagePublisher {
    pub fn new(route: Route, producer: BrokerProducer) -> Self {
        Self {
            uuid: route.producer.clone(),
            route: RwLock::new(route),
            producer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn route(&self) -> Route {
        self.route.read().expect("route lock").clone()
    }

    /// Swap the route in place; the broker producer stays open.
    pub fn update_route(&self, route: Route) {
        *self.route.write().expect("route lock") = route;
    }

    pub fn producer(&self) -> &BrokerProducer {
        &self.producer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent and terminal; after close the entry is removed from
    /// the publishers table.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Deliver `message` to every receiver of the route.
    ///
    /// Per-receiver failures (unknown consumer, dropped connector
    /// session) are logged and skipped so the remaining receivers
    /// still receive.
    pub async fn publish(
        &self,
        message: &Message,
        connectors: &ConnectorPool,
        status: &StatusReporter,
    ) -> RoutingResult<()> {
        if self.is_closed() {
            return Err(RoutingError::EndpointClosed(self.uuid.clone()));
        }

        let receivers = self.route().receivers;
        for receiver in &receivers {
            if receiver.local {
                if let Err(e) = self
                    .producer
                    .send(&receiver.workload_uuid, message.clone())
                {
                    warn!(
                        publisher = %self.uuid,
                        receiver = %receiver.workload_uuid,
                        error = %e,
                        "local delivery failed"
                    );
                }
            } else {
                match connectors.producer(&receiver.workload_uuid).await {
                    Some(attached) => {
                        if let Err(e) = attached.forward(message).await {
                            warn!(
                                publisher = %self.uuid,
                                receiver = %receiver.workload_uuid,
                                error = %e,
                                "connector forward failed"
                            );
                        }
                    }
                    None => {
                        warn!(
                            publisher = %self.uuid,
                            receiver = %receiver.workload_uuid,
                            "no connector session for receiver"
                        );
                    }
                }
            }
        }

        status.increment_processed_messages();
        status.increment_published(&self.uuid);
        Ok(())
    }
}
