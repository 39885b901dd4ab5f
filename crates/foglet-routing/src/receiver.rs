//! The receiver wrapper: one broker consumer with an optional
//! real-time push channel.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use foglet_broker::BrokerConsumer;
use foglet_core::{ConnectorProducerConfig, Message};

use crate::error::{RoutingError, RoutingResult};

/// Pull endpoint for one consuming workload.
pub struct MessageReceiver {
    uuid: String,
    local: bool,
    connector_producer_config: Option<ConnectorProducerConfig>,
    consumer: BrokerConsumer,
    realtime: AtomicBool,
    closed: AtomicBool,
}

impl MessageReceiver {
    pub fn new(
        uuid: impl Into<String>,
        local: bool,
        connector_producer_config: Option<ConnectorProducerConfig>,
        consumer: BrokerConsumer,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            local,
            connector_producer_config,
            consumer,
            realtime: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn connector_producer_config(&self) -> Option<&ConnectorProducerConfig> {
        self.connector_producer_config.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime.load(Ordering::SeqCst)
    }

    /// Idempotent and terminal; no message is delivered after close.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.consumer.clear_listener();
    }

    /// Drain everything currently queued, non-blockingly.
    pub fn next_messages(&self) -> RoutingResult<Vec<Message>> {
        if self.is_closed() {
            return Err(RoutingError::EndpointClosed(self.uuid.clone()));
        }
        Ok(self.consumer.poll_messages()?)
    }

    /// Push every arriving message to `sink` in addition to keeping it
    /// available through [`next_messages`](Self::next_messages).
    pub fn enable_realtime(&self, sink: mpsc::UnboundedSender<Message>) {
        self.consumer.set_listener(sink);
        self.realtime.store(true, Ordering::SeqCst);
    }

    pub fn disable_realtime(&self) {
        self.consumer.clear_listener();
        self.realtime.store(false, Ordering::SeqCst);
    }
}
