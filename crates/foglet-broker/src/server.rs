//! Broker server, producer and consumer endpoints.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use foglet_core::Message;

use crate::error::{BrokerError, BrokerResult};

/// Lifetime counters over endpoint churn, exposed for supervision and
/// tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub producers_created: u64,
    pub producers_removed: u64,
    pub consumers_created: u64,
    pub consumers_removed: u64,
}

struct Shared {
    active: AtomicBool,
    memory_limit_bytes: AtomicU64,
    /// Bytes currently queued across all consumers; shared with every
    /// consumer queue so draining returns capacity.
    queued_bytes: Arc<AtomicU64>,
    endpoints: Mutex<Endpoints>,
    producers_created: AtomicU64,
    producers_removed: AtomicU64,
    consumers_created: AtomicU64,
    consumers_removed: AtomicU64,
}

#[derive(Default)]
struct Endpoints {
    producers: HashMap<String, BrokerProducer>,
    consumers: HashMap<String, BrokerConsumer>,
}

/// The in-process broker.
///
/// Cheap to clone; all clones share the same server state.
#[derive(Clone)]
pub struct BrokerServer {
    shared: Arc<Shared>,
}

impl BrokerServer {
    pub fn new(memory_limit_bytes: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(false),
                memory_limit_bytes: AtomicU64::new(memory_limit_bytes),
                queued_bytes: Arc::new(AtomicU64::new(0)),
                endpoints: Mutex::new(Endpoints::default()),
                producers_created: AtomicU64::new(0),
                producers_removed: AtomicU64::new(0),
                consumers_created: AtomicU64::new(0),
                consumers_removed: AtomicU64::new(0),
            }),
        }
    }

    // ── Server lifecycle ──────────────────────────────────────────

    pub fn start_server(&self) {
        self.shared.active.store(true, Ordering::SeqCst);
        debug!("broker server started");
    }

    /// Stops the server: every endpoint is closed and dropped, queued
    /// messages are discarded.
    pub fn stop_server(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        let mut endpoints = self.shared.endpoints.lock().expect("broker lock");
        for producer in endpoints.producers.values() {
            producer.mark_closed();
        }
        for consumer in endpoints.consumers.values() {
            consumer.mark_closed();
        }
        endpoints.producers.clear();
        endpoints.consumers.clear();
        debug!("broker server stopped");
    }

    pub fn is_server_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Prepare the server for endpoint creation.
    pub fn initialize(&self) -> BrokerResult<()> {
        if !self.is_server_active() {
            return Err(BrokerError::Inactive);
        }
        Ok(())
    }

    pub fn set_memory_limit(&self, bytes: u64) {
        self.shared.memory_limit_bytes.store(bytes, Ordering::SeqCst);
    }

    // ── Producers ─────────────────────────────────────────────────

    pub fn create_producer(&self, uuid: &str) -> BrokerResult<BrokerProducer> {
        if !self.is_server_active() {
            return Err(BrokerError::Inactive);
        }
        let producer = BrokerProducer {
            uuid: uuid.to_string(),
            shared: Arc::downgrade(&self.shared),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let mut endpoints = self.shared.endpoints.lock().expect("broker lock");
        if let Some(old) = endpoints.producers.insert(uuid.to_string(), producer.clone()) {
            old.mark_closed();
        }
        self.shared.producers_created.fetch_add(1, Ordering::Relaxed);
        Ok(producer)
    }

    pub fn get_producer(&self, uuid: &str) -> Option<BrokerProducer> {
        self.shared
            .endpoints
            .lock()
            .expect("broker lock")
            .producers
            .get(uuid)
            .cloned()
    }

    pub fn remove_producer(&self, uuid: &str) {
        let mut endpoints = self.shared.endpoints.lock().expect("broker lock");
        if let Some(producer) = endpoints.producers.remove(uuid) {
            producer.mark_closed();
            self.shared.producers_removed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A producer counts as closed when its flag is set or no entry
    /// exists for the uuid.
    pub fn is_producer_closed(&self, uuid: &str) -> bool {
        self.shared
            .endpoints
            .lock()
            .expect("broker lock")
            .producers
            .get(uuid)
            .map(|p| p.is_closed())
            .unwrap_or(true)
    }

    // ── Consumers ─────────────────────────────────────────────────

    pub fn create_consumer(&self, uuid: &str) -> BrokerResult<BrokerConsumer> {
        if !self.is_server_active() {
            return Err(BrokerError::Inactive);
        }
        let consumer = BrokerConsumer {
            uuid: uuid.to_string(),
            queue: Arc::new(ConsumerQueue::new(self.shared.queued_bytes.clone())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        let mut endpoints = self.shared.endpoints.lock().expect("broker lock");
        if let Some(old) = endpoints.consumers.insert(uuid.to_string(), consumer.clone()) {
            old.mark_closed();
        }
        self.shared.consumers_created.fetch_add(1, Ordering::Relaxed);
        Ok(consumer)
    }

    pub fn get_consumer(&self, uuid: &str) -> Option<BrokerConsumer> {
        self.shared
            .endpoints
            .lock()
            .expect("broker lock")
            .consumers
            .get(uuid)
            .cloned()
    }

    pub fn remove_consumer(&self, uuid: &str) {
        let mut endpoints = self.shared.endpoints.lock().expect("broker lock");
        if let Some(consumer) = endpoints.consumers.remove(uuid) {
            consumer.mark_closed();
            self.shared.consumers_removed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_consumer_closed(&self, uuid: &str) -> bool {
        self.shared
            .endpoints
            .lock()
            .expect("broker lock")
            .consumers
            .get(uuid)
            .map(|c| c.is_closed())
            .unwrap_or(true)
    }

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            producers_created: self.shared.producers_created.load(Ordering::Relaxed),
            producers_removed: self.shared.producers_removed.load(Ordering::Relaxed),
            consumers_created: self.shared.consumers_created.load(Ordering::Relaxed),
            consumers_removed: self.shared.consumers_removed.load(Ordering::Relaxed),
        }
    }
}

// ── Producer ──────────────────────────────────────────────────────

/// Endpoint that enqueues messages onto consumer queues.
#[derive(Clone)]
pub struct BrokerProducer {
    uuid: String,
    shared: Weak<Shared>,
    closed: Arc<AtomicBool>,
}

impl BrokerProducer {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Enqueue a message onto the consumer queue for `target`.
    ///
    /// When the configured memory limit would be exceeded, the oldest
    /// queued messages on that queue are discarded first.
    pub fn send(&self, target: &str, message: Message) -> BrokerResult<()> {
        if self.is_closed() {
            return Err(BrokerError::EndpointClosed(self.uuid.clone()));
        }
        let shared = self
            .shared
            .upgrade()
            .ok_or(BrokerError::Inactive)?;
        if !shared.active.load(Ordering::SeqCst) {
            return Err(BrokerError::Inactive);
        }

        let size = message.size_bytes() as u64;
        let limit = shared.memory_limit_bytes.load(Ordering::SeqCst);
        if size > limit {
            return Err(BrokerError::LimitExceeded { size, limit });
        }

        let queue = {
            let endpoints = shared.endpoints.lock().expect("broker lock");
            endpoints
                .consumers
                .get(target)
                .map(|c| c.queue.clone())
                .ok_or_else(|| BrokerError::UnknownConsumer(target.to_string()))?
        };

        // Make room within the limit by discarding the oldest entries
        // on the target queue.
        while shared.queued_bytes.load(Ordering::SeqCst) + size > limit {
            match queue.pop_oldest() {
                Some(dropped) => {
                    warn!(target, dropped_id = %dropped.id, "memory limit reached, dropping oldest message");
                }
                None => break,
            }
        }

        queue.push(message);
        Ok(())
    }
}

// ── Consumer ──────────────────────────────────────────────────────

struct ConsumerQueue {
    messages: Mutex<VecDeque<Message>>,
    listener: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    /// The server-wide queued-bytes counter.
    queued_bytes: Arc<AtomicU64>,
}

impl ConsumerQueue {
    fn new(queued_bytes: Arc<AtomicU64>) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            listener: Mutex::new(None),
            queued_bytes,
        }
    }

    fn push(&self, message: Message) {
        let mut listener = self.listener.lock().expect("broker lock");
        if let Some(sink) = listener.as_ref() {
            if sink.send(message.clone()).is_err() {
                // Listener went away; detach it.
                *listener = None;
            }
        }
        drop(listener);
        self.queued_bytes
            .fetch_add(message.size_bytes() as u64, Ordering::SeqCst);
        self.messages.lock().expect("broker lock").push_back(message);
    }

    fn pop_oldest(&self) -> Option<Message> {
        let popped = self.messages.lock().expect("broker lock").pop_front();
        if let Some(message) = &popped {
            self.queued_bytes
                .fetch_sub(message.size_bytes() as u64, Ordering::SeqCst);
        }
        popped
    }

    fn drain(&self) -> Vec<Message> {
        let drained: Vec<Message> = self
            .messages
            .lock()
            .expect("broker lock")
            .drain(..)
            .collect();
        let freed: u64 = drained.iter().map(|m| m.size_bytes() as u64).sum();
        self.queued_bytes.fetch_sub(freed, Ordering::SeqCst);
        drained
    }
}

/// Endpoint that drains its queue non-blockingly.
#[derive(Clone)]
pub struct BrokerConsumer {
    uuid: String,
    queue: Arc<ConsumerQueue>,
    closed: Arc<AtomicBool>,
}

impl BrokerConsumer {
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Return the queued bytes to the server and detach the
        // listener; nothing is delivered after close.
        self.queue.drain();
        self.clear_listener();
    }

    /// Drain everything currently queued. Returns an error after close.
    pub fn poll_messages(&self) -> BrokerResult<Vec<Message>> {
        if self.is_closed() {
            return Err(BrokerError::EndpointClosed(self.uuid.clone()));
        }
        Ok(self.queue.drain())
    }

    /// Attach a real-time listener fed a copy of every arriving message.
    pub fn set_listener(&self, sink: mpsc::UnboundedSender<Message>) {
        *self.queue.listener.lock().expect("broker lock") = Some(sink);
    }

    pub fn clear_listener(&self) {
        *self.queue.listener.lock().expect("broker lock") = None;
    }
}
