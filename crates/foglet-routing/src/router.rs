//! The message router: tables, delivery, and atomic reconfiguration.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use foglet_broker::BrokerServer;
use foglet_connector::ConnectorPool;
use foglet_core::{Message, MessageIdGenerator, Route, RouteReceiver, WorkloadUuid};
use foglet_registry::WorkloadRegistry;
use foglet_status::StatusReporter;

use crate::error::{RoutingError, RoutingResult};
use crate::publisher::MessagePublisher;
use crate::receiver::MessageReceiver;

/// Messages retained per publisher for time-window queries.
const HISTORY_LIMIT: usize = 1024;

#[derive(Default)]
struct RoutingTables {
    routes: HashMap<WorkloadUuid, Route>,
    publishers: HashMap<WorkloadUuid, Arc<MessagePublisher>>,
    receivers: HashMap<WorkloadUuid, Arc<MessageReceiver>>,
}

/// Owns the routing fabric.
///
/// `update` and the watchdog take the tables write lock; `publish`
/// holds the read lock for the whole fan-out. A delivery therefore
/// observes either the pre- or the post-reconfiguration topology,
/// never a torn mix, while fan-outs for distinct publishers still run
/// in parallel.
pub struct MessageRouter {
    broker: BrokerServer,
    registry: Arc<WorkloadRegistry>,
    status: Arc<StatusReporter>,
    connectors: Arc<ConnectorPool>,
    tables: RwLock<RoutingTables>,
    id_gen: StdMutex<MessageIdGenerator>,
    history: StdMutex<HashMap<WorkloadUuid, VecDeque<Message>>>,
}

impl MessageRouter {
    pub fn new(
        broker: BrokerServer,
        registry: Arc<WorkloadRegistry>,
        status: Arc<StatusReporter>,
        connectors: Arc<ConnectorPool>,
    ) -> Self {
        Self {
            broker,
            registry,
            status,
            connectors,
            tables: RwLock::new(RoutingTables::default()),
            id_gen: StdMutex::new(MessageIdGenerator::new()),
            history: StdMutex::new(HashMap::new()),
        }
    }

    pub fn broker(&self) -> &BrokerServer {
        &self.broker
    }

    // ── Lifecycle ─────────────────────────────────────────────────

    /// Start the broker server and build the tables from the current
    /// routes snapshot.
    pub async fn start(&self) -> RoutingResult<()> {
        self.broker.start_server();
        self.broker.initialize()?;
        info!("message broker server started");
        self.init().await;
        Ok(())
    }

    /// Build publishers and receivers from the registry's routes.
    pub async fn init(&self) {
        let routes = self.registry.routes();
        let mut tables = self.tables.write().await;
        tables.routes = routes.clone();
        tables.publishers.clear();
        tables.receivers.clear();

        for (uuid, route) in &routes {
            if route.receivers.is_empty() {
                continue;
            }
            match self.broker.create_producer(uuid) {
                Ok(producer) => {
                    tables.publishers.insert(
                        uuid.clone(),
                        Arc::new(MessagePublisher::new(route.clone(), producer)),
                    );
                }
                Err(e) => {
                    warn!(publisher = %uuid, error = %e, "unable to start publisher");
                }
            }
        }

        for receiver in dedup_receivers(&routes).into_values() {
            self.install_receiver(&mut tables, &receiver).await;
        }

        info!(
            publishers = tables.publishers.len(),
            receivers = tables.receivers.len(),
            "routing initialized"
        );
    }

    async fn install_receiver(&self, tables: &mut RoutingTables, receiver: &RouteReceiver) {
        let uuid = &receiver.workload_uuid;
        let consumer = match self.broker.create_consumer(uuid) {
            Ok(consumer) => consumer,
            Err(e) => {
                warn!(receiver = %uuid, error = %e, "unable to start receiver");
                return;
            }
        };

        if let Some(config) = &receiver.connector_producer_config {
            if !receiver.local {
                if let Err(e) = self.connectors.attach_producer(uuid, config).await {
                    // The watchdog re-initializes the session later.
                    warn!(receiver = %uuid, error = %e, "connector producer attach failed");
                }
            }
        }

        tables.receivers.insert(
            uuid.clone(),
            Arc::new(MessageReceiver::new(
                uuid.clone(),
                receiver.local,
                receiver.connector_producer_config.clone(),
                consumer,
            )),
        );
    }

    /// Close every endpoint and stop the broker server.
    pub async fn stop(&self) {
        let mut tables = self.tables.write().await;
        for receiver in tables.receivers.values() {
            receiver.close();
        }
        for publisher in tables.publishers.values() {
            publisher.close();
        }
        tables.publishers.clear();
        tables.receivers.clear();
        self.broker.stop_server();
        info!("routing stopped");
    }

    // ── Atomic reconfiguration ────────────────────────────────────

    /// Apply the registry's current routes.
    ///
    /// Runs entirely under the tables write lock; readers observe
    /// either the old or the new tables. Publishers whose route
    /// survives keep their broker producer (route swap in place).
    pub async fn update(&self) {
        let mut tables = self.tables.write().await;

        let new_routes = self.registry.routes();
        let live_routes: HashMap<&WorkloadUuid, &Route> = new_routes
            .iter()
            .filter(|(_, route)| !route.receivers.is_empty())
            .collect();
        let new_receivers = dedup_receivers(&new_routes);

        // Publishers: close dropped, swap surviving routes in place.
        let stale: Vec<WorkloadUuid> = tables
            .publishers
            .keys()
            .filter(|uuid| !live_routes.contains_key(uuid))
            .cloned()
            .collect();
        for uuid in &stale {
            if let Some(publisher) = tables.publishers.remove(uuid) {
                publisher.close();
                self.broker.remove_producer(uuid);
                info!(publisher = %uuid, "publisher closed on route change");
            }
        }
        for (uuid, publisher) in &tables.publishers {
            if let Some(route) = live_routes.get(uuid) {
                publisher.update_route((*route).clone());
            }
        }

        // Connector consumers keyed by dropped publisher uuids go too.
        let kept_publishers: Vec<WorkloadUuid> = new_routes.keys().cloned().collect();
        self.connectors.retain_consumers(&kept_publishers).await;

        // Create publishers for new route uuids.
        for (uuid, route) in &live_routes {
            if !tables.publishers.contains_key(*uuid) {
                match self.broker.create_producer(uuid) {
                    Ok(producer) => {
                        tables.publishers.insert(
                            (*uuid).clone(),
                            Arc::new(MessagePublisher::new((*route).clone(), producer)),
                        );
                    }
                    Err(e) => {
                        warn!(publisher = %uuid, error = %e, "unable to start publisher");
                    }
                }
            }
        }

        // Receivers: close and drop the stale, then create the new.
        let stale: Vec<WorkloadUuid> = tables
            .receivers
            .keys()
            .filter(|uuid| !new_receivers.contains_key(*uuid))
            .cloned()
            .collect();
        for uuid in &stale {
            if let Some(receiver) = tables.receivers.remove(uuid) {
                receiver.close();
                self.broker.remove_consumer(uuid);
                info!(receiver = %uuid, "receiver closed on route change");
            }
        }
        let kept_receivers: Vec<WorkloadUuid> = new_receivers.keys().cloned().collect();
        self.connectors.retain_producers(&kept_receivers).await;

        for (uuid, receiver) in &new_receivers {
            if !tables.receivers.contains_key(uuid) {
                self.install_receiver(&mut tables, receiver).await;
            }
        }

        // Commit.
        tables.routes = new_routes;

        // Reconcile per-workload published counters with the latest
        // workload list.
        let latest: Vec<WorkloadUuid> = self
            .registry
            .latest_workloads()
            .into_iter()
            .map(|w| w.uuid)
            .collect();
        self.status.retain_published_entries(&latest);
        for uuid in &latest {
            self.status.ensure_published_entry(uuid);
        }

        info!(
            publishers = tables.publishers.len(),
            receivers = tables.receivers.len(),
            "routing updated"
        );
    }

    // ── Delivery ──────────────────────────────────────────────────

    /// Assign an id and timestamp, then fan the message out to every
    /// receiver of the publisher's route. Returns the stamped message.
    pub async fn publish(&self, mut message: Message) -> RoutingResult<Message> {
        message.id = self.next_id();
        message.timestamp = epoch_millis();

        let tables = self.tables.read().await;
        let publisher = tables
            .publishers
            .get(&message.publisher)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownPublisher(message.publisher.clone()))?;

        // Fan-out happens under the read guard so a concurrent
        // reconfiguration cannot tear the receiver set.
        publisher
            .publish(&message, &self.connectors, &self.status)
            .await?;
        drop(tables);

        self.record_history(message.clone());
        Ok(message)
    }

    /// Drain pending messages for a receiving workload.
    pub async fn next_messages(&self, uuid: &str) -> RoutingResult<Vec<Message>> {
        let tables = self.tables.read().await;
        let receiver = tables
            .receivers
            .get(uuid)
            .ok_or_else(|| RoutingError::UnknownReceiver(uuid.to_string()))?;
        receiver.next_messages()
    }

    pub async fn enable_realtime_receiving(
        &self,
        uuid: &str,
        sink: mpsc::UnboundedSender<Message>,
    ) -> RoutingResult<()> {
        let tables = self.tables.read().await;
        let receiver = tables
            .receivers
            .get(uuid)
            .ok_or_else(|| RoutingError::UnknownReceiver(uuid.to_string()))?;
        receiver.enable_realtime(sink);
        Ok(())
    }

    pub async fn disable_realtime_receiving(&self, uuid: &str) {
        let tables = self.tables.read().await;
        if let Some(receiver) = tables.receivers.get(uuid) {
            receiver.disable_realtime();
        }
    }

    // ── History ───────────────────────────────────────────────────

    fn record_history(&self, message: Message) {
        let mut history = self.history.lock().expect("history lock");
        let ring = history.entry(message.publisher.clone()).or_default();
        ring.push_back(message);
        if ring.len() > HISTORY_LIMIT {
            ring.pop_front();
        }
    }

    /// Time-window query over recently published messages.
    pub fn query_history(&self, publishers: &[String], from_ms: u64, to_ms: u64) -> Vec<Message> {
        let history = self.history.lock().expect("history lock");
        let mut matches: Vec<Message> = publishers
            .iter()
            .filter_map(|uuid| history.get(uuid))
            .flatten()
            .filter(|m| m.timestamp >= from_ms && m.timestamp <= to_ms)
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn next_id(&self) -> String {
        self.id_gen.lock().expect("idgen lock").next_id()
    }

    pub async fn get_publisher(&self, uuid: &str) -> Option<Arc<MessagePublisher>> {
        self.tables.read().await.publishers.get(uuid).cloned()
    }

    pub async fn get_receiver(&self, uuid: &str) -> Option<Arc<MessageReceiver>> {
        self.tables.read().await.receivers.get(uuid).cloned()
    }

    pub async fn publisher_uuids(&self) -> Vec<WorkloadUuid> {
        self.tables.read().await.publishers.keys().cloned().collect()
    }

    pub async fn receiver_uuids(&self) -> Vec<WorkloadUuid> {
        self.tables.read().await.receivers.keys().cloned().collect()
    }

    pub async fn routes(&self) -> HashMap<WorkloadUuid, Route> {
        self.tables.read().await.routes.clone()
    }

    /// Re-apply broker settings after a configuration change.
    pub fn config_updated(&self, memory_limit_bytes: u64) {
        self.broker.set_memory_limit(memory_limit_bytes);
    }

    // ── Supervision ───────────────────────────────────────────────

    /// One liveness pass: restart the broker (and rebuild everything)
    /// when the server is down, otherwise rebuild individual closed
    /// endpoints in place.
    pub async fn watchdog_tick(&self) {
        if !self.broker.is_server_active() {
            warn!("broker server is not active, restarting");
            self.stop().await;
            self.broker.start_server();
            match self.broker.initialize() {
                Ok(()) => {
                    info!("broker server restarted");
                    self.init().await;
                }
                Err(e) => warn!(error = %e, "broker server restart failed"),
            }
            return;
        }

        let mut tables = self.tables.write().await;

        // Publishers whose broker producer dropped.
        let broken: Vec<WorkloadUuid> = tables
            .publishers
            .keys()
            .filter(|uuid| self.broker.is_producer_closed(uuid))
            .cloned()
            .collect();
        for uuid in broken {
            let Some(publisher) = tables.publishers.remove(&uuid) else {
                continue;
            };
            publisher.close();
            let route = tables.routes.get(&uuid).cloned();
            match route.filter(|r| !r.receivers.is_empty()) {
                None => {
                    // Route emptied in the interim: drop instead of
                    // recreating.
                    self.broker.remove_producer(&uuid);
                    info!(publisher = %uuid, "dropped publisher with empty route");
                }
                Some(route) => match self.broker.create_producer(&uuid) {
                    Ok(producer) => {
                        tables.publishers.insert(
                            uuid.clone(),
                            Arc::new(MessagePublisher::new(route, producer)),
                        );
                        info!(publisher = %uuid, "publisher restarted");
                    }
                    Err(e) => {
                        warn!(publisher = %uuid, error = %e, "publisher restart failed");
                    }
                },
            }
        }

        // Receivers whose broker consumer dropped.
        let broken: Vec<WorkloadUuid> = tables
            .receivers
            .keys()
            .filter(|uuid| self.broker.is_consumer_closed(uuid))
            .cloned()
            .collect();
        for uuid in broken {
            let Some(receiver) = tables.receivers.remove(&uuid) else {
                continue;
            };
            receiver.close();
            let spec = RouteReceiver {
                workload_uuid: uuid.clone(),
                local: receiver.is_local(),
                connector_producer_config: receiver.connector_producer_config().cloned(),
            };
            self.install_receiver(&mut tables, &spec).await;
            info!(receiver = %uuid, "receiver restarted");
        }

        // Re-initialize dropped connector sessions for non-local
        // receivers.
        let needs_session: Vec<(WorkloadUuid, foglet_core::ConnectorProducerConfig)> = {
            let mut stale = Vec::new();
            for (uuid, receiver) in &tables.receivers {
                if receiver.is_local() {
                    continue;
                }
                let Some(config) = receiver.connector_producer_config() else {
                    continue;
                };
                let alive = self
                    .connectors
                    .producer(uuid)
                    .await
                    .map(|p| !p.session.is_closed())
                    .unwrap_or(false);
                if !alive {
                    stale.push((uuid.clone(), config.clone()));
                }
            }
            stale
        };
        for (uuid, config) in needs_session {
            if let Err(e) = self.connectors.attach_producer(&uuid, &config).await {
                warn!(receiver = %uuid, error = %e, "connector session re-init failed");
            }
        }
    }
}

/// All receivers across all routes, deduplicated by workload uuid.
fn dedup_receivers(routes: &HashMap<WorkloadUuid, Route>) -> HashMap<WorkloadUuid, RouteReceiver> {
    let mut receivers = HashMap::new();
    for route in routes.values() {
        for receiver in &route.receivers {
            receivers
                .entry(receiver.workload_uuid.clone())
                .or_insert_with(|| receiver.clone());
        }
    }
    receivers
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
