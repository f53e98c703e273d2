use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::catalog::AssignmentCatalog;
use crate::config::MqttDefaults;
use crate::errors::IngestError;
use crate::handlers::gateway_handlers::alerts::AlertPersister;
use crate::handlers::gateway_handlers::buffer::ReadingBuffer;
use crate::handlers::gateway_handlers::pipeline::handle_payload;
use crate::measurements::MeasurementStore;
use crate::models::{BrokerProtocol, GatewayAssignment};
use crate::topic_guard::TopicGuard;
use crate::websocket_srv::RealtimeChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    Offline,
    Reconnecting,
    Error,
}

/// Runtime-only record of one live broker connection. The spawned task owns
/// the event loop and the assignment's reading buffer; dropping the task
/// drops both, which is what resets the buffer's flush-once flag on removal.
struct Connection {
    zone_id: String,
    topic: String,
    connected: Arc<AtomicBool>,
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// Owns the set of live broker connections, one per active zone-gateway
/// assignment. All shared state is this map; everything per-assignment lives
/// inside that assignment's task, so a slow store write for one zone never
/// stalls another zone's messages.
pub struct GatewayRegistry {
    catalog: Arc<dyn AssignmentCatalog>,
    store: Arc<dyn MeasurementStore>,
    channel: Arc<dyn RealtimeChannel>,
    guard: TopicGuard,
    connections: RwLock<HashMap<String, Connection>>,
    defaults: MqttDefaults,
    flush_interval: Duration,
}

impl GatewayRegistry {
    pub fn new(
        catalog: Arc<dyn AssignmentCatalog>,
        store: Arc<dyn MeasurementStore>,
        channel: Arc<dyn RealtimeChannel>,
        defaults: MqttDefaults,
        flush_interval: Duration,
    ) -> Arc<Self> {
        let guard = TopicGuard::new(catalog.clone());
        Arc::new(GatewayRegistry {
            catalog,
            store,
            channel,
            guard,
            connections: RwLock::new(HashMap::new()),
            defaults,
            flush_interval,
        })
    }

    /// Opens one connection per active assignment. A failure is terminal for
    /// that assignment until the next `refresh`, never for its neighbours.
    pub async fn initialize(self: &Arc<Self>) -> Result<(), IngestError> {
        let assignments = self.catalog.list_active_assignments().await?;
        info!("opening {} gateway connection(s)", assignments.len());

        for assignment in assignments {
            let id = assignment.id.clone();
            if let Err(e) = self.add(assignment).await {
                error!("could not open connection for assignment {}: {}", id, e);
            }
        }

        Ok(())
    }

    /// Opens a connection for a newly activated assignment. Reactivating an
    /// assignment that already has a connection is a no-op.
    pub async fn add(self: &Arc<Self>, assignment: GatewayAssignment) -> Result<(), IngestError> {
        let zone_id = match assignment.zone_id.clone() {
            Some(zone_id) => zone_id,
            None => {
                warn!(
                    "assignment {} has no zone linked yet, not opening a connection",
                    assignment.id
                );
                return Ok(());
            }
        };

        if !assignment.active {
            warn!(
                "assignment {} is not active, not opening a connection",
                assignment.id
            );
            return Ok(());
        }

        if self.connections.read().await.contains_key(&assignment.id) {
            info!("assignment {} already has a live connection", assignment.id);
            return Ok(());
        }

        if !self.guard.is_topic_available(&assignment.topic, &zone_id).await? {
            self.channel
                .emit_connection_status(
                    &zone_id,
                    false,
                    &format!("topic '{}' is already in use by another zone", assignment.topic),
                )
                .await;
            return Err(IngestError::TopicCollision(assignment.topic));
        }

        self.open_connection(assignment, zone_id).await
    }

    /// Closes and discards the matching connection. The assignment's buffer
    /// and flush-once flag go with it, so a later re-add starts fresh.
    pub async fn remove(&self, assignment_id: &str) -> bool {
        let connection = match self.connections.write().await.remove(assignment_id) {
            Some(connection) => connection,
            None => {
                warn!("no connection registered for assignment {}", assignment_id);
                return false;
            }
        };

        if let Err(e) = connection.client.disconnect().await {
            debug!("disconnect for assignment {} returned: {}", assignment_id, e);
        }
        connection.task.abort();
        connection.connected.store(false, Ordering::SeqCst);

        self.channel
            .emit_connection_status(&connection.zone_id, false, "gateway removed")
            .await;
        info!(
            "closed connection for assignment {} on topic '{}'",
            assignment_id, connection.topic
        );
        true
    }

    /// Tears every connection down and re-runs `initialize`.
    pub async fn refresh(self: &Arc<Self>) -> Result<(), IngestError> {
        let ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        info!("refreshing gateway registry, closing {} connection(s)", ids.len());
        for id in ids {
            self.remove(&id).await;
        }

        self.initialize().await
    }

    /// Whether any connection for this zone is currently connected.
    pub async fn status_of(&self, zone_id: &str) -> bool {
        self.connections
            .read()
            .await
            .values()
            .any(|c| c.zone_id == zone_id && c.connected.load(Ordering::SeqCst))
    }

    async fn open_connection(
        self: &Arc<Self>,
        assignment: GatewayAssignment,
        zone_id: String,
    ) -> Result<(), IngestError> {
        let client_id = format!("agrihub-{}-{}", assignment.id, Uuid::new_v4().simple());
        let mut options =
            MqttOptions::new(client_id, assignment.host.clone(), assignment.broker_port());
        options.set_keep_alive(Duration::from_secs(self.defaults.keep_alive.into()));
        options.set_clean_session(true);

        if let (Some(username), Some(password)) =
            (&self.defaults.username, &self.defaults.password)
        {
            options.set_credentials(username.clone(), password.clone());
        }

        if assignment.protocol == BrokerProtocol::Mqtts {
            let ca_path = self.defaults.ca_cert.as_ref().ok_or_else(|| {
                IngestError::InvalidConfig(format!(
                    "assignment {} uses mqtts but no ca_cert is configured",
                    assignment.id
                ))
            })?;
            let ca = std::fs::read(ca_path).map_err(|e| {
                IngestError::InvalidConfig(format!(
                    "cannot read ca certificate '{}': {}",
                    ca_path, e
                ))
            })?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }));
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let connected = Arc::new(AtomicBool::new(false));

        self.channel
            .emit_connection_status(&zone_id, false, "connecting to broker")
            .await;

        let task = tokio::spawn(run_connection(
            assignment.clone(),
            zone_id.clone(),
            client.clone(),
            eventloop,
            connected.clone(),
            self.store.clone(),
            self.channel.clone(),
            self.flush_interval,
        ));

        info!(
            "registered gateway connection for assignment {} on topic '{}' ({}:{})",
            assignment.id,
            assignment.topic,
            assignment.host,
            assignment.broker_port()
        );
        let assignment_id = assignment.id.clone();
        let mut connections = self.connections.write().await;
        if let Some(old) = connections.insert(
            assignment.id,
            Connection {
                zone_id,
                topic: assignment.topic,
                connected,
                client,
                task,
            },
        ) {
            // A racing `add` for the same assignment can get past the
            // liveness check twice; the losing connection must not keep
            // running unowned.
            warn!(
                "assignment {} already had a connection, replacing it",
                assignment_id
            );
            old.task.abort();
            old.connected.store(false, Ordering::SeqCst);
            if let Err(e) = old.client.disconnect().await {
                debug!("disconnect for assignment {} returned: {}", assignment_id, e);
            }
        }

        Ok(())
    }
}

fn transition(assignment_id: &str, state: &mut ConnectionState, next: ConnectionState) {
    if *state != next {
        debug!("assignment {}: {:?} -> {:?}", assignment_id, *state, next);
        *state = next;
    }
}

/// Event-consumption loop for one connection. rumqttc keeps reconnecting on
/// its own schedule; the only terminal exit is the registry aborting the
/// task on `remove`.
#[allow(clippy::too_many_arguments)]
async fn run_connection(
    assignment: GatewayAssignment,
    zone_id: String,
    client: AsyncClient,
    mut eventloop: EventLoop,
    connected: Arc<AtomicBool>,
    store: Arc<dyn MeasurementStore>,
    channel: Arc<dyn RealtimeChannel>,
    flush_interval: Duration,
) {
    let mut buffer = ReadingBuffer::new(&assignment.id, flush_interval);
    let alert_persister = AlertPersister::new(store.clone(), channel.clone());
    let mut state = ConnectionState::Disconnected;
    transition(&assignment.id, &mut state, ConnectionState::Connecting);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                transition(&assignment.id, &mut state, ConnectionState::Connected);
                connected.store(true, Ordering::SeqCst);
                // New broker session, so the next reading flushes at once.
                buffer.mark_reconnected();
                info!(
                    "assignment {}: connected to broker {}",
                    assignment.id, assignment.host
                );
                channel
                    .emit_connection_status(&zone_id, true, "connected to broker")
                    .await;

                if let Err(e) = client.subscribe(assignment.topic.clone(), QoS::AtLeastOnce).await {
                    transition(&assignment.id, &mut state, ConnectionState::Error);
                    error!(
                        "assignment {}: failed to subscribe to '{}': {}",
                        assignment.id, assignment.topic, e
                    );
                    channel
                        .emit_connection_status(
                            &zone_id,
                            false,
                            &format!("failed to subscribe to '{}'", assignment.topic),
                        )
                        .await;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                transition(&assignment.id, &mut state, ConnectionState::Subscribed);
                info!(
                    "assignment {}: subscribed to '{}'",
                    assignment.id, assignment.topic
                );
                channel
                    .emit_connection_status(
                        &zone_id,
                        true,
                        &format!("subscribed to '{}'", assignment.topic),
                    )
                    .await;
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).to_string();
                handle_payload(
                    &assignment,
                    &zone_id,
                    &payload,
                    &mut buffer,
                    &alert_persister,
                    store.as_ref(),
                    channel.as_ref(),
                )
                .await;
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                transition(&assignment.id, &mut state, ConnectionState::Offline);
                connected.store(false, Ordering::SeqCst);
                warn!("assignment {}: broker closed the connection", assignment.id);
                channel
                    .emit_connection_status(&zone_id, false, "broker disconnected")
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                let first_failure = state != ConnectionState::Reconnecting;
                transition(&assignment.id, &mut state, ConnectionState::Error);
                if first_failure {
                    error!("assignment {}: transport error: {}", assignment.id, e);
                } else {
                    debug!("assignment {}: still failing: {}", assignment.id, e);
                }
                // Subscribers get a status for every retry cycle; only the
                // log is quieted after the first failure.
                channel
                    .emit_connection_status(&zone_id, false, &format!("transport error: {}", e))
                    .await;
                transition(&assignment.id, &mut state, ConnectionState::Reconnecting);
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
