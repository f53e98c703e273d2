use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{stream::SplitSink, SinkExt};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io::Error as IoError, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::{
            client::Request,
            server::{ErrorResponse, Response},
        },
        protocol::Message,
        Error,
    },
    WebSocketStream,
};

use crate::config::WebsocketConfig;
use crate::models::{Notification, Reading};

pub type Tx = Arc<RwLock<UnboundedSender<Message>>>;
type ZoneId = String;
pub type ClientsZones = Arc<RwLock<HashMap<ZoneId, Vec<Tx>>>>;

/// Best-effort push side of the engine. No buffering, no retry: a reading
/// batch or status change is serialized once and handed to whoever is
/// subscribed at that moment.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn emit_readings(&self, zone_id: &str, readings: &[Reading], timestamp: DateTime<Utc>);

    async fn emit_connection_status(&self, zone_id: &str, connected: bool, message: &str);

    async fn emit_notifications(&self, zone_id: &str, notifications: &[Notification]);
}

// Subscription query on the websocket url, e.g. /?zoneId[0]=..&zoneId[1]=..
#[derive(Debug, Deserialize, Clone)]
struct WebSocketQuery {
    #[serde(rename = "zoneId")]
    zone_id: Vec<String>,
}

#[derive(Serialize, Debug)]
pub struct WsResult {
    #[serde(rename = "type")]
    pub type_: String,
    pub data: String,
}

#[derive(Serialize, Debug)]
struct ReadingsEvent<'a> {
    timestamp: DateTime<Utc>,
    readings: &'a [Reading],
}

#[derive(Serialize, Debug)]
struct StatusEvent<'a> {
    connected: bool,
    message: &'a str,
}

#[derive(Debug, Clone)]
pub struct ClientsConnections {
    pub clients_zones: ClientsZones,
}

impl ClientsConnections {
    pub fn new() -> Self {
        ClientsConnections {
            clients_zones: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn add_client(&self, zone_ids: Vec<String>, conn: Tx) {
        let mut conns = self.clients_zones.write().await;
        for zone_id in zone_ids {
            conns
                .entry(zone_id)
                .or_insert_with(Vec::new)
                .push(conn.clone());
        }
    }

    async fn remove_client(&self, zone_ids: Vec<String>, conn: Tx) {
        let mut conns = self.clients_zones.write().await;
        for zone_id in zone_ids {
            if let Some(client_conn) = conns.get_mut(&zone_id) {
                client_conn.retain(|zone_ws| !Arc::ptr_eq(zone_ws, &conn));
                if client_conn.is_empty() {
                    conns.remove(&zone_id);
                }
            }
        }
    }

    pub async fn send_message(&self, zone_id: &str, msg: &str) {
        let conns = self.clients_zones.read().await;
        if let Some(clients) = conns.get(zone_id) {
            for client in clients {
                let ws = client.write().await;
                if let Err(e) = ws.unbounded_send(Message::Text(msg.to_string().into())) {
                    error!("error sending ws message to zone {}: {:#?}", zone_id, e);
                }
            }
        }
    }

    async fn send_envelope<T: Serialize>(&self, zone_id: &str, type_: &str, data: &T) {
        let data = match serde_json::to_string(data) {
            Ok(data) => data,
            Err(e) => {
                error!("failed to serialize '{}' event: {}", type_, e);
                return;
            }
        };
        let envelope = WsResult {
            type_: type_.to_string(),
            data,
        };
        match serde_json::to_string(&envelope) {
            Ok(msg) => self.send_message(zone_id, &msg).await,
            Err(e) => error!("failed to serialize ws envelope: {}", e),
        }
    }
}

#[async_trait]
impl RealtimeChannel for ClientsConnections {
    async fn emit_readings(&self, zone_id: &str, readings: &[Reading], timestamp: DateTime<Utc>) {
        self.send_envelope(zone_id, "readings", &ReadingsEvent { timestamp, readings })
            .await;
    }

    async fn emit_connection_status(&self, zone_id: &str, connected: bool, message: &str) {
        self.send_envelope(zone_id, "connectionStatus", &StatusEvent { connected, message })
            .await;
    }

    async fn emit_notifications(&self, zone_id: &str, notifications: &[Notification]) {
        for notification in notifications {
            self.send_envelope(zone_id, "notification", notification).await;
        }
    }
}

async fn handle_incoming_messages(
    mut incoming: impl StreamExt<Item = Result<Message, Error>> + Unpin,
    connections: ClientsConnections,
    client_conn: Tx,
    zone_ids: Vec<String>,
) {
    // Clients only listen; we drain their side to notice the disconnect.
    while let Some(msg) = incoming.next().await {
        match msg {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
            }
            Err(err) => {
                error!("Client disconnected due to error: {}", err);
                break;
            }
        }
    }

    connections.remove_client(zone_ids, client_conn).await;
    info!("Client disconnected and removed.");
}

async fn handle_outgoing_messages(
    mut rx: UnboundedReceiver<Message>,
    mut outgoing: SplitSink<WebSocketStream<TcpStream>, Message>,
    connections: ClientsConnections,
    client_conn: Tx,
    zone_ids: Vec<String>,
) {
    while let Some(msg) = rx.next().await {
        if let Err(err) = outgoing.send(msg).await {
            error!("Failed to send message: {}. Removing client.", err);
            break;
        }
    }

    connections.remove_client(zone_ids, client_conn).await;
}

pub async fn websocket(
    ws_config: WebsocketConfig,
    connections: ClientsConnections,
) -> Result<(), IoError> {
    let addr = ws_config.server;

    // Supposed main thread for WebSocket Server
    tokio::spawn(async move {
        let try_socket = TcpListener::bind(&addr).await;
        let listener = match try_socket {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind websocket listener on {}: {}", addr, e);
                return;
            }
        };

        while let Ok((raw_stream, _)) = listener.accept().await {
            let mut uri = None;

            let ws_stream = accept_hdr_async(
                raw_stream,
                |req: &Request, res: Response| -> Result<Response, ErrorResponse> {
                    uri = Some(req.uri().clone());
                    Ok(res)
                },
            )
            .await;

            let ws_stream = match ws_stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Websocket handshake failed: {}", e);
                    continue;
                }
            };

            // Parse the url to get the zone ids this client watches.
            let uri = match uri {
                Some(uri) => uri.to_string(),
                None => continue,
            };
            let query: WebSocketQuery = match serde_qs::from_str(uri.trim_start_matches("/?")) {
                Ok(query) => query,
                Err(e) => {
                    warn!("Rejecting websocket client with bad query '{}': {}", uri, e);
                    continue;
                }
            };

            let (tx, rx) = unbounded::<Message>();
            let tx_arc = Arc::new(RwLock::new(tx));

            connections
                .add_client(query.zone_id.clone(), tx_arc.clone())
                .await;

            let (outgoing, incoming) = ws_stream.split();

            // Task to notice client disconnects.
            tokio::spawn(handle_incoming_messages(
                incoming,
                connections.clone(),
                tx_arc.clone(),
                query.zone_id.clone(),
            ));

            // Task to push engine events to this client.
            tokio::spawn(handle_outgoing_messages(
                rx,
                outgoing,
                connections.clone(),
                tx_arc,
                query.zone_id,
            ));
        }
    });

    Ok(())
}
