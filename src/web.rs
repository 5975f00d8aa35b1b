//! HTTP and WebSocket edge. Serves the alert listing, accepts
//! acknowledgements over REST and over the stream socket, and fans live
//! lifecycle events out to every connected observer. Observers are seeded
//! with current state on connect so they never start blind.

use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::alert_store::{AckOutcome, AlertStore};
use crate::events::{AlertEvent, AlertSummary};
use crate::notify::BroadcastHub;
use crate::snapshot::FlightKey;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AlertStore>,
    pub hub: Arc<BroadcastHub>,
}

/// Current alerting and acknowledged listings. Served by `GET /api/alerts`
/// and sent as the first frame on every stream connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "seed")]
pub struct AlertIndex {
    pub alerting: Vec<AlertSummary>,
    pub acknowledged: Vec<AlertSummary>,
}

impl AlertIndex {
    async fn snapshot(store: &AlertStore) -> Self {
        AlertIndex {
            alerting: store.current_alerts().await,
            acknowledged: store.current_acknowledged().await,
        }
    }
}

/// Requests a stream client may send over the socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest {
    Ack { key: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename = "error")]
struct ErrorMessage {
    message: String,
}

impl ErrorMessage {
    fn unknown_key(key: &FlightKey) -> Self {
        ErrorMessage {
            message: format!("no alerting flight with key {}", key),
        }
    }
}

async fn alerts_index(State(state): State<AppState>) -> Json<AlertIndex> {
    Json(AlertIndex::snapshot(&state.store).await)
}

async fn ack_alert(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    let key = FlightKey::from(key.as_str());
    match state.store.acknowledge(&key).await {
        AckOutcome::Acknowledged => {
            info!("alert {} acknowledged via http", key);
            Json(AlertEvent::AckOk { key }).into_response()
        }
        AckOutcome::UnknownKey => {
            (StatusCode::NOT_FOUND, Json(ErrorMessage::unknown_key(&key))).into_response()
        }
    }
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn alert_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

async fn handle_stream_socket(mut socket: WebSocket, state: AppState) {
    info!("new alert stream connection established");

    // Subscribe before reading the seed so no event can fall into the gap
    // between snapshot and stream. A duplicate of a seeded alert is
    // possible; a missed one is not.
    let events = state.hub.subscribe();
    let seed = AlertIndex::snapshot(&state.store).await;
    let seed_json = match serde_json::to_string(&seed) {
        Ok(json) => json,
        Err(e) => {
            error!("failed to serialize stream seed: {}", e);
            return;
        }
    };
    if socket.send(Message::Text(seed_json.into())).await.is_err() {
        return;
    }

    // Split the socket for concurrent read/write
    let (sender, receiver) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();

    // Inbound ack requests, answered on this same socket
    let store = state.store.clone();
    let ack_tx = out_tx.clone();
    let read_task = tokio::spawn(async move {
        handle_socket_read(receiver, store, ack_tx).await;
    });

    // Broadcast events relayed into the outbound channel
    let relay_task = tokio::spawn(async move {
        relay_events(events, out_tx).await;
    });

    let write_task = tokio::spawn(async move {
        handle_socket_write(sender, out_rx).await;
    });

    // Any task finishing means the connection is done
    tokio::select! {
        _ = read_task => {
            info!("alert stream read task completed");
        }
        _ = write_task => {
            info!("alert stream write task completed");
        }
        _ = relay_task => {
            info!("alert stream relay task completed");
        }
    }

    info!("alert stream connection closed");
}

async fn handle_socket_read(
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    store: Arc<AlertStore>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<StreamRequest>(&text) {
                Ok(StreamRequest::Ack { key }) => {
                    let key = FlightKey::from(key.as_str());
                    let reply = match store.acknowledge(&key).await {
                        AckOutcome::Acknowledged => {
                            info!("alert {} acknowledged via stream", key);
                            serde_json::to_string(&AlertEvent::AckOk { key })
                        }
                        AckOutcome::UnknownKey => {
                            serde_json::to_string(&ErrorMessage::unknown_key(&key))
                        }
                    };
                    match reply {
                        Ok(json) => {
                            if out_tx.send(json).is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("failed to serialize ack reply: {}", e),
                    }
                }
                Err(e) => {
                    warn!("unparseable stream request: {}", e);
                }
            },
            Ok(Message::Close(_)) => {
                info!("alert stream closed by client");
                break;
            }
            Ok(_) => {
                // Ignore other message types (binary, ping, pong)
            }
            Err(e) => {
                warn!("alert stream socket error: {}", e);
                break;
            }
        }
    }
}

async fn relay_events(
    mut events: broadcast::Receiver<AlertEvent>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    if out_tx.send(json).is_err() {
                        break;
                    }
                }
                Err(e) => error!("failed to serialize alert event: {}", e),
            },
            Err(broadcast::error::RecvError::Closed) => {
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                // A slow observer drops its own backlog, nobody else's
                warn!("alert stream observer lagged {} events", n);
                metrics::counter!("notify.lagged_total").increment(n);
            }
        }
    }
}

async fn handle_socket_write(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(json) = out_rx.recv().await {
        if let Err(e) = sender.send(Message::Text(json.into())).await {
            error!("failed to send to alert stream client: {}", e);
            break;
        }
    }
}

// Middleware for request logging with correlation ID
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = format!("{:08x}", rand::random::<u32>());
    let start_time = Instant::now();

    info!("Started {} {} [{}]", method, path, request_id);

    let response = next.run(request).await;
    let duration = start_time.elapsed();
    let status = response.status();

    info!(
        "Completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    store: Arc<AlertStore>,
    hub: Arc<BroadcastHub>,
) -> Result<()> {
    info!("Starting web server on {}:{}", interface, port);

    let app_state = AppState { store, hub };

    // Allow any origin; the surface is read-mostly and acks are idempotent
    let cors_layer = CorsLayer::permissive();

    let api_router = Router::new()
        .route("/alerts", get(alerts_index))
        .route("/alerts/{key}/ack", post(ack_alert))
        .route("/stream", get(alert_stream))
        .with_state(app_state);

    let app = Router::new()
        .nest("/api", api_router)
        .route("/healthz", get(healthz))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(cors_layer);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::AircraftSnapshot;
    use chrono::Utc;
    use serde_json::json;

    fn test_snapshot(hex: &str, callsign: Option<&str>) -> AircraftSnapshot {
        AircraftSnapshot {
            hex: Some(hex.to_string()),
            callsign: callsign.map(str::to_string),
            latitude: 47.1,
            longitude: -122.3,
            altitude_ft: Some(6000.0),
            ground_speed_kt: Some(150.0),
            track_deg: Some(343.0),
            vertical_rate_fpm: Some(-700.0),
            seen_at: Utc::now(),
        }
    }

    async fn state_with_alert(hex: &str) -> AppState {
        let store = Arc::new(AlertStore::new());
        let snap = test_snapshot(hex, Some("UAL123"));
        store.observe(snap.flight_key(), &snap, true, false).await;
        AppState {
            store,
            hub: Arc::new(BroadcastHub::new(8)),
        }
    }

    #[test]
    fn test_seed_json_shape() {
        let index = AlertIndex {
            alerting: Vec::new(),
            acknowledged: Vec::new(),
        };
        assert_eq!(
            serde_json::to_value(&index).unwrap(),
            json!({ "type": "seed", "alerting": [], "acknowledged": [] })
        );
    }

    #[test]
    fn test_stream_request_parses_ack() {
        let request: StreamRequest =
            serde_json::from_str(r#"{"type":"ack","key":"abc123"}"#).unwrap();
        let StreamRequest::Ack { key } = request;
        assert_eq!(key, "abc123");
    }

    #[test]
    fn test_stream_request_rejects_unknown_type() {
        assert!(serde_json::from_str::<StreamRequest>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test]
    fn test_error_message_json_shape() {
        let value =
            serde_json::to_value(ErrorMessage::unknown_key(&FlightKey::from("abc123"))).unwrap();
        assert_eq!(value["type"], "error");
        assert!(value["message"].as_str().unwrap().contains("abc123"));
    }

    #[tokio::test]
    async fn test_ack_endpoint_ok_then_not_found() {
        let state = state_with_alert("abc123").await;

        let first = ack_alert(State(state.clone()), Path("abc123".to_string())).await;
        assert_eq!(first.status(), StatusCode::OK);

        // Already acknowledged, so the key no longer names an alerting flight
        let second = ack_alert(State(state), Path("abc123".to_string())).await;
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ack_endpoint_unknown_key_404() {
        let state = AppState {
            store: Arc::new(AlertStore::new()),
            hub: Arc::new(BroadcastHub::new(8)),
        };
        let response = ack_alert(State(state), Path("nosuch".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_alerts_index_splits_alerting_and_acknowledged() {
        let state = state_with_alert("abc123").await;
        let other = test_snapshot("def456", None);
        state
            .store
            .observe(other.flight_key(), &other, true, false)
            .await;
        state.store.acknowledge(&FlightKey::from("abc123")).await;

        let Json(index) = alerts_index(State(state)).await;
        assert_eq!(index.alerting.len(), 1);
        assert_eq!(index.alerting[0].key, FlightKey::from("def456"));
        assert_eq!(index.acknowledged.len(), 1);
        assert_eq!(index.acknowledged[0].key, FlightKey::from("abc123"));
    }
}
