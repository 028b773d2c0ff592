//! Arena - room server over HTTP, with a JSON room listing.

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use server::{RoomHandle, RoomRegistry, RoomSummary, Session, relay};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    registry: Arc<RoomRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,server=debug")),
        )
        .init();

    info!("Voxel Arena v{}", env!("CARGO_PKG_VERSION"));

    // Load server configuration
    let config = server::Config::load()?;
    info!("Loaded configuration");
    info!("  Port: {}", config.server.port);
    info!("  Tick interval: {}ms", config.server.tick_interval_ms);
    info!("  Slots: {} players + {} bots", config.room.players, config.room.bots);

    let port = config.server.port;
    let registry = RoomRegistry::new(Arc::new(config));
    registry.spawn_gc();

    let state = AppState { registry };

    let app = Router::new()
        .route("/rooms", get(list_rooms))
        .route("/room", get(default_room_handler))
        .route("/room/{id}", get(room_handler))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);
    info!("Room WebSocket endpoint: ws://{}/room/<id>", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.registry.list().await)
}

async fn default_room_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, addr, state, server::DEFAULT_ROOM).await
}

async fn room_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, addr, state, &id).await
}

async fn upgrade(ws: WebSocketUpgrade, addr: SocketAddr, state: AppState, id: &str) -> Response {
    let room = match state.registry.get_or_create(id).await {
        Ok(room) => room,
        Err(e) => {
            warn!("Refused {} for room {:?}: {}", addr, id, e);
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };
    info!("WebSocket connection from {} to room {}", addr, id);
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle_socket(socket, addr, room).await {
            error!("Connection error from {}: {}", addr, e);
        }
    })
}

/// Pump one client: inbound packets go through its session, room packets
/// are forwarded as they arrive.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, room: RoomHandle) -> anyhow::Result<()> {
    let (mut session, room_rx) = Session::open(room).await;
    let result = pump(socket, addr, &mut session, room_rx).await;
    session.close().await;
    result
}

async fn pump(
    socket: WebSocket,
    addr: SocketAddr,
    session: &mut Session,
    mut room_rx: broadcast::Receiver<Bytes>,
) -> anyhow::Result<()> {
    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        for reply in session.handle_packet(&data).await {
                            write.send(Message::Binary(reply)).await?;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", addr);
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                    _ => {}
                }
            }
            packet = room_rx.recv() => {
                let Some(packet) = relay(session.room_id(), packet) else {
                    return Ok(());
                };
                write.send(Message::Binary(packet)).await?;
            }
        }
    }
}
