//! Plain WebSocket listener: one task per connection, routed to a room by
//! request path.

use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::registry::{RoomRegistry, room_id_from_path};
use crate::session::{Session, relay};

/// Connection tracking state (shared across connection handlers).
#[derive(Debug, Default)]
pub struct ConnectionLimits {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionLimits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to add a connection, returns true if allowed.
    pub fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }
        let current = self.ip_connections.get(&ip).copied().unwrap_or(0);
        if current >= max_per_ip {
            return false;
        }
        *self.ip_connections.entry(ip).or_insert(0) += 1;
        self.total_connections += 1;
        true
    }

    pub fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            if *count > 0 {
                *count -= 1;
                self.total_connections = self.total_connections.saturating_sub(1);
            }
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
    }

    pub fn total(&self) -> usize {
        self.total_connections
    }
}

/// Run the game server on a bare WebSocket listener.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}/room/<id>", addr);

    let max_connections = config.server.max_connections;
    let ip_limit = config.server.ip_limit;
    let registry = RoomRegistry::new(Arc::new(config));
    registry.spawn_gc();
    let limits = Arc::new(RwLock::new(ConnectionLimits::new()));

    loop {
        let (stream, addr) = listener.accept().await?;
        let ip = addr.ip();

        if !limits.write().await.try_add_connection(ip, max_connections, ip_limit) {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let registry = Arc::clone(&registry);
        let limits = Arc::clone(&limits);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, registry).await;

            limits.write().await.remove_connection(ip);

            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(stream: TcpStream, addr: SocketAddr, registry: Arc<RoomRegistry>) -> anyhow::Result<()> {
    let mut room_id = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| {
        match room_id_from_path(req.uri().path()) {
            Some(id) => {
                room_id = Some(id.to_string());
                Ok(resp)
            }
            None => {
                let mut reject = ErrorResponse::new(Some("unknown room".into()));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        }
    })
    .await?;
    let room_id = room_id.ok_or_else(|| anyhow::anyhow!("handshake without a room"))?;
    info!("New connection from {} to room {}", addr, room_id);

    let room = registry.get_or_create(&room_id).await?;
    let (mut session, mut room_rx) = Session::open(room).await;
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let mut failed = false;
                        for reply in session.handle_packet(&data).await {
                            if let Err(e) = write.send(Message::Binary(reply)).await {
                                warn!("Failed to reply to {}: {}", addr, e);
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            packet = room_rx.recv() => {
                let Some(packet) = relay(session.room_id(), packet) else {
                    break;
                };
                if let Err(e) = write.send(Message::Binary(packet)).await {
                    warn!("Failed to send to {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_limits() {
        let mut limits = ConnectionLimits::new();
        let a: IpAddr = "10.0.0.1".parse().unwrap();
        let b: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limits.try_add_connection(a, 3, 2));
        assert!(limits.try_add_connection(a, 3, 2));
        assert!(!limits.try_add_connection(a, 3, 2));
        assert!(limits.try_add_connection(b, 3, 2));
        assert!(!limits.try_add_connection(b, 3, 2));
        limits.remove_connection(a);
        assert_eq!(limits.total(), 2);
        assert!(limits.try_add_connection(b, 3, 2));
    }
}
