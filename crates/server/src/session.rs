//! Per-connection state and packet handling, shared by every transport.

use bytes::Bytes;
use protocol::packets::{self, ClientPacket, RejectCode};
use sim::{MapCamera, MapPos, MatchPhase, TaskInfo};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::room::{Rejection, RoomHandle};

/// One client attached to a room.
pub struct Session {
    room: RoomHandle,
    room_id: String,
    /// Player slot, once joined.
    player_id: Option<u32>,
    spectating: bool,
    handshake_complete: bool,
    camera: MapCamera,
}

impl Session {
    /// Attach to `room`. Returns the session and its receiver for room-wide
    /// packets.
    pub async fn open(room: RoomHandle) -> (Self, broadcast::Receiver<Bytes>) {
        let (room_id, rx, camera) = {
            let mut r = room.write().await;
            r.connect();
            let weight = r.config().room.ground_weight;
            let radius = r.config().room.camera_radius;
            (r.id.clone(), r.subscribe(), MapCamera::new(MapPos::new(0, 0), weight, radius))
        };
        let session = Self {
            room,
            room_id,
            player_id: None,
            spectating: false,
            handshake_complete: false,
            camera,
        };
        (session, rx)
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn player_id(&self) -> Option<u32> {
        self.player_id
    }

    pub fn is_spectating(&self) -> bool {
        self.spectating
    }

    /// Handle one inbound packet and return the replies for this client.
    pub async fn handle_packet(&mut self, data: &[u8]) -> Vec<Bytes> {
        let packet = match ClientPacket::parse(data) {
            Ok(p) => p,
            Err(e) => {
                debug!("Room {}: bad packet: {}", self.room_id, e);
                return vec![Rejection::new(RejectCode::Malformed, e.to_string()).to_packet()];
            }
        };
        if !self.handshake_complete && !matches!(packet, ClientPacket::Protocol(_)) {
            return vec![Rejection::new(RejectCode::InvalidState, "protocol handshake first").to_packet()];
        }
        match self.dispatch(packet).await {
            Ok(replies) => replies,
            Err(rejection) => vec![rejection.to_packet()],
        }
    }

    async fn dispatch(&mut self, packet: ClientPacket) -> Result<Vec<Bytes>, Rejection> {
        match packet {
            ClientPacket::Protocol(version) => {
                debug!("Room {}: protocol {}", self.room_id, version);
                self.handshake_complete = true;
                Ok(Vec::new())
            }
            ClientPacket::Join { name } => self.join(&name).await,
            ClientPacket::Spectate => {
                if self.player_id.is_some() {
                    return Err(Rejection::new(RejectCode::InvalidState, "already playing"));
                }
                self.spectating = true;
                let room = self.room.read().await;
                Ok(vec![
                    packets::build_welcome(0, -1, room.engine().map().weight(), &self.room_id).finish(),
                ])
            }
            ClientPacket::Submit { payload } => {
                let player_id = self
                    .player_id
                    .ok_or_else(|| Rejection::new(RejectCode::InvalidState, "not a player"))?;
                let tree: TaskInfo = protocol::from_bytes(payload)
                    .map_err(|e| Rejection::new(RejectCode::Malformed, e.to_string()))?;
                self.room.write().await.submit(player_id, tree)?;
                Ok(vec![packets::build_accepted().finish()])
            }
            ClientPacket::SetCamera { row, col, weight, radius } => {
                let room = self.room.read().await;
                let map = room.engine().map();
                let mut camera = MapCamera::new(self.camera.center, self.camera.weight, radius);
                camera.set_weight(weight, map.weight());
                camera.move_to(MapPos::new(row, col), map.weight());
                self.camera = camera;
                let slice = protocol::to_bytes(&map.slice(&self.camera));
                Ok(vec![packets::build_map_slice(&slice).finish()])
            }
            ClientPacket::Ready => {
                if self.player_id.is_none() {
                    return Err(Rejection::new(RejectCode::InvalidState, "not a player"));
                }
                let mut room = self.room.write().await;
                if room.phase() == MatchPhase::Registration {
                    room.start_match()?;
                }
                Ok(Vec::new())
            }
            ClientPacket::Ping { nonce } => {
                let tick = self.room.read().await.engine().current_tick();
                Ok(vec![packets::build_pong(nonce, tick).finish()])
            }
        }
    }

    async fn join(&mut self, name: &str) -> Result<Vec<Bytes>, Rejection> {
        if self.player_id.is_some() || self.spectating {
            return Err(Rejection::new(RejectCode::InvalidState, "already joined"));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(Rejection::new(RejectCode::Malformed, "empty name"));
        }
        let mut room = self.room.write().await;
        let seat = room.join(name)?;
        self.player_id = Some(seat.player_id);
        let weight = room.engine().map().weight();
        Ok(vec![
            packets::build_welcome(seat.player_id, seat.index, weight, &self.room_id).finish(),
        ])
    }

    /// Detach from the room.
    pub async fn close(self) {
        let mut room = self.room.write().await;
        room.disconnect(self.player_id);
        if self.player_id.is_none() {
            info!("Room {}: spectator left", self.room_id);
        }
    }
}

/// The packet to forward to a client, or `None` once the client should be
/// dropped: the room is gone or the client fell too far behind.
pub fn relay(room_id: &str, received: Result<Bytes, broadcast::error::RecvError>) -> Option<Bytes> {
    match received {
        Ok(packet) => Some(packet),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!("Room {}: client lagged behind by {} packets", room_id, n);
            None
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;
    use crate::room::tests::test_config;
    use sim::{Cmd, Coordinate, MapSlice, VoxelType};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    async fn room(players: usize, bots: usize) -> RoomHandle {
        let config = test_config(players, bots);
        let map = Room::load_map(&config).await.unwrap();
        Arc::new(RwLock::new(Room::new("test", config, map)))
    }

    async fn handshake(session: &mut Session) {
        let replies = session.handle_packet(&packets::build_protocol().finish()).await;
        assert!(replies.is_empty());
    }

    fn opcode(replies: &[Bytes]) -> u8 {
        assert_eq!(replies.len(), 1);
        replies[0][0]
    }

    #[tokio::test]
    async fn test_handshake_required() {
        let (mut session, _rx) = Session::open(room(1, 1).await).await;
        let replies = session.handle_packet(&packets::build_join("alice").finish()).await;
        assert_eq!(opcode(&replies), 0x12);
        assert_eq!(replies[0][1], RejectCode::InvalidState as u8);

        let replies = session.handle_packet(&[0x77]).await;
        assert_eq!(replies[0][1], RejectCode::Malformed as u8);
    }

    #[tokio::test]
    async fn test_join_submit_and_ping() {
        let handle = room(1, 1).await;
        let (mut session, _rx) = Session::open(Arc::clone(&handle)).await;
        handshake(&mut session).await;
        assert_eq!(opcode(&session.handle_packet(&packets::build_join("alice").finish()).await), 0x40);
        assert_eq!(handle.read().await.phase(), MatchPhase::Running);

        let player = session.player_id().unwrap();
        let (unit, at) = {
            let room = handle.read().await;
            let index = room.engine().player(player).unwrap().index;
            let unit = room.engine().map().find_unit_ids(VoxelType::Eater, Some(index))[0];
            (unit, room.engine().unit_coordinate(unit).unwrap())
        };
        let wait = TaskInfo::command(Cmd::wait(unit, 3));
        let payload = protocol::to_bytes(&wait);
        let replies = session.handle_packet(&packets::build_submit(&payload).finish()).await;
        assert_eq!(opcode(&replies), 0x11);

        // a unit of the other player
        let foreign = {
            let room = handle.read().await;
            let index = room.engine().player(player).unwrap().index;
            room.engine()
                .map()
                .units()
                .map(|(u, _)| u)
                .find(|&u| {
                    room.engine()
                        .map()
                        .unit_data(u)
                        .is_some_and(|v| v.voxel_type.is_unit() && v.owner >= 0 && v.owner != index)
                })
                .unwrap()
        };
        let steal = TaskInfo::command(Cmd::wait(foreign, 1));
        let replies = session
            .handle_packet(&packets::build_submit(&protocol::to_bytes(&steal)).finish())
            .await;
        assert_eq!(replies[0][1], RejectCode::InvalidOwner as u8);

        let far = TaskInfo::command(Cmd::move_to(unit, Coordinate::new(999, 0, at.altitude, at.weight)));
        let replies = session
            .handle_packet(&packets::build_submit(&protocol::to_bytes(&far)).finish())
            .await;
        assert_eq!(replies[0][1], RejectCode::OutOfRange as u8);

        let replies = session.handle_packet(&packets::build_submit(&[0xFF]).finish()).await;
        assert_eq!(replies[0][1], RejectCode::Malformed as u8);

        let mut ping = protocol::BinaryWriter::new();
        ping.put_u8(0x20);
        ping.put_u32(7);
        assert_eq!(opcode(&session.handle_packet(&ping.finish()).await), 0xFE);
    }

    #[tokio::test]
    async fn test_spectator_gets_map_slice() {
        let handle = room(2, 0).await;
        let (mut session, _rx) = Session::open(Arc::clone(&handle)).await;
        handshake(&mut session).await;
        assert_eq!(opcode(&session.handle_packet(&[0x01]).await), 0x40);
        assert!(session.is_spectating());

        let replies = session.handle_packet(&packets::build_submit(&[1]).finish()).await;
        assert_eq!(replies[0][1], RejectCode::InvalidState as u8);

        let replies = session
            .handle_packet(&packets::build_set_camera(1, 1, 2, 1).finish())
            .await;
        assert_eq!(opcode(&replies), 0x20);
        let slice: MapSlice = protocol::from_bytes(replies[0].slice(1..)).unwrap();
        assert_eq!(slice.weight, 2);
        assert_eq!(slice.columns.len(), 9);

        // out-of-range values from the client clamp to the whole level
        let replies = session
            .handle_packet(&packets::build_set_camera(i32::MAX, i32::MIN, 2, i32::MAX).finish())
            .await;
        assert_eq!(opcode(&replies), 0x20);
        let slice: MapSlice = protocol::from_bytes(replies[0].slice(1..)).unwrap();
        assert_eq!(slice.columns.len(), 64);

        session.close().await;
        assert_eq!(handle.read().await.connections(), 0);
    }

    #[tokio::test]
    async fn test_ready_starts_with_bots() {
        let handle = room(2, 0).await;
        let (mut session, mut rx) = Session::open(Arc::clone(&handle)).await;
        handshake(&mut session).await;
        session.handle_packet(&packets::build_join("alice").finish()).await;
        assert_eq!(handle.read().await.phase(), MatchPhase::Registration);
        assert!(session.handle_packet(&[0x12]).await.is_empty());
        assert_eq!(handle.read().await.phase(), MatchPhase::Running);

        assert_eq!(relay("test", rx.recv().await), Some(packets::build_player_state(0, true).finish()));
        let started = relay("test", rx.recv().await).unwrap();
        assert_eq!(started[0], 0x41);
    }
}
