//! Packet definitions for the arena protocol.
//!
//! This module contains both client->server and server->client packet types.
//! Simulation payloads (task trees, command bundles, map slices) travel as
//! opaque length-prefixed byte blobs produced by [`crate::Encode`].

mod client;
mod server;

pub use client::*;
pub use server::*;

/// Current protocol version negotiated in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Opcodes for client -> server packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Join the room with a nickname.
    Join = 0x00,
    /// Watch the room without taking a player slot.
    Spectate = 0x01,
    /// Submit an encoded task tree.
    Submit = 0x10,
    /// Move the map-slice camera.
    SetCamera = 0x11,
    /// Ask the room to start, filling free slots with bots.
    Ready = 0x12,
    /// Latency probe.
    Ping = 0x20,
    /// Protocol version handshake.
    Protocol = 0xFE,
}

impl ClientOpcode {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x00 => ClientOpcode::Join,
            0x01 => ClientOpcode::Spectate,
            0x10 => ClientOpcode::Submit,
            0x11 => ClientOpcode::SetCamera,
            0x12 => ClientOpcode::Ready,
            0x20 => ClientOpcode::Ping,
            0xFE => ClientOpcode::Protocol,
            _ => return None,
        })
    }
}

/// Opcodes for server -> client packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Canonical per-tick commands bundle.
    Bundle = 0x10,
    /// Submission accepted.
    Accepted = 0x11,
    /// Submission or request rejected.
    Rejected = 0x12,
    /// Voxel columns inside the client's camera window.
    MapSlice = 0x20,
    /// A player connected or dropped.
    PlayerState = 0x30,
    /// Slot assignment after join.
    Welcome = 0x40,
    /// The match left registration.
    MatchStarted = 0x41,
    /// The match is over.
    MatchEnded = 0x42,
    /// Ping response.
    Pong = 0xFE,
}
