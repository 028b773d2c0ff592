//! Server -> Client packet building.

use crate::BinaryWriter;

use super::ServerOpcode;

/// Build a Bundle packet (0x10). The payload is the encoded commands bundle,
/// forwarded verbatim to every client of a room.
pub fn build_bundle(payload: &[u8]) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(1 + payload.len());
    w.put_u8(ServerOpcode::Bundle as u8);
    w.put_slice(payload);
    w
}

/// Build an Accepted packet (0x11).
pub fn build_accepted() -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(1);
    w.put_u8(ServerOpcode::Accepted as u8);
    w
}

/// Rejection codes carried by the Rejected packet.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    InvalidState = 1,
    InvalidOwner = 2,
    InvalidTarget = 3,
    OutOfRange = 4,
    Malformed = 5,
    RoomFull = 6,
}

/// Build a Rejected packet (0x12).
pub fn build_rejected(code: RejectCode, message: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(3 + message.len());
    w.put_u8(ServerOpcode::Rejected as u8);
    w.put_u8(code as u8);
    w.put_string_utf8(message);
    w
}

/// Build a MapSlice packet (0x20) around an encoded slice.
pub fn build_map_slice(payload: &[u8]) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(1 + payload.len());
    w.put_u8(ServerOpcode::MapSlice as u8);
    w.put_slice(payload);
    w
}

/// Build a PlayerState packet (0x30).
pub fn build_player_state(player_index: i32, connected: bool) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(6);
    w.put_u8(ServerOpcode::PlayerState as u8);
    w.put_i32(player_index);
    w.put_u8(u8::from(connected));
    w
}

/// Build a Welcome packet (0x40).
pub fn build_welcome(player_id: u32, player_index: i32, map_weight: u32, room: &str) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(14 + room.len());
    w.put_u8(ServerOpcode::Welcome as u8);
    w.put_u32(player_id);
    w.put_i32(player_index);
    w.put_u32(map_weight);
    w.put_string_utf8(room);
    w
}

/// Build a MatchStarted packet (0x41).
pub fn build_match_started(seed: u64, tick_interval_ms: u32, players: u32) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(17);
    w.put_u8(ServerOpcode::MatchStarted as u8);
    w.put_u64(seed);
    w.put_u32(tick_interval_ms);
    w.put_u32(players);
    w
}

/// Build a MatchEnded packet (0x42). `winner` is `-1` for a draw.
pub fn build_match_ended(tick: i64, winner: i32) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(13);
    w.put_u8(ServerOpcode::MatchEnded as u8);
    w.put_i64(tick);
    w.put_i32(winner);
    w
}

/// Build a Pong packet (0xFE).
pub fn build_pong(nonce: u32, tick: i64) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(13);
    w.put_u8(ServerOpcode::Pong as u8);
    w.put_u32(nonce);
    w.put_i64(tick);
    w
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BinaryReader;

    #[test]
    fn test_welcome_layout() {
        let data = build_welcome(7, 1, 4, "lobby").finish();
        let mut r = BinaryReader::new(data);
        assert_eq!(r.try_get_u8(), Some(0x40));
        assert_eq!(r.try_get_u32(), Some(7));
        assert_eq!(r.try_get_i32(), Some(1));
        assert_eq!(r.try_get_u32(), Some(4));
        assert_eq!(r.get_string_utf8(), "lobby");
    }

    #[test]
    fn test_bundle_is_verbatim() {
        let data = build_bundle(&[9, 8, 7]).finish();
        assert_eq!(&data[..], &[0x10, 9, 8, 7]);
    }
}
