//! Client -> Server packet parsing.

use bytes::Bytes;

use crate::{BinaryReader, ProtocolError};

use super::{ClientOpcode, PROTOCOL_VERSION};

/// Parsed client packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPacket {
    /// Protocol version (0xFE).
    Protocol(u32),
    /// Join the room (0x00) with nickname.
    Join { name: String },
    /// Spectate (0x01).
    Spectate,
    /// Submit (0x10) an encoded task tree.
    Submit { payload: Bytes },
    /// Camera window (0x11).
    SetCamera { row: i32, col: i32, weight: i32, radius: i32 },
    /// Ready (0x12).
    Ready,
    /// Ping (0x20).
    Ping { nonce: u32 },
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::UnexpectedEof);
        }

        let mut reader = BinaryReader::new(data.to_vec());
        let opcode = reader.try_get_u8().ok_or(ProtocolError::UnexpectedEof)?;

        match ClientOpcode::from_u8(opcode).ok_or(ProtocolError::InvalidOpcode(opcode))? {
            ClientOpcode::Protocol => {
                let version = reader.try_get_u32().ok_or(ProtocolError::UnexpectedEof)?;
                if version != PROTOCOL_VERSION {
                    return Err(ProtocolError::UnsupportedProtocol(version));
                }
                Ok(ClientPacket::Protocol(version))
            }
            ClientOpcode::Join => {
                let name = reader.get_string_utf8();
                Ok(ClientPacket::Join { name })
            }
            ClientOpcode::Spectate => Ok(ClientPacket::Spectate),
            ClientOpcode::Submit => {
                if reader.remaining() == 0 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                Ok(ClientPacket::Submit {
                    payload: reader.take_rest(),
                })
            }
            ClientOpcode::SetCamera => {
                if data.len() != 17 {
                    return Err(ProtocolError::UnexpectedEof);
                }
                let row = reader.try_get_i32().ok_or(ProtocolError::UnexpectedEof)?;
                let col = reader.try_get_i32().ok_or(ProtocolError::UnexpectedEof)?;
                let weight = reader.try_get_i32().ok_or(ProtocolError::UnexpectedEof)?;
                let radius = reader.try_get_i32().ok_or(ProtocolError::UnexpectedEof)?;
                Ok(ClientPacket::SetCamera { row, col, weight, radius })
            }
            ClientOpcode::Ready => Ok(ClientPacket::Ready),
            ClientOpcode::Ping => {
                let nonce = reader.try_get_u32().ok_or(ProtocolError::UnexpectedEof)?;
                Ok(ClientPacket::Ping { nonce })
            }
        }
    }
}

/// Build a Protocol packet (0xFE).
pub fn build_protocol() -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(5);
    w.put_u8(ClientOpcode::Protocol as u8);
    w.put_u32(PROTOCOL_VERSION);
    w
}

/// Build a Join packet (0x00).
pub fn build_join(name: &str) -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(2 + name.len());
    w.put_u8(ClientOpcode::Join as u8);
    w.put_string_utf8(name);
    w
}

/// Build a Submit packet (0x10) around an encoded task tree.
pub fn build_submit(payload: &[u8]) -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(1 + payload.len());
    w.put_u8(ClientOpcode::Submit as u8);
    w.put_slice(payload);
    w
}

/// Build a SetCamera packet (0x11).
pub fn build_set_camera(row: i32, col: i32, weight: i32, radius: i32) -> crate::BinaryWriter {
    let mut w = crate::BinaryWriter::with_capacity(17);
    w.put_u8(ClientOpcode::SetCamera as u8);
    w.put_i32(row);
    w.put_i32(col);
    w.put_i32(weight);
    w.put_i32(radius);
    w
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_and_camera() {
        let join = build_join("eater").finish();
        assert_eq!(
            ClientPacket::parse(&join).unwrap(),
            ClientPacket::Join { name: "eater".into() }
        );

        let cam = build_set_camera(3, 4, 2, 5).finish();
        assert_eq!(
            ClientPacket::parse(&cam).unwrap(),
            ClientPacket::SetCamera { row: 3, col: 4, weight: 2, radius: 5 }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_version_and_opcode() {
        let mut w = crate::BinaryWriter::new();
        w.put_u8(0xFE);
        w.put_u32(99);
        assert_eq!(
            ClientPacket::parse(&w.finish()),
            Err(ProtocolError::UnsupportedProtocol(99))
        );
        assert_eq!(ClientPacket::parse(&[0x77]), Err(ProtocolError::InvalidOpcode(0x77)));
        assert_eq!(ClientPacket::parse(&[0x10]), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_submit_keeps_payload() {
        let packet = build_submit(&[1, 2, 3]).finish();
        match ClientPacket::parse(&packet).unwrap() {
            ClientPacket::Submit { payload } => assert_eq!(&payload[..], &[1, 2, 3]),
            other => panic!("unexpected packet {other:?}"),
        }
    }
}
