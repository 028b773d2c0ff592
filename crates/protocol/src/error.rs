//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while decoding wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet opcode: {0:#04x}")]
    InvalidOpcode(u8),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedProtocol(u32),

    #[error("Invalid {what} tag: {tag}")]
    InvalidTag { what: &'static str, tag: u8 },

    #[error("Length {0} exceeds the remaining payload")]
    LengthOverflow(u32),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("Bad magic header")]
    BadMagic,

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
