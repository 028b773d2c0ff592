//! Shared protocol crate for the voxel arena.
//!
//! This crate contains:
//! - Binary reading/writing utilities
//! - The `Encode`/`Decode` codec used for the wire and for persistence
//! - Packet definitions and builders

mod binary;
pub mod codec;
mod error;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter};
pub use codec::{Decode, Encode, from_bytes, to_bytes};
pub use error::ProtocolError;
