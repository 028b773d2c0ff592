//! Structural encode/decode traits.
//!
//! Every type that crosses the wire or hits disk implements [`Encode`] and
//! [`Decode`]. Decoding a value produced by `encode` yields a structurally
//! equal value; back references (parents, chain links) are stored as ids and
//! rebuilt by the owning type on decode.

use bytes::Bytes;

use crate::{BinaryReader, BinaryWriter, ProtocolError};

/// Upper bound for collection lengths read from the wire.
pub const MAX_COLLECTION_LEN: u32 = 1 << 24;

pub trait Encode {
    fn encode(&self, w: &mut BinaryWriter);
}

pub trait Decode: Sized {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError>;
}

/// Encode a value into a standalone buffer.
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Bytes {
    let mut w = BinaryWriter::new();
    value.encode(&mut w);
    w.finish()
}

/// Decode a value that must occupy the whole buffer.
pub fn from_bytes<T: Decode>(data: impl Into<Bytes>) -> Result<T, ProtocolError> {
    let mut r = BinaryReader::new(data);
    let value = T::decode(&mut r)?;
    if r.remaining() != 0 {
        return Err(ProtocolError::TrailingBytes(r.remaining()));
    }
    Ok(value)
}

/// Read a collection length and sanity-check it against the remaining data.
///
/// Every encoded element takes at least one byte.
pub fn read_len(r: &mut BinaryReader) -> Result<usize, ProtocolError> {
    let len = r.try_get_u32().ok_or(ProtocolError::UnexpectedEof)?;
    if len > MAX_COLLECTION_LEN || len as usize > r.remaining() {
        return Err(ProtocolError::LengthOverflow(len));
    }
    Ok(len as usize)
}

/// Read a one-byte enum tag.
#[inline]
pub fn read_tag(r: &mut BinaryReader) -> Result<u8, ProtocolError> {
    r.try_get_u8().ok_or(ProtocolError::UnexpectedEof)
}

impl Encode for u8 {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(*self);
    }
}

impl Decode for u8 {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        r.try_get_u8().ok_or(ProtocolError::UnexpectedEof)
    }
}

impl Encode for bool {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        match read_tag(r)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(ProtocolError::InvalidTag { what: "bool", tag }),
        }
    }
}

impl Encode for u32 {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u32(*self);
    }
}

impl Decode for u32 {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        r.try_get_u32().ok_or(ProtocolError::UnexpectedEof)
    }
}

impl Encode for i32 {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i32(*self);
    }
}

impl Decode for i32 {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        r.try_get_i32().ok_or(ProtocolError::UnexpectedEof)
    }
}

impl Encode for u64 {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u64(*self);
    }
}

impl Decode for u64 {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        r.try_get_u64().ok_or(ProtocolError::UnexpectedEof)
    }
}

impl Encode for i64 {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i64(*self);
    }
}

impl Decode for i64 {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        r.try_get_i64().ok_or(ProtocolError::UnexpectedEof)
    }
}

impl Encode for str {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u32(self.len() as u32);
        w.put_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, w: &mut BinaryWriter) {
        self.as_str().encode(w);
    }
}

impl Decode for String {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let len = read_len(r)?;
        let raw = r.try_get_bytes(len).ok_or(ProtocolError::UnexpectedEof)?;
        String::from_utf8(raw.to_vec()).map_err(|e| ProtocolError::InvalidValue(e.to_string()))
    }
}

impl Encode for Bytes {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u32(self.len() as u32);
        w.put_slice(self);
    }
}

impl Decode for Bytes {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let len = read_len(r)?;
        r.try_get_bytes(len).ok_or(ProtocolError::UnexpectedEof)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            None => w.put_u8(0),
            Some(v) => {
                w.put_u8(1);
                v.encode(w);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        match read_tag(r)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(r)?)),
            tag => Err(ProtocolError::InvalidTag { what: "option", tag }),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u32(self.len() as u32);
        for item in self {
            item.encode(w);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let len = read_len(r)?;
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(T::decode(r)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_vec_string() {
        let value: Vec<Option<String>> = vec![Some("eater".into()), None];
        let bytes = to_bytes(&value);
        let back: Vec<Option<String>> = from_bytes(bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut w = BinaryWriter::new();
        w.put_i32(7);
        w.put_u8(9);
        let err = from_bytes::<i32>(w.finish()).unwrap_err();
        assert_eq!(err, ProtocolError::TrailingBytes(1));
    }

    #[test]
    fn test_huge_length_rejected() {
        let mut w = BinaryWriter::new();
        w.put_u32(u32::MAX);
        assert!(matches!(
            from_bytes::<Vec<u8>>(w.finish()),
            Err(ProtocolError::LengthOverflow(_))
        ));
    }
}
