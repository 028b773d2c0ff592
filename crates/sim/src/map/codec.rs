//! Binary map format.
//!
//! Layout: magic, version, weight, index allocator, then every non-empty cell
//! (coarsest level first) with its chain bottom to top. Chain links and
//! altitudes are rebuilt on decode; stored altitudes are only checked.

use bytes::Bytes;
use protocol::codec::read_len;
use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};

use super::octree::{MAX_MAP_WEIGHT, MapRoot};
use super::voxel::VoxelData;
use crate::coords::MapPos;
use crate::error::SimResult;

pub const MAP_MAGIC: [u8; 4] = *b"VXMP";
pub const MAP_VERSION: u32 = 1;

impl Encode for MapRoot {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_slice(&MAP_MAGIC);
        w.put_u32(MAP_VERSION);
        w.put_u32(self.weight());
        w.put_i32(self.next_index);

        let occupied: Vec<_> = self.cell_ids().filter(|&id| !self.cell(id).is_empty()).collect();
        w.put_u32(occupied.len() as u32);
        for id in occupied {
            let cell = self.cell(id);
            w.put_i32(cell.weight);
            cell.pos.encode(w);
            let layers: Vec<&VoxelData> = self.chain(id).map(|(_, v)| v).collect();
            w.put_u32(layers.len() as u32);
            for v in layers {
                v.encode(w);
            }
        }
    }
}

impl Decode for MapRoot {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let magic = r.try_get_bytes(4).ok_or(ProtocolError::UnexpectedEof)?;
        if magic[..] != MAP_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let version = u32::decode(r)?;
        if version != MAP_VERSION {
            return Err(ProtocolError::UnsupportedProtocol(version));
        }
        let weight = u32::decode(r)?;
        if weight > MAX_MAP_WEIGHT {
            return Err(ProtocolError::InvalidValue(format!("map weight {weight}")));
        }
        let next_index = i32::decode(r)?;
        let mut map = MapRoot::new(weight).map_err(|e| ProtocolError::InvalidValue(e.to_string()))?;

        let mut expected = Vec::new();
        let cells = read_len(r)?;
        for _ in 0..cells {
            let cell_weight = i32::decode(r)?;
            let pos = MapPos::decode(r)?;
            let id = map.lookup(pos, cell_weight).ok_or_else(|| {
                ProtocolError::InvalidValue(format!("cell ({}, {}) w{cell_weight} outside map", pos.row, pos.col))
            })?;
            let layers = read_len(r)?;
            for _ in 0..layers {
                let voxel = VoxelData::decode(r)?;
                let altitude = voxel.altitude;
                let vid = map
                    .append(id, voxel)
                    .map_err(|e| ProtocolError::InvalidValue(e.to_string()))?;
                expected.push((vid, altitude));
            }
        }

        for (vid, altitude) in expected {
            if map.voxel(vid).map(|v| v.altitude) != Some(altitude) {
                return Err(ProtocolError::InvalidValue("altitude mismatch".into()));
            }
        }
        if next_index < map.next_index {
            return Err(ProtocolError::InvalidValue(format!("index allocator {next_index} behind data")));
        }
        map.next_index = next_index;
        Ok(map)
    }
}

impl MapRoot {
    pub fn to_bytes(&self) -> Bytes {
        protocol::to_bytes(self)
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> SimResult<Self> {
        Ok(protocol::from_bytes(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::VoxelType;

    #[test]
    fn test_map_roundtrip_is_structural() {
        let mut map = MapRoot::test_env0().unwrap();
        // leave a hole in the arena so slot numbering differs after decode
        let food = map.find_unit_ids(VoxelType::Eatable, None)[0];
        let food_voxel = map.unit(food).unwrap();
        map.remove(food_voxel).unwrap();

        let bytes = map.to_bytes();
        let back = MapRoot::from_bytes(bytes.clone()).unwrap();
        back.check_invariants().unwrap();
        assert_eq!(back, map);
        assert_eq!(back.to_bytes(), bytes);
    }

    #[test]
    fn test_corrupt_map_rejected() {
        let mut raw = MapRoot::test_env0().unwrap().to_bytes().to_vec();
        raw[0] = b'X';
        assert!(MapRoot::from_bytes(raw).is_err());

        let mut raw = MapRoot::test_env0().unwrap().to_bytes().to_vec();
        raw.truncate(raw.len() - 3);
        assert!(MapRoot::from_bytes(raw).is_err());
    }
}
