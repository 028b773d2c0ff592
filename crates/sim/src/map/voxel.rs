//! Voxel layers and unit state.

use protocol::codec::read_tag;
use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};

/// Handle into the voxel arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VoxelId(pub(crate) u32);

impl VoxelId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind of voxel layer.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoxelType {
    Ground = 0,
    Eater = 1,
    Bomb = 2,
    Spawner = 3,
    Eatable = 4,
    Obstacle = 5,
}

impl VoxelType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(VoxelType::Ground),
            1 => Some(VoxelType::Eater),
            2 => Some(VoxelType::Bomb),
            3 => Some(VoxelType::Spawner),
            4 => Some(VoxelType::Eatable),
            5 => Some(VoxelType::Obstacle),
            _ => None,
        }
    }

    /// Player-controllable unit.
    #[inline]
    pub fn is_unit(self) -> bool {
        matches!(self, VoxelType::Eater | VoxelType::Bomb | VoxelType::Spawner)
    }

    /// Carries a unit-or-asset index in the map's index.
    #[inline]
    pub fn is_indexed(self) -> bool {
        self.is_unit() || self == VoxelType::Eatable
    }

    /// A unit may end a step on top of this layer.
    #[inline]
    pub fn is_walkable(self) -> bool {
        matches!(self, VoxelType::Ground | VoxelType::Eatable)
    }
}

impl Encode for VoxelType {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(*self as u8);
    }
}

impl Decode for VoxelType {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let tag = read_tag(r)?;
        VoxelType::from_u8(tag).ok_or(ProtocolError::InvalidTag { what: "voxel type", tag })
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnitActivity {
    #[default]
    Idle = 0,
    Moving = 1,
    Acting = 2,
}

/// Mutable per-tick state of a unit voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UnitState {
    pub activity: UnitActivity,
    /// Ticks until the unit may act again.
    pub cooldown: i64,
}

impl UnitState {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.cooldown <= 0
    }
}

impl Encode for UnitState {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(self.activity as u8);
        w.put_i64(self.cooldown);
    }
}

impl Decode for UnitState {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let activity = match read_tag(r)? {
            0 => UnitActivity::Idle,
            1 => UnitActivity::Moving,
            2 => UnitActivity::Acting,
            tag => return Err(ProtocolError::InvalidTag { what: "unit activity", tag }),
        };
        let cooldown = i64::decode(r)?;
        Ok(UnitState { activity, cooldown })
    }
}

/// One layer in a cell's voxel chain.
///
/// `altitude` is maintained by the map: it always equals the altitude of the
/// layer below plus that layer's height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelData {
    pub voxel_type: VoxelType,
    pub weight: i32,
    pub height: i32,
    pub altitude: i32,
    /// Player index, `-1` for neutral.
    pub owner: i32,
    pub health: i32,
    pub dir: u8,
    /// Unit or asset index, `-1` until the map assigns one.
    pub unit_or_asset_index: i32,
    pub unit: Option<UnitState>,
}

impl VoxelData {
    /// A layer of `voxel_type`; units get a fresh `UnitState`.
    pub fn new(voxel_type: VoxelType, height: i32, owner: i32) -> Self {
        Self {
            voxel_type,
            weight: 0,
            height,
            altitude: 0,
            owner,
            health: 1,
            dir: 0,
            unit_or_asset_index: -1,
            unit: voxel_type.is_unit().then(UnitState::default),
        }
    }

    pub fn ground(height: i32) -> Self {
        Self::new(VoxelType::Ground, height, -1)
    }

    pub fn with_health(mut self, health: i32) -> Self {
        self.health = health;
        self
    }

    #[inline]
    pub fn top(&self) -> i32 {
        self.altitude + self.height
    }
}

impl Encode for VoxelData {
    fn encode(&self, w: &mut BinaryWriter) {
        self.voxel_type.encode(w);
        w.put_i32(self.weight);
        w.put_i32(self.height);
        w.put_i32(self.altitude);
        w.put_i32(self.owner);
        w.put_i32(self.health);
        w.put_u8(self.dir);
        w.put_i32(self.unit_or_asset_index);
        self.unit.encode(w);
    }
}

impl Decode for VoxelData {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let voxel_type = VoxelType::decode(r)?;
        let weight = i32::decode(r)?;
        let height = i32::decode(r)?;
        let altitude = i32::decode(r)?;
        let owner = i32::decode(r)?;
        let health = i32::decode(r)?;
        let dir = u8::decode(r)?;
        if dir > 3 {
            return Err(ProtocolError::InvalidValue(format!("voxel dir {dir}")));
        }
        let unit_or_asset_index = i32::decode(r)?;
        let unit = Option::<UnitState>::decode(r)?;
        if height < 0 {
            return Err(ProtocolError::InvalidValue(format!("voxel height {height}")));
        }
        Ok(VoxelData {
            voxel_type,
            weight,
            height,
            altitude,
            owner,
            health,
            dir,
            unit_or_asset_index,
            unit,
        })
    }
}
