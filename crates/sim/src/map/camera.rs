//! Movable visibility window over the map.

use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};

use super::octree::{CellId, MapRoot};
use super::voxel::VoxelType;
use crate::coords::{Coordinate, MapPos, side_at};

/// Widest accepted radius. A map is never that wide at any weight, so the
/// clamp only stops arithmetic on untrusted input from overflowing.
pub const MAX_CAMERA_RADIUS: i32 = 1 << 16;

/// A square window of `2 * radius + 1` cells centred on `center` at `weight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapCamera {
    pub center: MapPos,
    pub weight: i32,
    pub radius: i32,
}

impl MapCamera {
    pub fn new(center: MapPos, weight: i32, radius: i32) -> Self {
        Self {
            center,
            weight,
            radius: radius.clamp(0, MAX_CAMERA_RADIUS),
        }
    }

    /// Move the centre, clamped to the map.
    pub fn move_to(&mut self, center: MapPos, map_weight: u32) {
        let max = side_at(self.weight, map_weight) - 1;
        self.center = MapPos::new(center.row.clamp(0, max), center.col.clamp(0, max));
    }

    pub fn move_by(&mut self, drow: i32, dcol: i32, map_weight: u32) {
        let center = MapPos::new(self.center.row.saturating_add(drow), self.center.col.saturating_add(dcol));
        self.move_to(center, map_weight);
    }

    /// Change level, keeping the centre over the same area of the world.
    pub fn set_weight(&mut self, weight: i32, map_weight: u32) {
        let weight = weight.clamp(0, map_weight as i32);
        let center = if weight >= self.weight {
            let shift = weight - self.weight;
            MapPos::new(self.center.row >> shift, self.center.col >> shift)
        } else {
            let shift = self.weight - weight;
            let half = (1 << shift) / 2;
            MapPos::new((self.center.row << shift) + half, (self.center.col << shift) + half)
        };
        self.weight = weight;
        self.move_to(center, map_weight);
    }

    /// Inclusive `(min, max)` corners, clamped to the map.
    pub fn bounds(&self, map_weight: u32) -> (MapPos, MapPos) {
        let max = side_at(self.weight, map_weight) - 1;
        let min = MapPos::new(
            self.center.row.saturating_sub(self.radius).clamp(0, max),
            self.center.col.saturating_sub(self.radius).clamp(0, max),
        );
        let hi = MapPos::new(
            self.center.row.saturating_add(self.radius).clamp(0, max),
            self.center.col.saturating_add(self.radius).clamp(0, max),
        );
        (min, hi)
    }

    /// Whether a coordinate (at any weight) falls inside the window.
    pub fn contains(&self, coord: &Coordinate) -> bool {
        // coarser coordinates are tested by their min-corner cell
        let c = coord.to_weight(self.weight).pos;
        let radius = self.radius.unsigned_abs();
        c.row.abs_diff(self.center.row) <= radius && c.col.abs_diff(self.center.col) <= radius
    }

    /// Cells inside the window, row-major.
    pub fn visible_cells(&self, map: &MapRoot) -> Vec<CellId> {
        if self.weight < 0 || self.weight > map.weight() as i32 {
            return Vec::new();
        }
        let (min, max) = self.bounds(map.weight());
        let mut out = Vec::with_capacity(((max.row - min.row + 1) * (max.col - min.col + 1)) as usize);
        for row in min.row..=max.row {
            for col in min.col..=max.col {
                if let Some(id) = map.lookup(MapPos::new(row, col), self.weight) {
                    out.push(id);
                }
            }
        }
        out
    }
}

/// One layer as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerView {
    pub voxel_type: VoxelType,
    pub height: i32,
    pub owner: i32,
    pub health: i32,
    pub index: i32,
}

/// Column snapshot of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnView {
    pub pos: MapPos,
    pub base_altitude: i32,
    pub layers: Vec<LayerView>,
}

/// The part of the map inside a camera window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapSlice {
    pub weight: i32,
    pub min: MapPos,
    pub max: MapPos,
    pub columns: Vec<ColumnView>,
}

impl MapRoot {
    /// Snapshot the cells visible through `camera`.
    pub fn slice(&self, camera: &MapCamera) -> MapSlice {
        let (min, max) = camera.bounds(self.weight());
        let columns = camera
            .visible_cells(self)
            .into_iter()
            .map(|id| ColumnView {
                pos: self.cell(id).pos,
                base_altitude: self.base_altitude(id),
                layers: self
                    .chain(id)
                    .map(|(_, v)| LayerView {
                        voxel_type: v.voxel_type,
                        height: v.height,
                        owner: v.owner,
                        health: v.health,
                        index: v.unit_or_asset_index,
                    })
                    .collect(),
            })
            .collect();
        MapSlice {
            weight: camera.weight,
            min,
            max,
            columns,
        }
    }
}

impl Encode for LayerView {
    fn encode(&self, w: &mut BinaryWriter) {
        self.voxel_type.encode(w);
        w.put_i32(self.height);
        w.put_i32(self.owner);
        w.put_i32(self.health);
        w.put_i32(self.index);
    }
}

impl Decode for LayerView {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(LayerView {
            voxel_type: VoxelType::decode(r)?,
            height: i32::decode(r)?,
            owner: i32::decode(r)?,
            health: i32::decode(r)?,
            index: i32::decode(r)?,
        })
    }
}

impl Encode for ColumnView {
    fn encode(&self, w: &mut BinaryWriter) {
        self.pos.encode(w);
        w.put_i32(self.base_altitude);
        self.layers.encode(w);
    }
}

impl Decode for ColumnView {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(ColumnView {
            pos: MapPos::decode(r)?,
            base_altitude: i32::decode(r)?,
            layers: Vec::decode(r)?,
        })
    }
}

impl Encode for MapSlice {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i32(self.weight);
        self.min.encode(w);
        self.max.encode(w);
        self.columns.encode(w);
    }
}

impl Decode for MapSlice {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(MapSlice {
            weight: i32::decode(r)?,
            min: MapPos::decode(r)?,
            max: MapPos::decode(r)?,
            columns: Vec::decode(r)?,
        })
    }
}
