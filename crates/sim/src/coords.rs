//! Map addressing: `MapPos`, `Coordinate` and neighbour directions.

use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};

/// A (row, col) address inside one weight level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MapPos {
    pub row: i32,
    pub col: i32,
}

impl MapPos {
    pub const fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    #[inline]
    pub fn add(self, drow: i32, dcol: i32) -> Self {
        Self::new(self.row + drow, self.col + dcol)
    }

    /// Offset, or `None` if either axis overflows.
    #[inline]
    pub fn checked_offset(self, drow: i32, dcol: i32) -> Option<Self> {
        Some(Self::new(self.row.checked_add(drow)?, self.col.checked_add(dcol)?))
    }

    #[inline]
    pub fn step(self, dir: Dir) -> Self {
        let (dr, dc) = dir.delta();
        self.add(dr, dc)
    }

    #[inline]
    pub fn manhattan(self, other: MapPos) -> i32 {
        (self.row - other.row).abs() + (self.col - other.col).abs()
    }

    /// Whether the position lies inside `[0, 2^(map_weight - weight))` on both axes.
    #[inline]
    pub fn is_in_bounds(self, weight: i32, map_weight: u32) -> bool {
        if weight < 0 || weight > map_weight as i32 {
            return false;
        }
        let size = side_at(weight, map_weight);
        self.row >= 0 && self.col >= 0 && self.row < size && self.col < size
    }
}

/// Number of cells per side at `weight` for a map of `map_weight`.
#[inline]
pub fn side_at(weight: i32, map_weight: u32) -> i32 {
    1 << (map_weight as i32 - weight)
}

/// A full voxel address: position, weight level and altitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Coordinate {
    pub pos: MapPos,
    pub altitude: i32,
    pub weight: i32,
}

impl Coordinate {
    pub const fn new(row: i32, col: i32, altitude: i32, weight: i32) -> Self {
        Self {
            pos: MapPos::new(row, col),
            altitude,
            weight,
        }
    }

    #[inline]
    pub fn row(&self) -> i32 {
        self.pos.row
    }

    #[inline]
    pub fn col(&self) -> i32 {
        self.pos.col
    }

    /// Offset by rows/cols at the same weight and altitude.
    #[inline]
    pub fn add(self, drow: i32, dcol: i32) -> Self {
        Self {
            pos: self.pos.add(drow, dcol),
            ..self
        }
    }

    /// Offset and check the result against the map bounds.
    pub fn checked_add(self, drow: i32, dcol: i32, map_weight: u32) -> Option<Self> {
        let moved = Self {
            pos: self.pos.checked_offset(drow, dcol)?,
            ..self
        };
        moved.is_in_bounds(map_weight).then_some(moved)
    }

    #[inline]
    pub fn is_in_bounds(&self, map_weight: u32) -> bool {
        self.pos.is_in_bounds(self.weight, map_weight)
    }

    /// Express the coordinate at another weight. Going coarser floors the
    /// position; going finer picks the min-corner child.
    pub fn to_weight(self, weight: i32) -> Self {
        let pos = if weight >= self.weight {
            let shift = weight - self.weight;
            MapPos::new(self.pos.row >> shift, self.pos.col >> shift)
        } else {
            let shift = self.weight - weight;
            MapPos::new(self.pos.row << shift, self.pos.col << shift)
        };
        Self {
            pos,
            altitude: self.altitude,
            weight,
        }
    }

    /// Same cell, ignoring altitude.
    #[inline]
    pub fn same_cell(&self, other: &Coordinate) -> bool {
        self.pos == other.pos && self.weight == other.weight
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}) w{} @{}",
            self.pos.row, self.pos.col, self.weight, self.altitude
        )
    }
}

/// Neighbour directions, in sibling-link order.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Dir {
    North = 0,
    East = 1,
    South = 2,
    West = 3,
}

impl Dir {
    pub const ALL: [Dir; 4] = [Dir::North, Dir::East, Dir::South, Dir::West];

    /// (drow, dcol); north is towards row 0.
    #[inline]
    pub fn delta(self) -> (i32, i32) {
        match self {
            Dir::North => (-1, 0),
            Dir::East => (0, 1),
            Dir::South => (1, 0),
            Dir::West => (0, -1),
        }
    }

    pub fn from_index(i: i32) -> Option<Dir> {
        match i {
            0 => Some(Dir::North),
            1 => Some(Dir::East),
            2 => Some(Dir::South),
            3 => Some(Dir::West),
            _ => None,
        }
    }

    /// Direction of a unit step from `from` to `to`, if they are 4-neighbours.
    pub fn between(from: MapPos, to: MapPos) -> Option<Dir> {
        match (to.row - from.row, to.col - from.col) {
            (-1, 0) => Some(Dir::North),
            (0, 1) => Some(Dir::East),
            (1, 0) => Some(Dir::South),
            (0, -1) => Some(Dir::West),
            _ => None,
        }
    }
}

impl Encode for MapPos {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i32(self.row);
        w.put_i32(self.col);
    }
}

impl Decode for MapPos {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(MapPos::new(i32::decode(r)?, i32::decode(r)?))
    }
}

impl Encode for Coordinate {
    fn encode(&self, w: &mut BinaryWriter) {
        self.pos.encode(w);
        w.put_i32(self.altitude);
        w.put_i32(self.weight);
    }
}

impl Decode for Coordinate {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let pos = MapPos::decode(r)?;
        let altitude = i32::decode(r)?;
        let weight = i32::decode(r)?;
        Ok(Coordinate { pos, altitude, weight })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_add_respects_bounds() {
        // weight 4 map, coordinates at weight 2 -> 4x4 grid
        let c = Coordinate::new(1, 1, 6, 2);
        assert_eq!(c.checked_add(1, 1, 4), Some(Coordinate::new(2, 2, 6, 2)));
        assert_eq!(c.checked_add(3, 0, 4), None);
        assert_eq!(c.checked_add(-2, 0, 4), None);
        assert_eq!(c.checked_add(i32::MAX, 0, 4), None);
        assert_eq!(c.checked_add(0, i32::MIN, 4), None);
    }

    #[test]
    fn test_to_weight() {
        let c = Coordinate::new(5, 7, 0, 0);
        assert_eq!(c.to_weight(2).pos, MapPos::new(1, 1));
        assert_eq!(Coordinate::new(1, 1, 0, 2).to_weight(0).pos, MapPos::new(4, 4));
    }

    #[test]
    fn test_dir_between() {
        let a = MapPos::new(2, 2);
        for dir in Dir::ALL {
            assert_eq!(Dir::between(a, a.step(dir)), Some(dir));
        }
        assert_eq!(Dir::between(a, a.add(1, 1)), None);
    }
}
