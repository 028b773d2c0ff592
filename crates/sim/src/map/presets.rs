//! Built-in maps.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::octree::MapRoot;
use super::voxel::{VoxelData, VoxelType};
use crate::coords::{Dir, MapPos};
use crate::error::{SimError, SimResult};

/// Ground thickness of flat maps.
pub const GROUND_HEIGHT: i32 = 6;

impl MapRoot {
    /// Two-player fixture: weight 4, a flat 4x4 ground grid at weight 2,
    /// one Eater per player and two Eatables.
    ///
    /// Unit indices: 0 = player 0 Eater at (2, 3), 1 = player 1 Eater at
    /// (1, 1), 2 and 3 = Eatables at (0, 0) and (3, 3).
    pub fn test_env0() -> SimResult<Self> {
        const W: i32 = 2;
        let mut map = MapRoot::new(4)?;
        let side = map.side(W);
        for row in 0..side {
            for col in 0..side {
                let cell = map.cell_id(MapPos::new(row, col), W)?;
                map.append(cell, VoxelData::ground(GROUND_HEIGHT))?;
            }
        }
        let eater = |owner| VoxelData::new(VoxelType::Eater, 1, owner).with_health(2);
        map.append(map.cell_id(MapPos::new(2, 3), W)?, eater(0))?;
        map.append(map.cell_id(MapPos::new(1, 1), W)?, eater(1))?;
        for pos in [MapPos::new(0, 0), MapPos::new(3, 3)] {
            map.append(map.cell_id(pos, W)?, VoxelData::new(VoxelType::Eatable, 1, -1))?;
        }
        Ok(map)
    }

    /// Seeded arena for `players` players: uneven ground at `ground_weight`,
    /// scattered obstacles and food, one Spawner and one Eater per player.
    pub fn generate(weight: u32, ground_weight: i32, players: usize, seed: u64) -> SimResult<Self> {
        if ground_weight < 0 || ground_weight > weight as i32 {
            return Err(SimError::InvalidState("ground weight outside the map"));
        }
        let mut map = MapRoot::new(weight)?;
        let side = map.side(ground_weight);
        if side < 4 {
            return Err(SimError::InvalidState("map too small for a match"));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let corners = [
            MapPos::new(1, 1),
            MapPos::new(side - 2, side - 2),
            MapPos::new(1, side - 2),
            MapPos::new(side - 2, 1),
        ];

        let mut spawns = Vec::with_capacity(players);
        let mut occupied = BTreeSet::new();
        let mut reserved = BTreeSet::new();
        for i in 0..players {
            let corner = corners[i % 4];
            let inward = (i / 4) as i32 * 2;
            let toward = |v: i32| if v < side / 2 { v + inward } else { v - inward };
            let spawn = MapPos::new(toward(corner.row), toward(corner.col));
            let eater = if spawn.row < side / 2 {
                spawn.step(Dir::South)
            } else {
                spawn.step(Dir::North)
            };
            if !spawn.is_in_bounds(ground_weight, weight) || !occupied.insert(spawn) || !occupied.insert(eater) {
                return Err(SimError::InvalidState("too many players for map"));
            }
            for p in [spawn, eater] {
                reserved.insert(p);
                for dir in Dir::ALL {
                    reserved.insert(p.step(dir));
                }
            }
            spawns.push((spawn, eater));
        }

        for row in 0..side {
            for col in 0..side {
                let pos = MapPos::new(row, col);
                let height = if reserved.contains(&pos) {
                    GROUND_HEIGHT
                } else {
                    rng.random_range(GROUND_HEIGHT - 1..=GROUND_HEIGHT + 1)
                };
                let cell = map.cell_id(pos, ground_weight)?;
                map.append(cell, VoxelData::ground(height))?;
            }
        }

        for (owner, (spawn, eater)) in spawns.iter().enumerate() {
            let owner = owner as i32;
            map.append(
                map.cell_id(*spawn, ground_weight)?,
                VoxelData::new(VoxelType::Spawner, 2, owner).with_health(16),
            )?;
            map.append(
                map.cell_id(*eater, ground_weight)?,
                VoxelData::new(VoxelType::Eater, 1, owner).with_health(2),
            )?;
        }

        for row in 0..side {
            for col in 0..side {
                let pos = MapPos::new(row, col);
                if reserved.contains(&pos) {
                    continue;
                }
                let roll = rng.random_range(0..100);
                let cell = map.cell_id(pos, ground_weight)?;
                if roll < 8 {
                    map.append(cell, VoxelData::new(VoxelType::Obstacle, 2, -1))?;
                } else if roll < 20 {
                    map.append(cell, VoxelData::new(VoxelType::Eatable, 1, -1))?;
                }
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Coordinate;

    #[test]
    fn test_env0_layout() {
        let map = MapRoot::test_env0().unwrap();
        map.check_invariants().unwrap();
        assert_eq!(map.weight(), 4);
        assert_eq!(map.find_units(VoxelType::Eater, Some(1)), vec![Coordinate::new(1, 1, 6, 2)]);
        assert_eq!(map.find_units(VoxelType::Eater, Some(0)), vec![Coordinate::new(2, 3, 6, 2)]);
        assert_eq!(map.find_unit_ids(VoxelType::Eatable, None), vec![2, 3]);
    }

    #[test]
    fn test_generate_is_seeded() {
        let a = MapRoot::generate(5, 2, 2, 42).unwrap();
        let b = MapRoot::generate(5, 2, 2, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_bytes(), b.to_bytes());
        a.check_invariants().unwrap();
        for owner in 0..2 {
            assert_eq!(a.find_unit_ids(VoxelType::Spawner, Some(owner)).len(), 1);
            assert_eq!(a.find_unit_ids(VoxelType::Eater, Some(owner)).len(), 1);
        }
    }

    #[test]
    fn test_generate_rejects_crowded_map() {
        assert!(MapRoot::generate(4, 2, 2, 1).is_ok());
        assert!(MapRoot::generate(4, 2, 5, 1).is_err());
    }
}
