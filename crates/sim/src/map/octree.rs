//! Arena-backed cell tree with per-cell voxel chains.
//!
//! Cells are stored level by level, coarsest first, so `(row, col, weight)`
//! resolves to a `CellId` with arithmetic only. Parent, child and sibling
//! links are precomputed at construction. Each cell owns a vertical chain of
//! voxel layers (bottom first); chains of finer cells sit on top of the chain
//! of their ancestors.

use std::collections::BTreeMap;

use glam::Vec2;

use super::voxel::{VoxelData, VoxelId, VoxelType};
use crate::coords::{Coordinate, Dir, MapPos, side_at};
use crate::error::{SimError, SimResult};

/// Largest supported map weight (1024 x 1024 cells at level 0).
pub const MAX_MAP_WEIGHT: u32 = 10;

/// Handle into the cell arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub(crate) u32);

impl CellId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A node of the tree.
#[derive(Debug, Clone)]
pub struct MapCell {
    pub pos: MapPos,
    pub weight: i32,
    parent: Option<CellId>,
    children: Option<[CellId; 4]>,
    siblings: [Option<CellId>; 4],
    pub(super) head: Option<VoxelId>,
    pub(super) tail: Option<VoxelId>,
}

impl MapCell {
    #[inline]
    pub fn parent(&self) -> Option<CellId> {
        self.parent
    }

    #[inline]
    pub fn children(&self) -> Option<[CellId; 4]> {
        self.children
    }

    #[inline]
    pub fn sibling(&self, dir: Dir) -> Option<CellId> {
        self.siblings[dir as usize]
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Bottom layer of the chain.
    #[inline]
    pub fn head(&self) -> Option<VoxelId> {
        self.head
    }

    /// Top layer of the chain.
    #[inline]
    pub fn tail(&self) -> Option<VoxelId> {
        self.tail
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

#[derive(Debug, Clone)]
pub(super) struct VoxelSlot {
    pub(super) data: VoxelData,
    pub(super) cell: CellId,
    pub(super) prev: Option<VoxelId>,
    pub(super) next: Option<VoxelId>,
}

/// The whole map: cell arena, voxel arena and the unit/asset index.
#[derive(Debug, Clone)]
pub struct MapRoot {
    weight: u32,
    cells: Vec<MapCell>,
    /// First cell of each level, indexed by weight.
    level_offsets: Vec<usize>,
    voxels: Vec<Option<VoxelSlot>>,
    free: Vec<u32>,
    index: BTreeMap<i32, VoxelId>,
    pub(super) next_index: i32,
}

impl MapRoot {
    /// Build an empty, fully subdivided map of `weight` levels.
    pub fn new(weight: u32) -> SimResult<Self> {
        if weight > MAX_MAP_WEIGHT {
            return Err(SimError::InvalidState("map weight too large"));
        }

        let mut level_offsets = vec![0usize; weight as usize + 1];
        let mut total = 0usize;
        for w in (0..=weight as i32).rev() {
            level_offsets[w as usize] = total;
            let side = side_at(w, weight) as usize;
            total += side * side;
        }

        let mut cells = Vec::with_capacity(total);
        for w in (0..=weight as i32).rev() {
            let side = side_at(w, weight);
            for row in 0..side {
                for col in 0..side {
                    let pos = MapPos::new(row, col);
                    let parent = (w < weight as i32)
                        .then(|| Self::id_at(&level_offsets, weight, MapPos::new(row >> 1, col >> 1), w + 1));
                    let children = (w > 0).then(|| {
                        let (r, c) = (row * 2, col * 2);
                        [
                            Self::id_at(&level_offsets, weight, MapPos::new(r, c), w - 1),
                            Self::id_at(&level_offsets, weight, MapPos::new(r, c + 1), w - 1),
                            Self::id_at(&level_offsets, weight, MapPos::new(r + 1, c), w - 1),
                            Self::id_at(&level_offsets, weight, MapPos::new(r + 1, c + 1), w - 1),
                        ]
                    });
                    let mut siblings = [None; 4];
                    for dir in Dir::ALL {
                        let n = pos.step(dir);
                        if n.is_in_bounds(w, weight) {
                            siblings[dir as usize] = Some(Self::id_at(&level_offsets, weight, n, w));
                        }
                    }
                    cells.push(MapCell {
                        pos,
                        weight: w,
                        parent,
                        children,
                        siblings,
                        head: None,
                        tail: None,
                    });
                }
            }
        }

        Ok(Self {
            weight,
            cells,
            level_offsets,
            voxels: Vec::new(),
            free: Vec::new(),
            index: BTreeMap::new(),
            next_index: 0,
        })
    }

    #[inline]
    fn id_at(offsets: &[usize], map_weight: u32, pos: MapPos, weight: i32) -> CellId {
        let side = side_at(weight, map_weight) as usize;
        CellId((offsets[weight as usize] + pos.row as usize * side + pos.col as usize) as u32)
    }

    #[inline]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Cells per side at `weight`.
    #[inline]
    pub fn side(&self, weight: i32) -> i32 {
        side_at(weight, self.weight)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// All cell ids, coarsest level first, row-major within a level.
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        (0..self.cells.len() as u32).map(CellId)
    }

    pub fn get(&self, row: i32, col: i32, weight: i32) -> Option<&MapCell> {
        self.lookup(MapPos::new(row, col), weight).map(|id| self.cell(id))
    }

    pub fn lookup(&self, pos: MapPos, weight: i32) -> Option<CellId> {
        pos.is_in_bounds(weight, self.weight)
            .then(|| Self::id_at(&self.level_offsets, self.weight, pos, weight))
    }

    pub fn cell_id(&self, pos: MapPos, weight: i32) -> SimResult<CellId> {
        self.lookup(pos, weight).ok_or(SimError::OutOfRange {
            row: pos.row,
            col: pos.col,
            weight,
        })
    }

    #[inline]
    pub fn cell(&self, id: CellId) -> &MapCell {
        &self.cells[id.index()]
    }

    #[inline]
    pub fn sibling(&self, id: CellId, dir: Dir) -> Option<CellId> {
        self.cell(id).sibling(dir)
    }

    #[inline]
    pub fn parent(&self, id: CellId) -> Option<CellId> {
        self.cell(id).parent
    }

    #[inline]
    pub fn children(&self, id: CellId) -> Option<[CellId; 4]> {
        self.cell(id).children
    }

    // ---- Voxels ----

    pub fn voxel(&self, id: VoxelId) -> Option<&VoxelData> {
        self.slot(id).map(|s| &s.data)
    }

    /// Mutable access to a layer's attributes. Height and altitude must only
    /// change through [`MapRoot::set_height`].
    pub fn voxel_mut(&mut self, id: VoxelId) -> Option<&mut VoxelData> {
        self.slot_mut(id).map(|s| &mut s.data)
    }

    pub fn next(&self, id: VoxelId) -> Option<VoxelId> {
        self.slot(id).and_then(|s| s.next)
    }

    pub fn prev(&self, id: VoxelId) -> Option<VoxelId> {
        self.slot(id).and_then(|s| s.prev)
    }

    pub fn voxel_cell(&self, id: VoxelId) -> Option<CellId> {
        self.slot(id).map(|s| s.cell)
    }

    pub fn voxel_coordinate(&self, id: VoxelId) -> Option<Coordinate> {
        let slot = self.slot(id)?;
        let cell = self.cell(slot.cell);
        Some(Coordinate {
            pos: cell.pos,
            altitude: slot.data.altitude,
            weight: cell.weight,
        })
    }

    #[inline]
    pub(super) fn slot(&self, id: VoxelId) -> Option<&VoxelSlot> {
        self.voxels.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    fn slot_mut(&mut self, id: VoxelId) -> Option<&mut VoxelSlot> {
        self.voxels.get_mut(id.index()).and_then(Option::as_mut)
    }

    fn slot_or_err(&self, id: VoxelId) -> SimResult<&VoxelSlot> {
        self.slot(id)
            .ok_or_else(|| SimError::InvalidTarget(format!("voxel {} does not exist", id.0)))
    }

    /// Layers of a cell, bottom to top.
    pub fn chain(&self, cell: CellId) -> ChainIter<'_> {
        ChainIter {
            map: self,
            cur: self.cell(cell).head,
        }
    }

    #[inline]
    pub fn top(&self, cell: CellId) -> Option<VoxelId> {
        self.cell(cell).tail
    }

    /// Top voxel data of a cell.
    pub fn top_voxel(&self, cell: CellId) -> Option<&VoxelData> {
        self.top(cell).and_then(|id| self.voxel(id))
    }

    /// Altitude at which the cell's chain starts: the top of the nearest
    /// non-empty ancestor chain, or zero.
    pub fn base_altitude(&self, cell: CellId) -> i32 {
        let mut cur = self.cell(cell).parent;
        while let Some(id) = cur {
            if let Some(top) = self.top_voxel(id) {
                return top.top();
            }
            cur = self.cell(id).parent;
        }
        0
    }

    /// Altitude of the surface of a cell: where the next appended layer lands.
    pub fn top_altitude(&self, cell: CellId) -> i32 {
        match self.top_voxel(cell) {
            Some(v) => v.top(),
            None => self.base_altitude(cell),
        }
    }

    // ---- Chain edits ----

    /// Place a layer on top of a cell's chain. Indexed types without an index
    /// get the next free one.
    pub fn append(&mut self, cell: CellId, mut data: VoxelData) -> SimResult<VoxelId> {
        if cell.index() >= self.cells.len() {
            return Err(SimError::InvalidTarget(format!("cell {} does not exist", cell.0)));
        }
        if data.height < 0 {
            return Err(SimError::InvalidTarget(format!("negative height {}", data.height)));
        }
        if data.voxel_type.is_indexed() {
            if data.unit_or_asset_index < 0 {
                data.unit_or_asset_index = self.next_index;
            } else if self.index.contains_key(&data.unit_or_asset_index) {
                return Err(SimError::InvalidTarget(format!(
                    "duplicate unit index {}",
                    data.unit_or_asset_index
                )));
            }
            self.next_index = self.next_index.max(data.unit_or_asset_index + 1);
        }

        let slot = VoxelSlot {
            data,
            cell,
            prev: None,
            next: None,
        };
        let id = match self.free.pop() {
            Some(i) => {
                self.voxels[i as usize] = Some(slot);
                VoxelId(i)
            }
            None => {
                self.voxels.push(Some(slot));
                VoxelId(self.voxels.len() as u32 - 1)
            }
        };
        self.attach_top(id, cell);

        let indexed = self
            .voxel(id)
            .filter(|v| v.voxel_type.is_indexed())
            .map(|v| v.unit_or_asset_index);
        if let Some(idx) = indexed {
            self.index.insert(idx, id);
        }
        Ok(id)
    }

    /// Remove a layer anywhere in its chain. Layers above it and every
    /// descendant chain drop by its height.
    pub fn remove(&mut self, id: VoxelId) -> SimResult<VoxelData> {
        self.slot_or_err(id)?;
        self.detach(id);
        let slot = self.voxels[id.index()]
            .take()
            .ok_or_else(|| SimError::InvalidTarget(format!("voxel {} does not exist", id.0)))?;
        self.free.push(id.0);
        let idx = slot.data.unit_or_asset_index;
        if slot.data.voxel_type.is_indexed() && self.index.get(&idx) == Some(&id) {
            self.index.remove(&idx);
        }
        Ok(slot.data)
    }

    /// Move a layer to the top of another (or the same) cell, keeping its id.
    pub fn move_to_top(&mut self, id: VoxelId, cell: CellId) -> SimResult<()> {
        self.slot_or_err(id)?;
        if cell.index() >= self.cells.len() {
            return Err(SimError::InvalidTarget(format!("cell {} does not exist", cell.0)));
        }
        self.detach(id);
        self.attach_top(id, cell);
        Ok(())
    }

    /// Change a layer's height, shifting everything resting on it.
    pub fn set_height(&mut self, id: VoxelId, height: i32) -> SimResult<()> {
        if height < 0 {
            return Err(SimError::InvalidTarget(format!("negative height {height}")));
        }
        let (cell, next, old) = {
            let slot = self.slot_or_err(id)?;
            (slot.cell, slot.next, slot.data.height)
        };
        let delta = height - old;
        if delta == 0 {
            return Ok(());
        }
        if let Some(slot) = self.slot_mut(id) {
            slot.data.height = height;
        }
        self.shift_chain_from(next, delta);
        self.shift_descendants(cell, delta);
        Ok(())
    }

    /// Unlink a slot from its chain without freeing it.
    fn detach(&mut self, id: VoxelId) {
        let Some(slot) = self.slot(id) else { return };
        let (cell, prev, next, height) = (slot.cell, slot.prev, slot.next, slot.data.height);

        match prev {
            Some(p) => {
                if let Some(s) = self.slot_mut(p) {
                    s.next = next;
                }
            }
            None => self.cells[cell.index()].head = next,
        }
        match next {
            Some(n) => {
                if let Some(s) = self.slot_mut(n) {
                    s.prev = prev;
                }
            }
            None => self.cells[cell.index()].tail = prev,
        }
        if let Some(s) = self.slot_mut(id) {
            s.prev = None;
            s.next = None;
        }

        self.shift_chain_from(next, -height);
        self.shift_descendants(cell, -height);
    }

    /// Link an unlinked slot on top of `cell`.
    fn attach_top(&mut self, id: VoxelId, cell: CellId) {
        let altitude = self.top_altitude(cell);
        let weight = self.cell(cell).weight;
        let tail = self.cell(cell).tail;
        let height = match self.slot_mut(id) {
            Some(s) => {
                s.cell = cell;
                s.prev = tail;
                s.next = None;
                s.data.altitude = altitude;
                s.data.weight = weight;
                s.data.height
            }
            None => return,
        };
        match tail {
            Some(t) => {
                if let Some(s) = self.slot_mut(t) {
                    s.next = Some(id);
                }
            }
            None => self.cells[cell.index()].head = Some(id),
        }
        self.cells[cell.index()].tail = Some(id);
        self.shift_descendants(cell, height);
    }

    fn shift_chain_from(&mut self, start: Option<VoxelId>, delta: i32) {
        let mut cur = start;
        while let Some(id) = cur {
            match self.slot_mut(id) {
                Some(s) => {
                    s.data.altitude += delta;
                    cur = s.next;
                }
                None => break,
            }
        }
    }

    fn shift_descendants(&mut self, cell: CellId, delta: i32) {
        if delta == 0 {
            return;
        }
        let mut stack: Vec<CellId> = self.cell(cell).children.map(Vec::from).unwrap_or_default();
        while let Some(id) = stack.pop() {
            let head = self.cell(id).head;
            self.shift_chain_from(head, delta);
            if let Some(children) = self.cell(id).children {
                stack.extend_from_slice(&children);
            }
        }
    }

    // ---- Units ----

    /// Voxel of a unit or asset index.
    pub fn unit(&self, index: i32) -> Option<VoxelId> {
        self.index.get(&index).copied()
    }

    pub fn unit_data(&self, index: i32) -> Option<&VoxelData> {
        self.unit(index).and_then(|id| self.voxel(id))
    }

    pub fn unit_coordinate(&self, index: i32) -> Option<Coordinate> {
        self.unit(index).and_then(|id| self.voxel_coordinate(id))
    }

    /// Indexed voxels in index order.
    pub fn units(&self) -> impl Iterator<Item = (i32, VoxelId)> + '_ {
        self.index.iter().map(|(&i, &id)| (i, id))
    }

    /// Indices of voxels of `voxel_type`, optionally filtered by owner, in index order.
    pub fn find_unit_ids(&self, voxel_type: VoxelType, owner: Option<i32>) -> Vec<i32> {
        self.index
            .iter()
            .filter_map(|(&idx, &id)| {
                let v = self.voxel(id)?;
                (v.voxel_type == voxel_type && owner.is_none_or(|o| v.owner == o)).then_some(idx)
            })
            .collect()
    }

    /// Coordinates of voxels of `voxel_type`, optionally filtered by owner, in index order.
    pub fn find_units(&self, voxel_type: VoxelType, owner: Option<i32>) -> Vec<Coordinate> {
        self.find_unit_ids(voxel_type, owner)
            .into_iter()
            .filter_map(|idx| self.unit_coordinate(idx))
            .collect()
    }

    /// Whether a player still controls any unit.
    pub fn has_units(&self, owner: i32) -> bool {
        self.index.values().any(|&id| {
            self.voxel(id)
                .is_some_and(|v| v.voxel_type.is_unit() && v.owner == owner)
        })
    }

    // ---- World space ----

    /// World position of a cell. The map is centred on the origin and a cell
    /// at `weight` is `2^weight` units wide; `align` returns the cell centre
    /// instead of its min corner.
    pub fn world_position(&self, pos: MapPos, weight: i32, align: bool) -> Vec2 {
        let size = (1i64 << weight.max(0)) as f32;
        let half_world = (1i64 << self.weight) as f32 / 2.0;
        let offset = if align { size / 2.0 } else { 0.0 };
        Vec2::new(
            pos.col as f32 * size - half_world + offset,
            pos.row as f32 * size - half_world + offset,
        )
    }

    /// Cell containing a world point at `weight`.
    pub fn cell_position(&self, point: Vec2, weight: i32) -> Option<MapPos> {
        if weight < 0 || weight > self.weight as i32 || !point.is_finite() {
            return None;
        }
        let size = (1i64 << weight) as f32;
        let half_world = (1i64 << self.weight) as f32 / 2.0;
        let col = ((point.x + half_world) / size).floor();
        let row = ((point.y + half_world) / size).floor();
        let side = self.side(weight) as f32;
        if col < 0.0 || row < 0.0 || col >= side || row >= side {
            return None;
        }
        Some(MapPos::new(row as i32, col as i32))
    }

    // ---- Validation ----

    /// Validate chain links, altitude continuity and the index.
    pub fn check_invariants(&self) -> SimResult<()> {
        for id in self.cell_ids() {
            let cell = self.cell(id);
            let mut expected = self.base_altitude(id);
            let mut prev = None;
            let mut cur = cell.head;
            while let Some(v) = cur {
                let slot = self.slot(v).ok_or(SimError::InvalidState("chain references a freed voxel"))?;
                if slot.cell != id {
                    return Err(SimError::InvalidState("voxel cell link mismatch"));
                }
                if slot.prev != prev {
                    return Err(SimError::InvalidState("voxel prev link mismatch"));
                }
                if slot.data.altitude != expected {
                    return Err(SimError::InvalidState("altitude discontinuity in chain"));
                }
                if slot.data.weight != cell.weight {
                    return Err(SimError::InvalidState("voxel weight differs from its cell"));
                }
                expected = slot.data.top();
                prev = Some(v);
                cur = slot.next;
            }
            if cell.tail != prev {
                return Err(SimError::InvalidState("cell tail mismatch"));
            }
        }
        for (&idx, &id) in &self.index {
            let v = self
                .voxel(id)
                .ok_or(SimError::InvalidState("index references a freed voxel"))?;
            if v.unit_or_asset_index != idx || !v.voxel_type.is_indexed() {
                return Err(SimError::InvalidState("index entry mismatch"));
            }
            if idx >= self.next_index {
                return Err(SimError::InvalidState("index beyond allocator"));
            }
        }
        let indexed = self
            .voxels
            .iter()
            .flatten()
            .filter(|s| s.data.voxel_type.is_indexed())
            .count();
        if indexed != self.index.len() {
            return Err(SimError::InvalidState("indexed voxel missing from index"));
        }
        Ok(())
    }
}

impl PartialEq for MapRoot {
    /// Structural equality: same shape, same chains, same index allocator.
    /// Arena slot numbering is not compared.
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
            && self.next_index == other.next_index
            && self.index.len() == other.index.len()
            && self
                .cell_ids()
                .all(|id| self.chain(id).map(|(_, v)| v).eq(other.chain(id).map(|(_, v)| v)))
    }
}

/// Iterator over a chain, bottom to top.
pub struct ChainIter<'a> {
    map: &'a MapRoot,
    cur: Option<VoxelId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (VoxelId, &'a VoxelData);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let slot = self.map.slot(id)?;
        self.cur = slot.next;
        Some((id, &slot.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_ok(map: &MapRoot) {
        map.check_invariants().unwrap();
    }

    #[test]
    fn test_structure_and_siblings() {
        let map = MapRoot::new(3).unwrap();
        assert_eq!(map.cell_count(), 1 + 4 + 16 + 64);
        let root = map.get(0, 0, 3).unwrap();
        assert!(root.parent().is_none());
        assert!(root.children().is_some());
        let leaf = map.lookup(MapPos::new(7, 7), 0).unwrap();
        assert!(map.cell(leaf).is_leaf());
        assert_eq!(map.sibling(leaf, Dir::East), None);
        let west = map.sibling(leaf, Dir::West).unwrap();
        assert_eq!(map.cell(west).pos, MapPos::new(7, 6));
        let parent = map.parent(leaf).unwrap();
        assert_eq!(map.cell(parent).pos, MapPos::new(3, 3));
        assert!(map.children(parent).unwrap().contains(&leaf));
    }

    #[test]
    fn test_out_of_range_never_panics() {
        let map = MapRoot::new(2).unwrap();
        assert!(map.get(4, 0, 0).is_none());
        assert!(map.get(-1, 0, 0).is_none());
        assert!(map.get(0, 0, 3).is_none());
        assert!(matches!(
            map.cell_id(MapPos::new(0, 9), 1),
            Err(SimError::OutOfRange { row: 0, col: 9, weight: 1 })
        ));
        assert!(map.cell_position(Vec2::new(100.0, 0.0), 0).is_none());
    }

    #[test]
    fn test_world_position_roundtrip() {
        let map = MapRoot::new(4).unwrap();
        let pos = MapPos::new(2, 3);
        let p = map.world_position(pos, 2, true);
        assert_eq!(p, Vec2::new(3.0 * 4.0 - 8.0 + 2.0, 2.0 * 4.0 - 8.0 + 2.0));
        assert_eq!(map.cell_position(p, 2), Some(pos));
        assert_eq!(map.cell_position(map.world_position(pos, 2, false), 2), Some(pos));
    }

    #[test]
    fn test_chain_remove_mid_shifts_above_and_descendants() {
        let mut map = MapRoot::new(2).unwrap();
        let coarse = map.cell_id(MapPos::new(0, 0), 1).unwrap();
        let a = map.append(coarse, VoxelData::ground(3)).unwrap();
        let b = map.append(coarse, VoxelData::ground(2)).unwrap();
        let c = map.append(coarse, VoxelData::ground(4)).unwrap();
        let fine = map.cell_id(MapPos::new(1, 1), 0).unwrap();
        let d = map.append(fine, VoxelData::ground(1)).unwrap();
        assert_eq!(map.voxel(c).unwrap().altitude, 5);
        assert_eq!(map.voxel(d).unwrap().altitude, 9);
        chain_ok(&map);

        let removed = map.remove(b).unwrap();
        assert_eq!(removed.height, 2);
        assert_eq!(map.next(a), Some(c));
        assert_eq!(map.prev(c), Some(a));
        assert_eq!(map.voxel(c).unwrap().altitude, 3);
        assert_eq!(map.voxel(d).unwrap().altitude, 7);
        chain_ok(&map);
    }

    #[test]
    fn test_set_height_and_move_to_top() {
        let mut map = MapRoot::new(2).unwrap();
        let a_cell = map.cell_id(MapPos::new(0, 0), 0).unwrap();
        let b_cell = map.cell_id(MapPos::new(0, 1), 0).unwrap();
        let g = map.append(a_cell, VoxelData::ground(2)).unwrap();
        map.append(b_cell, VoxelData::ground(5)).unwrap();
        let unit = map.append(a_cell, VoxelData::new(VoxelType::Eater, 1, 0)).unwrap();
        assert_eq!(map.voxel(unit).unwrap().altitude, 2);

        map.set_height(g, 4).unwrap();
        assert_eq!(map.voxel(unit).unwrap().altitude, 4);
        chain_ok(&map);

        map.move_to_top(unit, b_cell).unwrap();
        assert_eq!(map.voxel_cell(unit), Some(b_cell));
        assert_eq!(map.voxel(unit).unwrap().altitude, 5);
        assert_eq!(map.top(a_cell), Some(g));
        let idx = map.voxel(unit).unwrap().unit_or_asset_index;
        assert_eq!(map.unit(idx), Some(unit));
        chain_ok(&map);
    }

    #[test]
    fn test_index_assignment_and_reuse() {
        let mut map = MapRoot::new(1).unwrap();
        let cell = map.cell_id(MapPos::new(0, 0), 0).unwrap();
        let u0 = map.append(cell, VoxelData::new(VoxelType::Eater, 1, 0)).unwrap();
        let u1 = map.append(cell, VoxelData::new(VoxelType::Eatable, 1, -1)).unwrap();
        assert_eq!(map.voxel(u0).unwrap().unit_or_asset_index, 0);
        assert_eq!(map.voxel(u1).unwrap().unit_or_asset_index, 1);
        map.remove(u0).unwrap();
        assert_eq!(map.unit(0), None);
        // indices are never reused, slots are
        let u2 = map.append(cell, VoxelData::new(VoxelType::Eater, 1, 1)).unwrap();
        assert_eq!(u2, u0);
        assert_eq!(map.voxel(u2).unwrap().unit_or_asset_index, 2);
        assert_eq!(map.find_unit_ids(VoxelType::Eater, Some(1)), vec![2]);
        assert!(map.has_units(1));
        assert!(!map.has_units(0));
        chain_ok(&map);
    }
}
