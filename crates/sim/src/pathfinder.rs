//! Incremental, budgeted A* over the cells of one weight level.
//!
//! Searches never run to completion inside a single call: `update` spends at
//! most `budget` node expansions per tick, split across the live searches in
//! request order. Every search expands each cell at most once and only
//! expansions count against the budget, so a search for an unreachable
//! target ends after at most `ceil(cells / share) + 1` ticks.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use fixedbitset::FixedBitSet;
use tracing::trace;

use crate::coords::{Coordinate, Dir, MapPos};
use crate::error::SimError;
use crate::map::{CellId, MapRoot, VoxelType};

/// Type and altitude of the surface a unit would stand on in `cell`.
///
/// An empty cell shows the top of its nearest non-empty ancestor.
pub fn surface(map: &MapRoot, cell: CellId) -> Option<(VoxelType, i32)> {
    let mut cur = Some(cell);
    while let Some(id) = cur {
        if let Some(top) = map.top_voxel(id) {
            return Some((top.voxel_type, top.top()));
        }
        cur = map.parent(id);
    }
    None
}

/// Surface altitude of `pos` if a unit standing at `from_altitude` may step
/// onto it.
pub fn can_enter(map: &MapRoot, pos: MapPos, weight: i32, from_altitude: i32, max_step: i32) -> Option<i32> {
    let cell = map.lookup(pos, weight)?;
    let (voxel_type, altitude) = surface(map, cell)?;
    (voxel_type.is_walkable() && (altitude - from_altitude).abs() <= max_step).then_some(altitude)
}

/// Outcome of a finished search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathResult {
    /// Waypoints after the start, ending at the goal.
    Found(Vec<MapPos>),
    Failed(SimError),
}

#[derive(Debug)]
struct Search {
    unit: i32,
    weight: i32,
    side: i32,
    goal: MapPos,
    max_step: i32,
    open: BinaryHeap<Reverse<(i32, i32, u64, u32)>>,
    /// local index -> (came from, cost so far, surface altitude)
    nodes: HashMap<u32, (u32, i32, i32)>,
    closed: FixedBitSet,
    seq: u64,
    expanded: usize,
}

impl Search {
    #[inline]
    fn local(&self, pos: MapPos) -> u32 {
        (pos.row * self.side + pos.col) as u32
    }

    #[inline]
    fn pos(&self, local: u32) -> MapPos {
        MapPos::new(local as i32 / self.side, local as i32 % self.side)
    }

    fn push(&mut self, local: u32, g: i32) {
        let h = self.pos(local).manhattan(self.goal);
        self.seq += 1;
        self.open.push(Reverse((g + h, h, self.seq, local)));
    }

    fn path_to(&self, goal: u32) -> Vec<MapPos> {
        let mut out = Vec::new();
        let mut cur = goal;
        while let Some(&(from, _, _)) = self.nodes.get(&cur) {
            if from == cur {
                break;
            }
            out.push(self.pos(cur));
            cur = from;
        }
        out.reverse();
        out
    }

    /// Next open cell, discarding entries for cells closed since they were
    /// pushed.
    fn pop_open(&mut self) -> Option<u32> {
        while let Some(Reverse((_, _, _, local))) = self.open.pop() {
            if !self.closed.contains(local as usize) {
                return Some(local);
            }
        }
        None
    }

    /// Expand up to `budget` nodes. `Some` once the search is over.
    fn run(&mut self, map: &MapRoot, budget: usize) -> Option<PathResult> {
        let goal = self.local(self.goal);
        for _ in 0..budget {
            let Some(local) = self.pop_open() else {
                return Some(PathResult::Failed(SimError::Unreachable(self.unit)));
            };
            if local == goal {
                return Some(PathResult::Found(self.path_to(goal)));
            }
            self.closed.insert(local as usize);
            self.expanded += 1;

            let (_, g, altitude) = self.nodes[&local];
            let pos = self.pos(local);
            for dir in Dir::ALL {
                let next = pos.step(dir);
                if !next.is_in_bounds(self.weight, map.weight()) {
                    continue;
                }
                let n = self.local(next);
                if self.closed.contains(n as usize) {
                    continue;
                }
                let Some(next_alt) = can_enter(map, next, self.weight, altitude, self.max_step) else {
                    continue;
                };
                let cost = g + 1;
                let better = self.nodes.get(&n).is_none_or(|&(_, old, _)| cost < old);
                if better {
                    self.nodes.insert(n, (local, cost, next_alt));
                    self.push(n, cost);
                }
            }
        }
        while let Some(&Reverse((_, _, _, local))) = self.open.peek() {
            if !self.closed.contains(local as usize) {
                return None;
            }
            self.open.pop();
        }
        Some(PathResult::Failed(SimError::Unreachable(self.unit)))
    }
}

/// Per-unit path searches sharing one per-tick budget.
#[derive(Debug)]
pub struct PathFinder {
    budget: usize,
    /// Live searches in request order.
    searches: Vec<Search>,
    results: BTreeMap<i32, PathResult>,
}

impl PathFinder {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            searches: Vec::new(),
            results: BTreeMap::new(),
        }
    }

    /// Start (or restart) a search for `unit` from `from` to `to` at `from.weight`.
    ///
    /// Impossible requests resolve immediately into a failed result.
    pub fn request(&mut self, map: &MapRoot, unit: i32, from: Coordinate, to: MapPos, max_step: i32) {
        self.cancel(unit);
        let weight = from.weight;
        if !from.is_in_bounds(map.weight()) || !to.is_in_bounds(weight, map.weight()) {
            self.results.insert(
                unit,
                PathResult::Failed(SimError::OutOfRange {
                    row: to.row,
                    col: to.col,
                    weight,
                }),
            );
            return;
        }
        if from.pos == to {
            self.results.insert(unit, PathResult::Found(Vec::new()));
            return;
        }
        let goal_open = map
            .lookup(to, weight)
            .and_then(|cell| surface(map, cell))
            .is_some_and(|(t, _)| t.is_walkable());
        if !goal_open {
            trace!("Unit {} path goal ({}, {}) is blocked", unit, to.row, to.col);
            self.results.insert(unit, PathResult::Failed(SimError::Unreachable(unit)));
            return;
        }

        let side = map.side(weight);
        let mut search = Search {
            unit,
            weight,
            side,
            goal: to,
            max_step,
            open: BinaryHeap::new(),
            nodes: HashMap::new(),
            closed: FixedBitSet::with_capacity((side * side) as usize),
            seq: 0,
            expanded: 0,
        };
        let start = search.local(from.pos);
        search.nodes.insert(start, (start, 0, from.altitude));
        search.push(start, 0);
        self.searches.push(search);
    }

    /// Drop a unit's search and any unread result.
    pub fn cancel(&mut self, unit: i32) {
        self.searches.retain(|s| s.unit != unit);
        self.results.remove(&unit);
    }

    pub fn is_searching(&self, unit: i32) -> bool {
        self.searches.iter().any(|s| s.unit == unit)
    }

    pub fn pending(&self) -> usize {
        self.searches.len()
    }

    /// Spend this tick's budget.
    pub fn update(&mut self, map: &MapRoot) {
        if self.searches.is_empty() {
            return;
        }
        let n = self.searches.len();
        let share = self.budget / n;
        let extra = self.budget % n;

        let mut finished = Vec::new();
        for (i, search) in self.searches.iter_mut().enumerate() {
            let budget = (share + usize::from(i < extra)).max(1);
            if let Some(result) = search.run(map, budget) {
                if let PathResult::Failed(_) = &result {
                    trace!("Unit {} path search failed after {} expansions", search.unit, search.expanded);
                }
                finished.push((search.unit, result));
            }
        }
        for (unit, result) in finished {
            self.searches.retain(|s| s.unit != unit);
            self.results.insert(unit, result);
        }
    }

    pub fn take_result(&mut self, unit: i32) -> Option<PathResult> {
        self.results.remove(&unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::VoxelData;

    fn unit_coord(map: &MapRoot, unit: i32) -> Coordinate {
        map.unit_coordinate(unit).unwrap()
    }

    /// First walkable cell scanning row-major from `pos`.
    fn open_cell_from(map: &MapRoot, pos: MapPos, weight: i32) -> MapPos {
        let side = map.side(weight);
        (pos.row * side + pos.col..side * side)
            .map(|i| MapPos::new(i / side, i % side))
            .find(|&p| {
                let cell = map.lookup(p, weight).unwrap();
                surface(map, cell).is_some_and(|(t, _)| t.is_walkable())
            })
            .unwrap()
    }

    #[test]
    fn test_finds_path_around_unit() {
        let map = MapRoot::test_env0().unwrap();
        let mut pf = PathFinder::new(64);
        // player 1's eater (1, 1) to (3, 2)
        pf.request(&map, 1, unit_coord(&map, 1), MapPos::new(3, 2), 2);
        pf.update(&map);
        let Some(PathResult::Found(path)) = pf.take_result(1) else {
            panic!("expected a path");
        };
        assert_eq!(path.len(), 3);
        assert_eq!(path.last(), Some(&MapPos::new(3, 2)));
        let mut prev = MapPos::new(1, 1);
        for step in &path {
            assert!(Dir::between(prev, *step).is_some());
            prev = *step;
        }
    }

    #[test]
    fn test_time_sliced_and_deterministic() {
        let map = MapRoot::generate(6, 1, 2, 9).unwrap();
        let eater = map.find_unit_ids(VoxelType::Eater, Some(0))[0];
        let from = unit_coord(&map, eater);
        let goal = open_cell_from(&map, MapPos::new(24, 24), 1);
        let run = || {
            let mut pf = PathFinder::new(3);
            pf.request(&map, eater, from, goal, 2);
            let mut ticks = 0;
            loop {
                ticks += 1;
                pf.update(&map);
                if let Some(r) = pf.take_result(eater) {
                    return (ticks, r);
                }
                assert!(ticks < 2000);
            }
        };
        let (ticks_a, a) = run();
        let (ticks_b, b) = run();
        assert!(ticks_a > 1);
        assert_eq!(ticks_a, ticks_b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unreachable_fails_within_bound() {
        let mut map = MapRoot::test_env0().unwrap();
        // wall off (3, 0): obstacles on (2, 0) and (3, 1)
        for pos in [MapPos::new(2, 0), MapPos::new(3, 1)] {
            let cell = map.cell_id(pos, 2).unwrap();
            map.append(cell, VoxelData::new(VoxelType::Obstacle, 2, -1)).unwrap();
        }
        let budget = 2;
        let cells = 16;
        let mut pf = PathFinder::new(budget);
        pf.request(&map, 1, unit_coord(&map, 1), MapPos::new(3, 0), 2);
        let bound = cells / budget + 1;
        let mut result = None;
        for _ in 0..bound {
            pf.update(&map);
            result = pf.take_result(1);
            if result.is_some() {
                break;
            }
        }
        assert_eq!(result, Some(PathResult::Failed(SimError::Unreachable(1))));
        assert_eq!(pf.pending(), 0);
    }

    #[test]
    fn test_walled_goal_on_large_map_fails_within_bound() {
        let mut map = MapRoot::generate(6, 1, 2, 9).unwrap();
        let weight = 1;
        let side = map.side(weight) as usize;
        let cells = side * side;
        let eater = map.find_unit_ids(VoxelType::Eater, Some(0))[0];
        let from = unit_coord(&map, eater);
        let goal = open_cell_from(&map, MapPos::new(20, 20), weight);
        for dir in Dir::ALL {
            let next = goal.step(dir);
            if let Ok(cell) = map.cell_id(next, weight) {
                map.append(cell, VoxelData::new(VoxelType::Obstacle, 2, -1)).unwrap();
            }
        }

        for budget in [1, 7, 64] {
            let mut pf = PathFinder::new(budget);
            pf.request(&map, eater, from, goal, 2);
            let bound = cells.div_ceil(budget) + 1;
            let mut ticks = 0;
            let result = loop {
                ticks += 1;
                pf.update(&map);
                if let Some(r) = pf.take_result(eater) {
                    break r;
                }
                assert!(ticks <= bound, "budget {budget}: no verdict after {ticks} ticks");
            };
            assert_eq!(result, PathResult::Failed(SimError::Unreachable(eater)));
            assert!(ticks <= bound);
        }
    }

    #[test]
    fn test_blocked_goal_and_step_limit() {
        let map = MapRoot::test_env0().unwrap();
        let mut pf = PathFinder::new(16);
        // goal occupied by player 0's eater
        pf.request(&map, 1, unit_coord(&map, 1), MapPos::new(2, 3), 2);
        assert_eq!(pf.take_result(1), Some(PathResult::Failed(SimError::Unreachable(1))));

        let mut high = MapRoot::test_env0().unwrap();
        let cell = high.cell_id(MapPos::new(1, 2), 2).unwrap();
        let ground = high.top(cell).unwrap();
        high.set_height(ground, 9).unwrap();
        assert!(can_enter(&high, MapPos::new(1, 2), 2, 6, 2).is_none());
        assert_eq!(can_enter(&high, MapPos::new(1, 2), 2, 6, 3), Some(9));
    }

    #[test]
    fn test_budget_is_shared_fairly() {
        let map = MapRoot::generate(6, 1, 2, 3).unwrap();
        let a = map.find_unit_ids(VoxelType::Eater, Some(0))[0];
        let b = map.find_unit_ids(VoxelType::Eater, Some(1))[0];
        let goal = open_cell_from(&map, MapPos::new(16, 16), 1);
        let mut pf = PathFinder::new(5);
        pf.request(&map, a, unit_coord(&map, a), goal, 2);
        pf.request(&map, b, unit_coord(&map, b), goal, 2);
        pf.update(&map);
        let expanded: Vec<usize> = pf.searches.iter().map(|s| s.expanded).collect();
        assert_eq!(expanded.iter().sum::<usize>(), 5);
        assert_eq!(expanded, vec![3, 2]);
    }
}
