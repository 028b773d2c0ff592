//! Simulation tuning and per-voxel-type abilities.
//!
//! Loaded as the `[sim]` section of the server's `config.toml`.

use serde::{Deserialize, Serialize};

use crate::map::VoxelType;

/// Deterministic simulation settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimConfig {
    /// Seed for map generation and bot decisions.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Hard stop for a match (0 = unlimited).
    #[serde(default = "default_max_ticks")]
    pub max_ticks: i64,
    /// Node expansions per tick for human units.
    #[serde(default = "default_path_budget")]
    pub path_budget: usize,
    /// Node expansions per tick for bot units.
    #[serde(default = "default_bot_path_budget")]
    pub bot_path_budget: usize,
    /// Re-path attempts after a blocked step before a move fails.
    #[serde(default = "default_max_repath")]
    pub max_repath: u32,
    /// Camera radius (in cells at the unit's weight) used by visibility guards.
    #[serde(default = "default_sight_radius")]
    pub sight_radius: i32,
    /// Ticks between bot decisions.
    #[serde(default = "default_bot_think_interval")]
    pub bot_think_interval: i64,
    /// Ticks after which a bot gives up on an unfinished task.
    #[serde(default = "default_bot_task_timeout")]
    pub bot_task_timeout: i64,
    /// Ticks between spawner productions.
    #[serde(default = "default_spawn_interval")]
    pub spawn_interval: i64,
    /// Keep the final state of detached task trees.
    #[serde(default)]
    pub retain_finished_tasks: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            max_ticks: default_max_ticks(),
            path_budget: default_path_budget(),
            bot_path_budget: default_bot_path_budget(),
            max_repath: default_max_repath(),
            sight_radius: default_sight_radius(),
            bot_think_interval: default_bot_think_interval(),
            bot_task_timeout: default_bot_task_timeout(),
            spawn_interval: default_spawn_interval(),
            retain_finished_tasks: false,
        }
    }
}

fn default_seed() -> u64 {
    0x5EED
}
fn default_max_ticks() -> i64 {
    36_000
}
fn default_path_budget() -> usize {
    256
}
fn default_bot_path_budget() -> usize {
    128
}
fn default_max_repath() -> u32 {
    3
}
fn default_sight_radius() -> i32 {
    4
}
fn default_bot_think_interval() -> i64 {
    10
}
fn default_bot_task_timeout() -> i64 {
    200
}
fn default_spawn_interval() -> i64 {
    100
}

/// What a voxel type may do and how fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct VoxelAbilities {
    pub max_health: i32,
    pub min_height: i32,
    pub max_height: i32,
    /// Ticks per waypoint (0 = immobile).
    pub move_ticks: i64,
    /// Cooldown after grow/diminish/split/convert.
    pub act_ticks: i64,
    /// Largest altitude difference a single step may climb or drop.
    pub max_step: i32,
    pub can_split: bool,
    pub can_convert: bool,
}

impl VoxelAbilities {
    pub const fn immobile() -> Self {
        Self {
            max_health: 1,
            min_height: 1,
            max_height: 1,
            move_ticks: 0,
            act_ticks: 0,
            max_step: 0,
            can_split: false,
            can_convert: false,
        }
    }

    #[inline]
    pub fn can_move(&self) -> bool {
        self.move_ticks > 0
    }
}

/// Abilities of every unit type for one player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Abilities {
    #[serde(default = "default_eater")]
    pub eater: VoxelAbilities,
    #[serde(default = "default_bomb")]
    pub bomb: VoxelAbilities,
    #[serde(default = "default_spawner")]
    pub spawner: VoxelAbilities,
}

impl Abilities {
    pub fn defaults() -> Self {
        Self {
            eater: default_eater(),
            bomb: default_bomb(),
            spawner: default_spawner(),
        }
    }

    /// Abilities for a voxel type; non-unit types are immobile.
    pub fn of(&self, voxel_type: VoxelType) -> VoxelAbilities {
        match voxel_type {
            VoxelType::Eater => self.eater,
            VoxelType::Bomb => self.bomb,
            VoxelType::Spawner => self.spawner,
            _ => VoxelAbilities::immobile(),
        }
    }
}

impl Default for Abilities {
    fn default() -> Self {
        Self::defaults()
    }
}

fn default_eater() -> VoxelAbilities {
    VoxelAbilities {
        max_health: 8,
        min_height: 1,
        max_height: 4,
        move_ticks: 2,
        act_ticks: 4,
        max_step: 2,
        can_split: true,
        can_convert: true,
    }
}

fn default_bomb() -> VoxelAbilities {
    VoxelAbilities {
        max_health: 1,
        min_height: 1,
        max_height: 1,
        move_ticks: 3,
        act_ticks: 1,
        max_step: 1,
        can_split: false,
        can_convert: false,
    }
}

fn default_spawner() -> VoxelAbilities {
    VoxelAbilities {
        max_health: 16,
        min_height: 2,
        max_height: 2,
        move_ticks: 0,
        act_ticks: 0,
        max_step: 0,
        can_split: false,
        can_convert: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: SimConfig = toml::from_str("max_ticks = 50\nretain_finished_tasks = true").unwrap();
        assert_eq!(cfg.max_ticks, 50);
        assert!(cfg.retain_finished_tasks);
        assert_eq!(cfg.path_budget, default_path_budget());
        assert_eq!(cfg.seed, default_seed());
    }

    #[test]
    fn test_abilities_of_terrain_is_immobile() {
        let abilities = Abilities::defaults();
        assert!(abilities.of(VoxelType::Eater).can_move());
        assert!(!abilities.of(VoxelType::Ground).can_move());
        assert!(!abilities.of(VoxelType::Spawner).can_move());
    }
}
