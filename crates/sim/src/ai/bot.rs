use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{BotContext, BotOrder};
use crate::coords::{Coordinate, Dir, MapPos};
use crate::map::{MapCamera, VoxelType};
use crate::pathfinder::surface;
use crate::task::{Cmd, CmdCode, TaskInfo};

/// A computer-controlled player.
#[derive(Debug)]
pub struct Bot {
    /// Player id the bot plays as.
    pub player_id: u32,
    /// Player index owning its units.
    pub index: i32,
    rng: StdRng,
    /// Ticks until the next decision.
    think_cooldown: i64,
}

impl Bot {
    /// The bot's choices depend only on `seed` and the match state.
    pub fn new(player_id: u32, index: i32, seed: u64) -> Self {
        let mixed = seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self {
            player_id,
            index,
            rng: StdRng::seed_from_u64(mixed),
            think_cooldown: 0,
        }
    }

    /// Decide programs for the bot's units. Only units without a live tree
    /// get one; trees running longer than the bot timeout are cancelled.
    pub fn think(&mut self, ctx: &BotContext<'_>) -> Vec<BotOrder> {
        if self.think_cooldown > 0 {
            self.think_cooldown -= 1;
            return Vec::new();
        }
        self.think_cooldown = (ctx.config.bot_think_interval - 1).max(0);

        let mut orders = Vec::new();
        let mut units = ctx.map.find_unit_ids(VoxelType::Eater, Some(self.index));
        units.extend(ctx.map.find_unit_ids(VoxelType::Bomb, Some(self.index)));
        units.sort_unstable();

        for unit in units {
            if let Some(added) = ctx.tasks.added_at(unit) {
                if ctx.tick - added > ctx.config.bot_task_timeout {
                    debug!("Bot {} unit {} timed out", self.player_id, unit);
                    orders.push(BotOrder::Cancel { player: self.player_id, unit });
                }
                continue;
            }
            if let Some(tree) = self.plan(ctx, unit) {
                orders.push(BotOrder::Submit {
                    player: self.player_id,
                    unit,
                    tree,
                });
            }
        }
        orders
    }

    fn plan(&mut self, ctx: &BotContext<'_>, unit: i32) -> Option<TaskInfo> {
        let data = ctx.map.unit_data(unit)?;
        let here = ctx.map.unit_coordinate(unit)?;
        let abilities = ctx.abilities.of(data.voxel_type);
        let camera = MapCamera::new(here.pos, here.weight, ctx.config.sight_radius);

        if data.voxel_type == VoxelType::Bomb {
            let enemies = self.visible(ctx, &camera, here, |v| v.voxel_type.is_unit() && v.owner != self.index);
            return match enemies.first() {
                Some(enemy) if enemy.pos.manhattan(here.pos) <= 1 => {
                    Some(TaskInfo::command(Cmd::new(CmdCode::Explode, unit)))
                }
                Some(enemy) => approach(ctx, unit, here, enemy.pos),
                None => self.wander(ctx, unit, here, abilities.max_step),
            };
        }

        let food = self.visible(ctx, &camera, here, |v| v.voxel_type == VoxelType::Eatable);
        if let Some(target) = food.first() {
            return Some(TaskInfo::command(Cmd::move_to(unit, *target)));
        }
        if abilities.can_split && data.height >= abilities.min_height * 2 && self.rng.random_range(0..4) == 0 {
            let dir = Dir::ALL[self.rng.random_range(0..Dir::ALL.len())];
            return Some(TaskInfo::command(Cmd::split(unit, dir)));
        }
        self.wander(ctx, unit, here, abilities.max_step)
    }

    /// Coordinates of matching indexed voxels in sight, nearest first.
    fn visible(
        &self,
        ctx: &BotContext<'_>,
        camera: &MapCamera,
        here: Coordinate,
        keep: impl Fn(&crate::map::VoxelData) -> bool,
    ) -> Vec<Coordinate> {
        let mut found: Vec<Coordinate> = ctx
            .map
            .units()
            .filter_map(|(_, id)| {
                let v = ctx.map.voxel(id)?;
                if !keep(v) {
                    return None;
                }
                let c = ctx.map.voxel_coordinate(id)?;
                (c.weight == here.weight && camera.contains(&c)).then_some(c)
            })
            .collect();
        found.sort_by_key(|c| c.pos.manhattan(here.pos));
        found
    }

    /// Walk to a random cell within sight.
    fn wander(&mut self, ctx: &BotContext<'_>, unit: i32, here: Coordinate, max_step: i32) -> Option<TaskInfo> {
        if max_step <= 0 {
            return None;
        }
        let r = ctx.config.sight_radius.max(1);
        for _ in 0..4 {
            let drow = self.rng.random_range(-r..=r);
            let dcol = self.rng.random_range(-r..=r);
            let Some(target) = here.checked_add(drow, dcol, ctx.map.weight()) else {
                continue;
            };
            if target.pos != here.pos && walkable(ctx, target.pos, here.weight) {
                return Some(TaskInfo::command(Cmd::move_to(unit, target)));
            }
        }
        Some(TaskInfo::command(Cmd::wait(unit, ctx.config.bot_think_interval as i32)))
    }
}

fn walkable(ctx: &BotContext<'_>, pos: MapPos, weight: i32) -> bool {
    ctx.map
        .lookup(pos, weight)
        .and_then(|cell| surface(ctx.map, cell))
        .is_some_and(|(t, _)| t.is_walkable())
}

/// Walk next to `goal`.
fn approach(ctx: &BotContext<'_>, unit: i32, here: Coordinate, goal: MapPos) -> Option<TaskInfo> {
    Dir::ALL
        .iter()
        .map(|d| goal.step(*d))
        .filter(|p| walkable(ctx, *p, here.weight))
        .min_by_key(|p| p.manhattan(here.pos))
        .map(|p| TaskInfo::command(Cmd::move_to(unit, Coordinate { pos: p, ..here })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Abilities, SimConfig};
    use crate::engine::TaskEngine;
    use crate::map::MapRoot;

    #[test]
    fn test_eater_seeks_visible_food() {
        let map = MapRoot::test_env0().unwrap();
        let tasks = TaskEngine::new(false);
        let config = SimConfig {
            sight_radius: 4,
            ..SimConfig::default()
        };
        let ctx = BotContext {
            map: &map,
            tasks: &tasks,
            tick: 1,
            config: &config,
            abilities: &Abilities::defaults(),
        };
        let mut bot = Bot::new(9, 1, 42);
        let orders = bot.think(&ctx);
        assert_eq!(orders.len(), 1);
        let BotOrder::Submit { unit, tree, .. } = &orders[0] else {
            panic!("expected a submission");
        };
        assert_eq!(*unit, 1);
        let cmd = tree.cmd.unwrap();
        assert_eq!(cmd.code, CmdCode::Move);
        // food at (0,0) is nearest to (1,1)
        assert_eq!(cmd.target.unwrap().pos, MapPos::new(0, 0));
    }

    #[test]
    fn test_same_seed_same_choices() {
        let map = MapRoot::generate(6, 2, 2, 3).unwrap();
        let tasks = TaskEngine::new(false);
        let config = SimConfig {
            sight_radius: 1,
            ..SimConfig::default()
        };
        let ctx = BotContext {
            map: &map,
            tasks: &tasks,
            tick: 1,
            config: &config,
            abilities: &Abilities::defaults(),
        };
        let a = Bot::new(1, 0, 7).think(&ctx);
        let b = Bot::new(1, 0, 7).think(&ctx);
        assert_eq!(a, b);
    }
}
