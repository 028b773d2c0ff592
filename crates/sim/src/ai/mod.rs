//! Computer-controlled players.

mod bot;

pub use bot::Bot;

use crate::config::{Abilities, SimConfig};
use crate::engine::TaskEngine;
use crate::map::MapRoot;
use crate::task::TaskInfo;

/// What a bot may look at when deciding.
#[derive(Debug, Clone, Copy)]
pub struct BotContext<'a> {
    pub map: &'a MapRoot,
    pub tasks: &'a TaskEngine,
    pub tick: i64,
    pub config: &'a SimConfig,
    pub abilities: &'a Abilities,
}

/// A decision taken by a bot.
#[derive(Debug, Clone, PartialEq)]
pub enum BotOrder {
    /// Give `unit` a new program.
    Submit { player: u32, unit: i32, tree: TaskInfo },
    /// Drop the program of `unit`.
    Cancel { player: u32, unit: i32 },
}

/// All bots of a match, updated in registration order.
#[derive(Debug, Default)]
pub struct BotManager {
    pub bots: Vec<Bot>,
}

impl BotManager {
    pub fn new() -> Self {
        Self { bots: Vec::new() }
    }

    pub fn add_bot(&mut self, player_id: u32, index: i32, seed: u64) {
        self.bots.push(Bot::new(player_id, index, seed));
    }

    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }

    /// Let every bot think. `abilities` is looked up per bot, skipping bots
    /// listed in `skip` (defeated players).
    pub fn think(
        &mut self,
        map: &MapRoot,
        tasks: &TaskEngine,
        tick: i64,
        config: &SimConfig,
        abilities: impl Fn(i32) -> Abilities,
        skip: impl Fn(u32) -> bool,
    ) -> Vec<BotOrder> {
        let mut orders = Vec::new();
        for bot in &mut self.bots {
            if skip(bot.player_id) {
                continue;
            }
            let abilities = abilities(bot.index);
            let ctx = BotContext {
                map,
                tasks,
                tick,
                config,
                abilities: &abilities,
            };
            orders.extend(bot.think(&ctx));
        }
        orders
    }
}
