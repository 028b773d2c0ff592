//! The match engine: owns the map and every per-match subsystem and advances
//! them one tick at a time in a fixed order.
//!
//! Phases: `Registration -> Running -> Ended`. Inputs (submissions and
//! connectivity changes) are validated when they arrive, queued, and drained
//! at the start of the next tick. A tick emits a [`CommandsBundle`] only when
//! something observable changed.

use std::collections::{BTreeMap, VecDeque};

use protocol::codec::read_tag;
use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};
use tracing::{debug, info, warn};

use crate::ai::{BotManager, BotOrder};
use crate::bundle::{BundleCommand, CommandsBundle};
use crate::config::{Abilities, SimConfig};
use crate::coords::{Coordinate, Dir};
use crate::engine::{EvalEnv, Lane, Lanes, TaskEngine};
use crate::error::{SimError, SimResult};
use crate::map::{MapRoot, UnitActivity, VoxelData, VoxelId, VoxelType};
use crate::pathfinder::can_enter;
use crate::runner::{ActionOutcome, UnitIntent};
use crate::task::{Cmd, TaskId, TaskIdAlloc, TaskInfo, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Registration,
    Running,
    Ended,
}

/// An accepted input, as drained at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchInput {
    Submit { player: u32, tree: TaskInfo },
    Connection { player: u32, connected: bool },
}

impl Encode for MatchInput {
    fn encode(&self, w: &mut BinaryWriter) {
        match self {
            MatchInput::Submit { player, tree } => {
                w.put_u8(0);
                w.put_u32(*player);
                tree.encode(w);
            }
            MatchInput::Connection { player, connected } => {
                w.put_u8(1);
                w.put_u32(*player);
                connected.encode(w);
            }
        }
    }
}

impl Decode for MatchInput {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        match read_tag(r)? {
            0 => Ok(MatchInput::Submit {
                player: u32::decode(r)?,
                tree: TaskInfo::decode(r)?,
            }),
            1 => Ok(MatchInput::Connection {
                player: u32::decode(r)?,
                connected: bool::decode(r)?,
            }),
            tag => Err(ProtocolError::InvalidTag { what: "match input", tag }),
        }
    }
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInfo {
    pub id: u32,
    /// Owner index of the player's voxels.
    pub index: i32,
    pub abilities: Abilities,
    pub bot: bool,
    pub connected: bool,
    pub defeated: bool,
}

#[derive(Debug)]
pub struct MatchEngine {
    config: SimConfig,
    phase: MatchPhase,
    tick: i64,
    map: MapRoot,
    players: BTreeMap<u32, PlayerInfo>,
    /// Abilities by player index.
    abilities: BTreeMap<i32, Abilities>,
    pending: VecDeque<MatchInput>,
    last_inputs: Vec<MatchInput>,
    last_bundle: Option<CommandsBundle>,
    ids: TaskIdAlloc,
    tasks: TaskEngine,
    lanes: Lanes,
    bots: BotManager,
    winner: Option<u32>,
}

impl MatchEngine {
    pub fn new(map: MapRoot, config: SimConfig) -> Self {
        let lanes = Lanes::new(
            Lane::new(config.path_budget, config.max_repath),
            Lane::new(config.bot_path_budget, config.max_repath),
        );
        Self {
            tasks: TaskEngine::new(config.retain_finished_tasks),
            config,
            phase: MatchPhase::Registration,
            tick: 0,
            map,
            players: BTreeMap::new(),
            abilities: BTreeMap::new(),
            pending: VecDeque::new(),
            last_inputs: Vec::new(),
            last_bundle: None,
            ids: TaskIdAlloc::new(),
            lanes,
            bots: BotManager::new(),
            winner: None,
        }
    }

    // ---- Registration ----

    pub fn register_player(&mut self, id: u32, index: i32, abilities: Abilities) -> SimResult<()> {
        self.register(id, index, abilities, false)
    }

    /// Register a player driven by the built-in bot.
    pub fn register_bot(&mut self, id: u32, index: i32, abilities: Abilities) -> SimResult<()> {
        self.register(id, index, abilities, true)
    }

    fn register(&mut self, id: u32, index: i32, abilities: Abilities, bot: bool) -> SimResult<()> {
        if self.phase != MatchPhase::Registration {
            return Err(SimError::InvalidState("registration is closed"));
        }
        if index < 0 {
            return Err(SimError::InvalidTarget(format!("player index {index}")));
        }
        if self.players.contains_key(&id) {
            return Err(SimError::InvalidState("player already registered"));
        }
        if self.players.values().any(|p| p.index == index) {
            return Err(SimError::InvalidTarget(format!("player index {index} is taken")));
        }
        self.players.insert(
            id,
            PlayerInfo {
                id,
                index,
                abilities,
                bot,
                connected: true,
                defeated: false,
            },
        );
        self.abilities.insert(index, abilities);
        if bot {
            self.lanes.mark_bot(index);
            self.bots.add_bot(id, index, self.config.seed);
        }
        info!("Registered {} {} as index {}", if bot { "bot" } else { "player" }, id, index);
        Ok(())
    }

    /// Close registration and start the match.
    pub fn complete_player_registration(&mut self) -> SimResult<()> {
        if self.phase != MatchPhase::Registration {
            return Err(SimError::InvalidState("registration is closed"));
        }
        if self.players.is_empty() {
            return Err(SimError::InvalidState("no players registered"));
        }
        self.phase = MatchPhase::Running;
        info!("Match started with {} players", self.players.len());
        Ok(())
    }

    // ---- Inputs ----

    /// Queue a task tree for the next tick.
    pub fn submit(&mut self, player_id: u32, tree: TaskInfo) -> SimResult<()> {
        let result = self.check_submission(player_id, &tree);
        match result {
            Ok(unit) => {
                debug!("Player {} queued task tree for unit {}", player_id, unit);
                self.pending.push_back(MatchInput::Submit { player: player_id, tree });
                Ok(())
            }
            Err(e) => {
                debug!("Rejected submission from player {}: {}", player_id, e);
                Err(e)
            }
        }
    }

    /// Queue a single command for the next tick.
    pub fn submit_cmd(&mut self, player_id: u32, cmd: Cmd) -> SimResult<()> {
        self.submit(player_id, TaskInfo::command(cmd))
    }

    /// Queue a connectivity change for the next tick.
    pub fn set_player_connected(&mut self, player_id: u32, connected: bool) -> SimResult<()> {
        if self.phase == MatchPhase::Ended {
            return Err(SimError::InvalidState("match has ended"));
        }
        if !self.players.contains_key(&player_id) {
            return Err(SimError::InvalidOwner {
                player: player_id as i32,
                unit: -1,
            });
        }
        self.pending.push_back(MatchInput::Connection {
            player: player_id,
            connected,
        });
        Ok(())
    }

    /// Re-apply a recorded input.
    pub fn apply_input(&mut self, input: MatchInput) -> SimResult<()> {
        match input {
            MatchInput::Submit { player, tree } => self.submit(player, tree),
            MatchInput::Connection { player, connected } => self.set_player_connected(player, connected),
        }
    }

    fn check_submission(&self, player_id: u32, tree: &TaskInfo) -> SimResult<i32> {
        if self.phase != MatchPhase::Running {
            return Err(SimError::InvalidState("match is not running"));
        }
        let player = self.players.get(&player_id).ok_or(SimError::InvalidOwner {
            player: player_id as i32,
            unit: tree.units().first().copied().unwrap_or(-1),
        })?;
        if !player.connected {
            return Err(SimError::InvalidState("player is disconnected"));
        }
        if player.defeated {
            return Err(SimError::InvalidState("player is defeated"));
        }
        let mut started = false;
        tree.walk(&mut |t| started |= t.state != TaskState::Idle);
        if started {
            return Err(SimError::InvalidTarget("task tree already started".into()));
        }
        self.check_tree(player, tree)
    }

    /// Shape, ownership and range checks shared by players and bots.
    /// Returns the unit the tree drives.
    fn check_tree(&self, player: &PlayerInfo, tree: &TaskInfo) -> SimResult<i32> {
        tree.validate()?;
        let units = tree.units();
        let mut it = units.iter();
        let unit = match (it.next(), it.next()) {
            (Some(&u), None) => u,
            (None, _) => return Err(SimError::InvalidTarget("task tree drives no unit".into())),
            _ => return Err(SimError::InvalidTarget("task tree drives several units".into())),
        };
        let data = self
            .map
            .unit_data(unit)
            .filter(|v| v.voxel_type.is_unit())
            .ok_or_else(|| SimError::InvalidTarget(format!("unit {unit} does not exist")))?;
        if data.owner != player.index {
            return Err(SimError::InvalidOwner {
                player: player.id as i32,
                unit,
            });
        }
        let map_weight = self.map.weight();
        let mut outside = None;
        tree.walk(&mut |t| {
            if let Some(target) = t.cmd.and_then(|c| c.target) {
                if outside.is_none() && !target.is_in_bounds(map_weight) {
                    outside = Some(target);
                }
            }
        });
        if let Some(c) = outside {
            return Err(SimError::OutOfRange {
                row: c.row(),
                col: c.col(),
                weight: c.weight,
            });
        }
        Ok(unit)
    }

    // ---- Tick ----

    /// Advance the match by one tick. Returns `None` when nothing observable
    /// happened; the tick counter advances either way.
    pub fn tick(&mut self) -> SimResult<Option<CommandsBundle>> {
        match self.phase {
            MatchPhase::Registration => return Err(SimError::InvalidState("match has not started")),
            MatchPhase::Ended => return Err(SimError::InvalidState("match has ended")),
            MatchPhase::Running => {}
        }
        self.tick += 1;
        let tick = self.tick;
        let mut bundle = CommandsBundle::new(tick);

        let inputs: Vec<MatchInput> = self.pending.drain(..).collect();
        for input in &inputs {
            self.drain_input(input, &mut bundle);
        }
        self.last_inputs = inputs;
        self.cool_down();

        let mut intents = self.lanes.human.update(&self.map, &self.abilities);
        intents.extend(self.lanes.bot.update(&self.map, &self.abilities));
        self.think_bots(&mut bundle);

        let env = EvalEnv {
            map: &self.map,
            sight_radius: self.config.sight_radius,
        };
        for t in self.tasks.update(tick, &env, &mut self.lanes) {
            bundle.push(BundleCommand::TaskStateChanged {
                task: t.task,
                unit: t.unit,
                from: t.from,
                to: t.to,
            });
        }

        for intent in intents {
            self.resolve(intent, &mut bundle);
        }
        self.run_spawners(&mut bundle)?;
        self.check_players(&mut bundle);

        let out = (!bundle.is_empty()).then_some(bundle);
        self.last_bundle = out.clone();
        Ok(out)
    }

    fn drain_input(&mut self, input: &MatchInput, bundle: &mut CommandsBundle) {
        match input {
            MatchInput::Submit { player, tree } => {
                let checked = self
                    .players
                    .get(player)
                    .ok_or(SimError::InvalidState("player left"))
                    .and_then(|p| self.check_tree(p, tree).map(|unit| (unit, p.index)));
                match checked {
                    Ok((unit, owner)) => self.install(*player, unit, owner, tree.clone(), bundle),
                    Err(e) => debug!("Dropped queued tree of player {}: {}", player, e),
                }
            }
            MatchInput::Connection { player, connected } => {
                if let Some(p) = self.players.get_mut(player) {
                    if p.connected != *connected {
                        p.connected = *connected;
                        info!("Player {} {}", player, if *connected { "reconnected" } else { "disconnected" });
                        bundle.push(BundleCommand::PlayerStateChanged {
                            player: *player,
                            connected: *connected,
                        });
                    }
                }
            }
        }
    }

    fn install(&mut self, player: u32, unit: i32, owner: i32, mut tree: TaskInfo, bundle: &mut CommandsBundle) {
        tree.assign_ids(&mut self.ids);
        bundle.push(BundleCommand::Submitted {
            player,
            unit,
            task: tree.id,
        });
        self.tasks.add_tree(self.tick, unit, owner, tree, &mut self.lanes);
    }

    fn cool_down(&mut self) {
        let ids: Vec<VoxelId> = self.map.units().map(|(_, id)| id).collect();
        for id in ids {
            if let Some(state) = self.map.voxel_mut(id).and_then(|v| v.unit.as_mut()) {
                if state.cooldown > 0 {
                    state.cooldown -= 1;
                    if state.cooldown == 0 {
                        state.activity = UnitActivity::Idle;
                    }
                }
            }
        }
    }

    fn think_bots(&mut self, bundle: &mut CommandsBundle) {
        if self.bots.is_empty() {
            return;
        }
        let players = &self.players;
        let abilities = &self.abilities;
        let orders = self.bots.think(
            &self.map,
            &self.tasks,
            self.tick,
            &self.config,
            |index| abilities.get(&index).copied().unwrap_or_default(),
            |id| players.get(&id).is_none_or(|p| p.defeated),
        );
        for order in orders {
            match order {
                BotOrder::Submit { player, unit, tree } => {
                    let Some(p) = self.players.get(&player) else {
                        continue;
                    };
                    match self.check_tree(p, &tree) {
                        Ok(checked) if checked == unit => {
                            let owner = p.index;
                            self.install(player, unit, owner, tree, bundle);
                        }
                        Ok(_) => {}
                        Err(e) => debug!("Bot {} order for unit {} dropped: {}", player, unit, e),
                    }
                }
                BotOrder::Cancel { unit, .. } => {
                    self.tasks.cancel_unit(self.tick, unit, &mut self.lanes);
                }
            }
        }
    }

    fn abilities_of(&self, owner: i32) -> Abilities {
        self.abilities.get(&owner).copied().unwrap_or_default()
    }

    fn resolve(&mut self, intent: UnitIntent, bundle: &mut CommandsBundle) {
        let unit = intent.unit();
        // the unit may have been destroyed earlier this tick
        let Some(owner) = self.map.unit_data(unit).map(|v| v.owner) else {
            return;
        };
        if !self.lanes.for_owner(owner).runner.in_flight(unit) {
            return;
        }
        let outcome = self.apply(intent, bundle).unwrap_or_else(|e| {
            warn!("Intent {:?} failed to apply: {}", intent, e);
            ActionOutcome::Rejected
        });
        let lane = self.lanes.for_owner(owner);
        lane.runner.on_resolved(unit, outcome, &mut lane.pathfinder);
    }

    fn set_busy(&mut self, id: VoxelId, activity: UnitActivity, ticks: i64) {
        if let Some(state) = self.map.voxel_mut(id).and_then(|v| v.unit.as_mut()) {
            state.activity = activity;
            state.cooldown = ticks;
        }
    }

    fn apply(&mut self, intent: UnitIntent, bundle: &mut CommandsBundle) -> SimResult<ActionOutcome> {
        let unit = intent.unit();
        let id = self
            .map
            .unit(unit)
            .ok_or_else(|| SimError::InvalidTarget(format!("unit {unit} is gone")))?;
        let data = self
            .map
            .voxel(id)
            .cloned()
            .ok_or_else(|| SimError::InvalidTarget(format!("unit {unit} is gone")))?;
        let here = self
            .map
            .voxel_coordinate(id)
            .ok_or_else(|| SimError::InvalidTarget(format!("unit {unit} is gone")))?;
        let abilities = self.abilities_of(data.owner);
        let ability = abilities.of(data.voxel_type);

        match intent {
            UnitIntent::Step { to, .. } => {
                let Some(dir) = Dir::between(here.pos, to) else {
                    return Ok(ActionOutcome::Rejected);
                };
                if !ability.can_move() {
                    return Ok(ActionOutcome::Rejected);
                }
                if can_enter(&self.map, to, here.weight, here.altitude, ability.max_step).is_none() {
                    return Ok(ActionOutcome::Blocked);
                }
                let cell = self.map.cell_id(to, here.weight)?;
                let food = self
                    .map
                    .top(cell)
                    .and_then(|top| self.map.voxel(top).map(|v| (top, v.voxel_type, v.unit_or_asset_index)))
                    .filter(|(_, t, _)| *t == VoxelType::Eatable);
                if let Some((food_id, _, food_index)) = food {
                    if data.voxel_type == VoxelType::Eater {
                        self.map.remove(food_id)?;
                        let health = (data.health + 1).min(ability.max_health);
                        if let Some(v) = self.map.voxel_mut(id) {
                            v.health = health;
                        }
                        bundle.push(BundleCommand::Ate {
                            unit,
                            food: food_index,
                            health,
                        });
                    }
                }
                self.map.move_to_top(id, cell)?;
                if let Some(v) = self.map.voxel_mut(id) {
                    v.dir = dir as u8;
                }
                self.set_busy(id, UnitActivity::Moving, ability.move_ticks);
                let arrived = self
                    .map
                    .voxel_coordinate(id)
                    .ok_or_else(|| SimError::InvalidTarget(format!("unit {unit} is gone")))?;
                bundle.push(BundleCommand::Moved {
                    unit,
                    from: here,
                    to: arrived,
                });
                Ok(ActionOutcome::Done)
            }
            UnitIntent::Grow { .. } => {
                if data.height >= ability.max_height || data.health < 2 {
                    return Ok(ActionOutcome::Rejected);
                }
                self.map.set_height(id, data.height + 1)?;
                self.set_health(id, data.health - 1);
                self.set_busy(id, UnitActivity::Acting, ability.act_ticks);
                bundle.push(BundleCommand::HeightChanged {
                    unit,
                    height: data.height + 1,
                    health: data.health - 1,
                });
                Ok(ActionOutcome::Done)
            }
            UnitIntent::Diminish { .. } => {
                if data.height <= ability.min_height {
                    return Ok(ActionOutcome::Rejected);
                }
                let health = (data.health + 1).min(ability.max_health);
                self.map.set_height(id, data.height - 1)?;
                self.set_health(id, health);
                self.set_busy(id, UnitActivity::Acting, ability.act_ticks);
                bundle.push(BundleCommand::HeightChanged {
                    unit,
                    height: data.height - 1,
                    health,
                });
                Ok(ActionOutcome::Done)
            }
            UnitIntent::Split { dir, .. } => {
                if !ability.can_split || data.height < ability.min_height * 2 || data.health < 2 {
                    return Ok(ActionOutcome::Rejected);
                }
                let to = here.pos.step(dir);
                if can_enter(&self.map, to, here.weight, here.altitude, ability.max_step).is_none() {
                    return Ok(ActionOutcome::Blocked);
                }
                let cell = self.map.cell_id(to, here.weight)?;
                let child_height = data.height / 2;
                let child_health = data.health / 2;
                self.map.set_height(id, data.height - child_height)?;
                self.set_health(id, data.health - child_health);
                self.set_busy(id, UnitActivity::Acting, ability.act_ticks);

                let mut child = VoxelData::new(data.voxel_type, child_height, data.owner).with_health(child_health);
                child.dir = dir as u8;
                let child_id = self.map.append(cell, child)?;
                self.set_busy(child_id, UnitActivity::Acting, ability.act_ticks);
                let child_index = self.map.voxel(child_id).map_or(-1, |v| v.unit_or_asset_index);
                let at = self
                    .map
                    .voxel_coordinate(child_id)
                    .ok_or_else(|| SimError::InvalidTarget(format!("unit {child_index} is gone")))?;
                bundle.push(BundleCommand::Split {
                    unit,
                    child: child_index,
                    at,
                });
                Ok(ActionOutcome::Done)
            }
            UnitIntent::Convert { into, .. } => {
                if !ability.can_convert || !into.is_unit() || into == data.voxel_type {
                    return Ok(ActionOutcome::Rejected);
                }
                let target = abilities.of(into);
                let height = data.height.clamp(target.min_height, target.max_height);
                let health = data.health.clamp(1, target.max_health.max(1));
                self.map.set_height(id, height)?;
                if let Some(v) = self.map.voxel_mut(id) {
                    v.voxel_type = into;
                    v.health = health;
                }
                self.set_busy(id, UnitActivity::Acting, target.act_ticks);
                bundle.push(BundleCommand::Converted { unit, into });
                if height != data.height || health != data.health {
                    bundle.push(BundleCommand::HeightChanged { unit, height, health });
                }
                Ok(ActionOutcome::Done)
            }
            UnitIntent::Explode { .. } => {
                if data.voxel_type != VoxelType::Bomb {
                    return Ok(ActionOutcome::Rejected);
                }
                self.map.remove(id)?;
                bundle.push(BundleCommand::Exploded { unit, at: here });
                for dir in Dir::ALL {
                    let Some(cell) = self.map.lookup(here.pos.step(dir), here.weight) else {
                        continue;
                    };
                    let Some(top) = self.map.top(cell) else {
                        continue;
                    };
                    let hit = self
                        .map
                        .voxel(top)
                        .filter(|v| v.voxel_type.is_indexed())
                        .map(|v| v.unit_or_asset_index);
                    if let Some(index) = hit {
                        self.map.remove(top)?;
                        bundle.push(BundleCommand::Destroyed { index, by: unit });
                    }
                }
                Ok(ActionOutcome::Done)
            }
        }
    }

    fn set_health(&mut self, id: VoxelId, health: i32) {
        if let Some(v) = self.map.voxel_mut(id) {
            v.health = health;
        }
    }

    /// Every `spawn_interval` ticks each spawner places an Eater on its
    /// first enterable neighbour (north, east, south, west).
    fn run_spawners(&mut self, bundle: &mut CommandsBundle) -> SimResult<()> {
        let interval = self.config.spawn_interval;
        if interval <= 0 || self.tick % interval != 0 {
            return Ok(());
        }
        for spawner in self.map.find_unit_ids(VoxelType::Spawner, None) {
            let (Some(data), Some(here)) = (self.map.unit_data(spawner), self.map.unit_coordinate(spawner)) else {
                continue;
            };
            let owner = data.owner;
            let eater = self.abilities_of(owner).eater;
            let free = Dir::ALL.into_iter().map(|d| here.pos.step(d)).find(|p| {
                can_enter(&self.map, *p, here.weight, here.altitude, eater.max_step).is_some()
                    && self
                        .map
                        .lookup(*p, here.weight)
                        .and_then(|c| self.map.top_voxel(c))
                        .is_none_or(|v| v.voxel_type != VoxelType::Eatable)
            });
            let Some(pos) = free else {
                continue;
            };
            let cell = self.map.cell_id(pos, here.weight)?;
            let voxel = VoxelData::new(VoxelType::Eater, eater.min_height, owner).with_health((eater.max_health / 4).max(1));
            let id = self.map.append(cell, voxel)?;
            let unit = self.map.voxel(id).map_or(-1, |v| v.unit_or_asset_index);
            let at = self
                .map
                .voxel_coordinate(id)
                .ok_or_else(|| SimError::InvalidTarget(format!("unit {unit} is gone")))?;
            debug!("Spawner {} produced unit {} for player index {}", spawner, unit, owner);
            bundle.push(BundleCommand::Spawned { unit, owner, at });
        }
        Ok(())
    }

    /// Defeat players without units and end the match when decided.
    fn check_players(&mut self, bundle: &mut CommandsBundle) {
        for p in self.players.values_mut() {
            if !p.defeated && !self.map.has_units(p.index) {
                p.defeated = true;
                info!("Player {} was defeated at tick {}", p.id, self.tick);
                bundle.push(BundleCommand::PlayerDefeated { player: p.id });
            }
        }
        let alive: Vec<&PlayerInfo> = self.players.values().filter(|p| !p.defeated).collect();
        let decided = if self.players.len() >= 2 {
            alive.len() <= 1
        } else {
            alive.is_empty()
        };
        let timed_out = self.config.max_ticks > 0 && self.tick >= self.config.max_ticks;
        if !decided && !timed_out {
            return;
        }

        let winner = if decided {
            match alive.as_slice() {
                [only] if self.players.len() >= 2 => Some(only.id),
                _ => None,
            }
        } else {
            let mut best: Option<(usize, u32)> = None;
            let mut tie = false;
            for p in &alive {
                let count = self
                    .map
                    .units()
                    .filter(|(_, id)| {
                        self.map
                            .voxel(*id)
                            .is_some_and(|v| v.voxel_type.is_unit() && v.owner == p.index)
                    })
                    .count();
                match best {
                    Some((n, _)) if count < n => {}
                    Some((n, _)) if count == n => tie = true,
                    _ => {
                        best = Some((count, p.id));
                        tie = false;
                    }
                }
            }
            if tie { None } else { best.map(|(_, id)| id) }
        };

        self.phase = MatchPhase::Ended;
        self.winner = winner;
        info!("Match ended at tick {} (winner: {:?})", self.tick, winner);
        bundle.push(BundleCommand::MatchEnded { winner });
    }

    // ---- Queries ----

    /// Inputs drained by the last tick, in drain order.
    pub fn last_inputs(&self) -> &[MatchInput] {
        &self.last_inputs
    }

    /// Bundle of the last tick, `None` if it was a no-op.
    pub fn last_bundle(&self) -> Option<&CommandsBundle> {
        self.last_bundle.as_ref()
    }

    pub fn map(&self) -> &MapRoot {
        &self.map
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn current_tick(&self) -> i64 {
        self.tick
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn winner(&self) -> Option<u32> {
        self.winner
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.task_state(id)
    }

    pub fn unit_coordinate(&self, unit: i32) -> Option<Coordinate> {
        self.map.unit_coordinate(unit)
    }

    pub fn player(&self, id: u32) -> Option<&PlayerInfo> {
        self.players.get(&id)
    }

    /// Registered players in id order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerInfo> {
        self.players.values()
    }

    /// Number of inputs waiting for the next tick.
    pub fn pending_inputs(&self) -> usize {
        self.pending.len()
    }
}
