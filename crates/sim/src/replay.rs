//! Match recording and playback.
//!
//! A replay holds the simulation settings it was recorded under, the
//! starting map, the participants, and for every tick the
//! inputs the engine drained plus the bundle it produced. Ticks are stored
//! append-only and strictly consecutive, including ticks without a bundle.
//! Playback feeds the recorded inputs through the regular engine API and
//! compares the bundles it gets back.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bundle::CommandsBundle;
use crate::config::{Abilities, SimConfig, VoxelAbilities};
use crate::error::{SimError, SimResult};
use crate::map::MapRoot;
use crate::match_engine::{MatchEngine, MatchInput};

pub const REPLAY_MAGIC: [u8; 4] = *b"VXRP";
pub const REPLAY_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: u32,
    pub index: i32,
    pub abilities: Abilities,
    pub bot: bool,
}

/// Everything recorded for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayTick {
    pub tick: i64,
    pub inputs: Vec<MatchInput>,
    pub bundle: Option<CommandsBundle>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    /// Settings the match ran with, seed included.
    pub config: SimConfig,
    /// Encoded starting map.
    pub map: Bytes,
    pub participants: Vec<Participant>,
    pub ticks: Vec<ReplayTick>,
}

impl Replay {
    pub fn to_bytes(&self) -> Bytes {
        protocol::to_bytes(self)
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> SimResult<Self> {
        Ok(protocol::from_bytes(data)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> SimResult<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Last recorded tick, 0 when empty.
    pub fn last_tick(&self) -> i64 {
        self.ticks.last().map_or(0, |t| t.tick)
    }
}

impl Encode for VoxelAbilities {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i32(self.max_health);
        w.put_i32(self.min_height);
        w.put_i32(self.max_height);
        w.put_i64(self.move_ticks);
        w.put_i64(self.act_ticks);
        w.put_i32(self.max_step);
        self.can_split.encode(w);
        self.can_convert.encode(w);
    }
}

impl Decode for VoxelAbilities {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(VoxelAbilities {
            max_health: i32::decode(r)?,
            min_height: i32::decode(r)?,
            max_height: i32::decode(r)?,
            move_ticks: i64::decode(r)?,
            act_ticks: i64::decode(r)?,
            max_step: i32::decode(r)?,
            can_split: bool::decode(r)?,
            can_convert: bool::decode(r)?,
        })
    }
}

impl Encode for SimConfig {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u64(self.seed);
        w.put_i64(self.max_ticks);
        w.put_u64(self.path_budget as u64);
        w.put_u64(self.bot_path_budget as u64);
        w.put_u32(self.max_repath);
        w.put_i32(self.sight_radius);
        w.put_i64(self.bot_think_interval);
        w.put_i64(self.bot_task_timeout);
        w.put_i64(self.spawn_interval);
        self.retain_finished_tasks.encode(w);
    }
}

impl Decode for SimConfig {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let budget = |r: &mut BinaryReader| -> Result<usize, ProtocolError> {
            usize::try_from(u64::decode(r)?).map_err(|_| ProtocolError::InvalidValue("path budget".into()))
        };
        Ok(SimConfig {
            seed: u64::decode(r)?,
            max_ticks: i64::decode(r)?,
            path_budget: budget(r)?,
            bot_path_budget: budget(r)?,
            max_repath: u32::decode(r)?,
            sight_radius: i32::decode(r)?,
            bot_think_interval: i64::decode(r)?,
            bot_task_timeout: i64::decode(r)?,
            spawn_interval: i64::decode(r)?,
            retain_finished_tasks: bool::decode(r)?,
        })
    }
}

impl Encode for Participant {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u32(self.id);
        w.put_i32(self.index);
        self.abilities.eater.encode(w);
        self.abilities.bomb.encode(w);
        self.abilities.spawner.encode(w);
        self.bot.encode(w);
    }
}

impl Decode for Participant {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(Participant {
            id: u32::decode(r)?,
            index: i32::decode(r)?,
            abilities: Abilities {
                eater: VoxelAbilities::decode(r)?,
                bomb: VoxelAbilities::decode(r)?,
                spawner: VoxelAbilities::decode(r)?,
            },
            bot: bool::decode(r)?,
        })
    }
}

impl Encode for ReplayTick {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i64(self.tick);
        self.inputs.encode(w);
        self.bundle.encode(w);
    }
}

impl Decode for ReplayTick {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(ReplayTick {
            tick: i64::decode(r)?,
            inputs: Vec::<MatchInput>::decode(r)?,
            bundle: Option::<CommandsBundle>::decode(r)?,
        })
    }
}

impl Encode for Replay {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_slice(&REPLAY_MAGIC);
        w.put_u32(REPLAY_VERSION);
        self.config.encode(w);
        self.map.encode(w);
        self.participants.encode(w);
        self.ticks.encode(w);
    }
}

impl Decode for Replay {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let magic = r.try_get_bytes(4).ok_or(ProtocolError::UnexpectedEof)?;
        if magic[..] != REPLAY_MAGIC {
            return Err(ProtocolError::BadMagic);
        }
        let version = u32::decode(r)?;
        if version != REPLAY_VERSION {
            return Err(ProtocolError::UnsupportedProtocol(version));
        }
        let replay = Replay {
            config: SimConfig::decode(r)?,
            map: Bytes::decode(r)?,
            participants: Vec::<Participant>::decode(r)?,
            ticks: Vec::<ReplayTick>::decode(r)?,
        };
        for (i, t) in replay.ticks.iter().enumerate() {
            if t.tick != i as i64 + 1 {
                return Err(ProtocolError::InvalidValue(format!("tick {} stored at slot {}", t.tick, i)));
            }
        }
        Ok(replay)
    }
}

/// Builds a [`Replay`] while a match runs.
#[derive(Debug)]
pub struct ReplayRecorder {
    replay: Replay,
}

impl ReplayRecorder {
    /// Start recording from the map as it is before the first tick, for a
    /// match running with `config`.
    pub fn new(map: &MapRoot, config: &SimConfig) -> Self {
        Self {
            replay: Replay {
                config: config.clone(),
                map: map.to_bytes(),
                participants: Vec::new(),
                ticks: Vec::new(),
            },
        }
    }

    pub fn register_player(&mut self, id: u32, index: i32, abilities: Abilities, bot: bool) -> SimResult<()> {
        if !self.replay.ticks.is_empty() {
            return Err(SimError::InvalidState("replay already has ticks"));
        }
        self.replay.participants.push(Participant {
            id,
            index,
            abilities,
            bot,
        });
        Ok(())
    }

    /// Record what `engine` did in `tick`, which must be the tick it just ran
    /// and directly follow the last recorded one.
    pub fn tick(&mut self, engine: &MatchEngine, tick: i64) -> SimResult<()> {
        if tick != self.replay.last_tick() + 1 {
            return Err(SimError::InvalidState("replay ticks must be consecutive"));
        }
        if engine.current_tick() != tick {
            return Err(SimError::InvalidState("engine is not at the recorded tick"));
        }
        self.replay.ticks.push(ReplayTick {
            tick,
            inputs: engine.last_inputs().to_vec(),
            bundle: engine.last_bundle().cloned(),
        });
        Ok(())
    }

    pub fn ticks(&self) -> usize {
        self.replay.ticks.len()
    }

    pub fn replay(&self) -> &Replay {
        &self.replay
    }

    pub fn finish(self) -> Replay {
        self.replay
    }
}

/// Result of comparing a playback against its recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayVerification {
    /// Ticks played.
    pub ticks: i64,
    /// First tick whose bundle differed from the recording.
    pub first_mismatch: Option<i64>,
}

impl ReplayVerification {
    pub fn is_match(&self) -> bool {
        self.first_mismatch.is_none()
    }
}

/// Drives a [`MatchEngine`] from a [`Replay`].
#[derive(Debug)]
pub struct ReplayPlayer {
    replay: Replay,
    cursor: usize,
    first_mismatch: Option<i64>,
}

impl ReplayPlayer {
    pub fn new(replay: Replay) -> Self {
        Self {
            replay,
            cursor: 0,
            first_mismatch: None,
        }
    }

    pub fn replay(&self) -> &Replay {
        &self.replay
    }

    /// Next tick to play, 1-based.
    pub fn position(&self) -> i64 {
        self.cursor as i64 + 1
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.replay.ticks.len()
    }

    /// A fresh engine at tick 0 with the recorded settings, map and
    /// participants.
    pub fn build_engine(&self) -> SimResult<MatchEngine> {
        let map = MapRoot::from_bytes(self.replay.map.clone())?;
        let mut engine = MatchEngine::new(map, self.replay.config.clone());
        for p in &self.replay.participants {
            if p.bot {
                engine.register_bot(p.id, p.index, p.abilities)?;
            } else {
                engine.register_player(p.id, p.index, p.abilities)?;
            }
        }
        engine.complete_player_registration()?;
        Ok(engine)
    }

    /// Rewind to tick 0. The caller pairs this with a fresh engine.
    pub fn seek_start(&mut self) {
        self.cursor = 0;
        self.first_mismatch = None;
    }

    /// Play the next recorded tick on `engine`. Returns whether the produced
    /// bundle matched, or `None` at the end of the recording.
    pub fn step(&mut self, engine: &mut MatchEngine) -> SimResult<Option<bool>> {
        let Some(recorded) = self.replay.ticks.get(self.cursor) else {
            return Ok(None);
        };
        if engine.current_tick() + 1 != recorded.tick {
            return Err(SimError::InvalidState("engine and replay are out of step"));
        }
        for input in &recorded.inputs {
            engine.apply_input(input.clone())?;
        }
        let produced = engine.tick()?;
        let matched = produced.as_ref() == recorded.bundle.as_ref();
        if !matched && self.first_mismatch.is_none() {
            warn!("Replay diverged at tick {}", recorded.tick);
            self.first_mismatch = Some(recorded.tick);
        }
        self.cursor += 1;
        Ok(Some(matched))
    }

    /// Play every remaining tick as fast as possible.
    pub fn play_to_end(&mut self, engine: &mut MatchEngine) -> SimResult<ReplayVerification> {
        while self.step(engine)?.is_some() {}
        Ok(self.verification(engine))
    }

    /// Play the remaining ticks at `speed` times the recorded tick rate.
    pub async fn play_paced(
        &mut self,
        engine: &mut MatchEngine,
        tick_interval: Duration,
        speed: f64,
    ) -> SimResult<ReplayVerification> {
        let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };
        let period = tick_interval.div_f64(speed).max(Duration::from_micros(1));
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!("Playing replay at {:.2}x ({:?} per tick)", speed, period);
        loop {
            interval.tick().await;
            if self.step(engine)?.is_none() {
                break;
            }
        }
        Ok(self.verification(engine))
    }

    fn verification(&self, engine: &MatchEngine) -> ReplayVerification {
        ReplayVerification {
            ticks: engine.current_tick(),
            first_mismatch: self.first_mismatch,
        }
    }

    /// Recompute a whole recording and report the first divergence.
    pub fn verify(replay: Replay) -> SimResult<ReplayVerification> {
        let mut player = ReplayPlayer::new(replay);
        let mut engine = player.build_engine()?;
        let result = player.play_to_end(&mut engine)?;
        info!(
            "Verified {} ticks: {}",
            result.ticks,
            match result.first_mismatch {
                None => "identical".to_string(),
                Some(t) => format!("diverged at tick {t}"),
            }
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BundleCommand;
    use crate::match_engine::MatchPhase;
    use crate::task::{Cmd, CmdCode};

    fn record(ticks: i64) -> (Replay, Vec<Option<CommandsBundle>>) {
        record_with(SimConfig::default(), ticks)
    }

    fn record_with(config: SimConfig, ticks: i64) -> (Replay, Vec<Option<CommandsBundle>>) {
        let map = MapRoot::test_env0().unwrap();
        let mut recorder = ReplayRecorder::new(&map, &config);
        let mut engine = MatchEngine::new(map, config);
        engine.register_player(10, 0, Abilities::defaults()).unwrap();
        engine.register_bot(11, 1, Abilities::defaults()).unwrap();
        recorder.register_player(10, 0, Abilities::defaults(), false).unwrap();
        recorder.register_player(11, 1, Abilities::defaults(), true).unwrap();
        engine.complete_player_registration().unwrap();

        let mut live = Vec::new();
        for tick in 1..=ticks {
            if tick == 3 {
                engine.submit_cmd(10, Cmd::new(CmdCode::Grow, 0)).unwrap();
            }
            if tick == 5 {
                engine.set_player_connected(10, false).unwrap();
            }
            if engine.phase() != MatchPhase::Running {
                break;
            }
            live.push(engine.tick().unwrap());
            recorder.tick(&engine, tick).unwrap();
        }
        (recorder.finish(), live)
    }

    #[test]
    fn test_records_every_tick() {
        let (replay, live) = record(30);
        assert_eq!(replay.ticks.len(), 30);
        let recorded: Vec<Option<CommandsBundle>> = replay.ticks.iter().map(|t| t.bundle.clone()).collect();
        assert_eq!(recorded, live);
        assert!(replay.ticks.iter().enumerate().all(|(i, t)| t.tick == i as i64 + 1));
        let submitted = &replay.ticks[2];
        assert_eq!(submitted.inputs.len(), 1);
    }

    #[test]
    fn test_playback_matches_recording() {
        let (replay, live) = record(60);
        let bytes = replay.to_bytes();
        let replay = Replay::from_bytes(bytes).unwrap();

        let mut player = ReplayPlayer::new(replay.clone());
        let mut engine = player.build_engine().unwrap();
        let mut produced = Vec::new();
        while player.step(&mut engine).unwrap().is_some() {
            produced.push(engine.last_bundle().cloned());
        }
        assert_eq!(produced, live);

        // restart from tick 0 and get the same verdict
        player.seek_start();
        let mut engine = player.build_engine().unwrap();
        let result = player.play_to_end(&mut engine).unwrap();
        assert!(result.is_match());
        assert_eq!(result.ticks, replay.last_tick());
    }

    #[test]
    fn test_recorded_settings_drive_playback() {
        let config = SimConfig {
            seed: 99,
            max_ticks: 25,
            spawn_interval: 7,
            path_budget: 40,
            bot_think_interval: 3,
            sight_radius: 2,
            ..SimConfig::default()
        };
        let (replay, live) = record_with(config.clone(), 40);
        let replay = Replay::from_bytes(replay.to_bytes()).unwrap();
        assert_eq!(replay.config, config);
        assert_eq!(replay.ticks.len(), 25);

        let player = ReplayPlayer::new(replay.clone());
        assert_eq!(player.build_engine().unwrap().config(), &config);

        // playback stops where the recorded settings ended the match
        let result = ReplayPlayer::verify(replay).unwrap();
        assert!(result.is_match());
        assert_eq!(result.ticks, live.len() as i64);
        assert_eq!(result.ticks, 25);

        let (default_run, _) = record(40);
        assert_eq!(default_run.ticks.len(), 40);
    }

    #[test]
    fn test_tampered_recording_is_detected() {
        let (mut replay, _) = record(20);
        let slot = replay.ticks.iter().position(|t| t.bundle.is_some()).unwrap();
        let tick = replay.ticks[slot].tick;
        if let Some(b) = replay.ticks[slot].bundle.as_mut() {
            b.commands.push(BundleCommand::PlayerDefeated { player: 99 });
        }
        let result = ReplayPlayer::verify(replay).unwrap();
        assert_eq!(result.first_mismatch, Some(tick));
    }

    #[test]
    fn test_recorder_rejects_gaps() {
        let map = MapRoot::test_env0().unwrap();
        let mut recorder = ReplayRecorder::new(&map, &SimConfig::default());
        let mut engine = MatchEngine::new(map, SimConfig::default());
        engine.register_player(1, 0, Abilities::defaults()).unwrap();
        engine.complete_player_registration().unwrap();
        engine.tick().unwrap();
        engine.tick().unwrap();
        assert!(recorder.tick(&engine, 2).is_err());
    }

    #[test]
    fn test_bad_header_rejected() {
        let (replay, _) = record(2);
        let mut bytes = replay.to_bytes().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            Replay::from_bytes(bytes),
            Err(SimError::SerializationFailure(ProtocolError::BadMagic))
        ));
    }

    #[tokio::test]
    async fn test_paced_playback() {
        let (replay, _) = record(10);
        let mut player = ReplayPlayer::new(replay);
        let mut engine = player.build_engine().unwrap();
        let result = player
            .play_paced(&mut engine, Duration::from_millis(40), 4.0)
            .await
            .unwrap();
        assert!(result.is_match());
        assert!(player.is_finished());
    }
}
