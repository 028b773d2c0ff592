//! A room hosts one match: the engine, its recorder and the sessions
//! watching it.

use bytes::Bytes;
use protocol::packets::{self, RejectCode};
use sim::{
    Abilities, MapCamera, MapRoot, MapStore, MatchEngine, MatchPhase, ReplayRecorder, SimError, TaskInfo,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::config::Config;

/// Capacity of a room's outbound packet channel.
const ROOM_CHANNEL_CAPACITY: usize = 64;

/// Shared handle to a room.
pub type RoomHandle = Arc<RwLock<Room>>;

/// A human slot taken by a session.
#[derive(Debug, Clone)]
pub struct Seat {
    pub player_id: u32,
    pub index: i32,
    pub name: String,
    pub connected: bool,
}

/// A request refused by the room, with the code sent to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: RejectCode,
    pub message: String,
}

impl Rejection {
    pub fn new(code: RejectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn to_packet(&self) -> Bytes {
        packets::build_rejected(self.code, &self.message).finish()
    }
}

impl From<SimError> for Rejection {
    fn from(e: SimError) -> Self {
        let code = match e {
            SimError::InvalidState(_) => RejectCode::InvalidState,
            SimError::InvalidOwner { .. } => RejectCode::InvalidOwner,
            SimError::InvalidTarget(_) | SimError::Unreachable(_) => RejectCode::InvalidTarget,
            SimError::OutOfRange { .. } => RejectCode::OutOfRange,
            SimError::SerializationFailure(_) | SimError::Io(_) => RejectCode::Malformed,
        };
        Self::new(code, e.to_string())
    }
}

pub struct Room {
    pub id: String,
    config: Arc<Config>,
    engine: MatchEngine,
    recorder: ReplayRecorder,
    packet_tx: broadcast::Sender<Bytes>,
    seats: BTreeMap<u32, Seat>,
    next_player_id: u32,
    connections: usize,
    empty_since: Option<Instant>,
    closed: bool,
    replay_path: Option<PathBuf>,
}

impl Room {
    /// Build a room around `map`. Nothing runs until [`run_room_loop`] is
    /// spawned for it.
    pub fn new(id: impl Into<String>, config: Arc<Config>, map: MapRoot) -> Self {
        let recorder = ReplayRecorder::new(&map, &config.sim);
        let engine = MatchEngine::new(map, config.sim.clone());
        let (packet_tx, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            config,
            engine,
            recorder,
            packet_tx,
            seats: BTreeMap::new(),
            next_player_id: 1,
            connections: 0,
            empty_since: Some(Instant::now()),
            closed: false,
            replay_path: None,
        }
    }

    /// Load the configured map file or generate one for the room's slots.
    pub async fn load_map(config: &Config) -> anyhow::Result<MapRoot> {
        let room = &config.room;
        let generated = MapRoot::generate(room.map_weight, room.ground_weight, room.slots(), config.sim.seed)?;
        let Some(path) = &room.map_path else {
            return Ok(generated);
        };
        let camera = MapCamera::new(Default::default(), room.ground_weight, room.camera_radius);
        let mut store = MapStore::new(generated, camera);
        store.load(path.clone())?;
        if let Some(result) = store.wait().await {
            result?;
        }
        Ok(store.map().clone())
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    pub fn phase(&self) -> MatchPhase {
        self.engine.phase()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.packet_tx.subscribe()
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn empty_since(&self) -> Option<Instant> {
        self.empty_since
    }

    pub fn seats(&self) -> impl Iterator<Item = &Seat> {
        self.seats.values()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Where the replay of a finished match was written.
    pub fn replay_path(&self) -> Option<&PathBuf> {
        self.replay_path.as_ref()
    }

    fn broadcast(&self, packet: Bytes) {
        // no receivers is fine
        let _ = self.packet_tx.send(packet);
    }

    // ---- Connections ----

    pub fn connect(&mut self) {
        self.connections += 1;
        self.empty_since = None;
    }

    /// Drop a connection. A player's seat is kept and marked disconnected;
    /// their units keep running the programs they already have.
    pub fn disconnect(&mut self, player_id: Option<u32>) {
        self.connections = self.connections.saturating_sub(1);
        if self.connections == 0 {
            self.empty_since = Some(Instant::now());
        }
        let Some(seat) = player_id.and_then(|id| self.seats.get_mut(&id)) else {
            return;
        };
        seat.connected = false;
        let (id, index) = (seat.player_id, seat.index);
        if self.engine.phase() != MatchPhase::Ended {
            if let Err(e) = self.engine.set_player_connected(id, false) {
                debug!("Room {}: could not mark player {} disconnected: {}", self.id, id, e);
            }
        }
        self.broadcast(packets::build_player_state(index, false).finish());
        info!("Room {}: player {} left", self.id, id);
    }

    // ---- Requests ----

    /// Take the next human slot. The match starts once every human slot is
    /// taken.
    pub fn join(&mut self, name: &str) -> Result<Seat, Rejection> {
        if self.engine.phase() != MatchPhase::Registration {
            return Err(Rejection::new(RejectCode::InvalidState, "match already started"));
        }
        if self.seats.len() >= self.config.room.players {
            return Err(Rejection::new(RejectCode::RoomFull, "no free player slot"));
        }
        let index = self.seats.len() as i32;
        let player_id = self.take_player_id();
        self.engine.register_player(player_id, index, Abilities::defaults())?;
        self.recorder
            .register_player(player_id, index, Abilities::defaults(), false)?;
        let seat = Seat {
            player_id,
            index,
            name: name.to_string(),
            connected: true,
        };
        self.seats.insert(player_id, seat.clone());
        info!("Room {}: {} joined as player {} (index {})", self.id, name, player_id, index);
        self.broadcast(packets::build_player_state(index, true).finish());

        if self.seats.len() == self.config.room.players {
            self.start_match()?;
        }
        Ok(seat)
    }

    /// Fill the free slots with bots and close registration.
    pub fn start_match(&mut self) -> Result<(), Rejection> {
        if self.engine.phase() != MatchPhase::Registration {
            return Err(Rejection::new(RejectCode::InvalidState, "match already started"));
        }
        for index in self.seats.len()..self.config.room.slots() {
            let player_id = self.take_player_id();
            self.engine
                .register_bot(player_id, index as i32, Abilities::defaults())?;
            self.recorder
                .register_player(player_id, index as i32, Abilities::defaults(), true)?;
        }
        self.engine.complete_player_registration()?;
        let players = self.engine.players().count() as u32;
        info!("Room {}: match started with {} players", self.id, players);
        self.broadcast(
            packets::build_match_started(
                self.config.sim.seed,
                self.config.server.tick_interval_ms as u32,
                players,
            )
            .finish(),
        );
        Ok(())
    }

    pub fn submit(&mut self, player_id: u32, tree: TaskInfo) -> Result<(), Rejection> {
        self.engine.submit(player_id, tree).map_err(Rejection::from)
    }

    fn take_player_id(&mut self) -> u32 {
        let id = self.next_player_id;
        self.next_player_id += 1;
        id
    }

    // ---- Ticking ----

    /// Run one tick, record it and broadcast the bundle. Returns `false`
    /// while there is nothing to tick.
    pub fn tick(&mut self) -> anyhow::Result<bool> {
        if self.engine.phase() != MatchPhase::Running {
            return Ok(false);
        }
        let bundle = self.engine.tick()?;
        self.recorder.tick(&self.engine, self.engine.current_tick())?;
        if let Some(bundle) = bundle {
            self.broadcast(packets::build_bundle(&bundle.to_bytes()).finish());
        }
        if self.engine.phase() == MatchPhase::Ended {
            let winner = self.engine.winner().map_or(-1, |w| w as i32);
            info!(
                "Room {}: match ended at tick {} (winner {})",
                self.id,
                self.engine.current_tick(),
                winner
            );
            self.broadcast(packets::build_match_ended(self.engine.current_tick(), winner).finish());
        }
        Ok(true)
    }

    /// Target file and encoded recording, or `None` when replays are off.
    pub fn replay_snapshot(&self) -> Option<(PathBuf, Bytes)> {
        let dir = &self.config.room.replay_dir;
        if dir.as_os_str().is_empty() {
            return None;
        }
        let path = dir.join(format!("{}-{}.replay", self.id, self.config.sim.seed));
        Some((path, self.recorder.replay().to_bytes()))
    }
}

/// Write the recording of `room` into the replay directory. The room is
/// only locked to take the snapshot and to note the saved path.
pub async fn save_replay(room: &RoomHandle) -> anyhow::Result<Option<PathBuf>> {
    let Some((path, bytes)) = room.read().await.replay_snapshot() else {
        return Ok(None);
    };
    let target = path.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        if let Some(dir) = target.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&target, &bytes)?;
        Ok(())
    })
    .await??;

    let mut room = room.write().await;
    info!("Room {}: replay saved to {}", room.id, path.display());
    room.replay_path = Some(path.clone());
    Ok(Some(path))
}

/// Tick a room until its match ends or it is closed.
pub async fn run_room_loop(handle: RoomHandle, tick_interval_ms: u64) {
    let interval = Duration::from_millis(tick_interval_ms.max(1));
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let tick_budget = tick_interval_ms as f64 * 0.9;
    let mut total_ms = 0.0;

    loop {
        ticker.tick().await;

        let mut room = handle.write().await;
        if room.is_closed() {
            debug!("Room {} closed, stopping its loop", room.id);
            return;
        }

        let tick_start = std::time::Instant::now();
        match room.tick() {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                warn!("Room {}: tick failed: {}", room.id, e);
                return;
            }
        }
        let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
        total_ms += tick_ms;

        let tick = room.engine().current_tick();
        if tick_ms > tick_budget {
            warn!(
                "Room {}: slow tick #{}: {:.3}ms (budget: {:.1}ms)",
                room.id, tick, tick_ms, tick_budget
            );
        }
        if tick % 400 == 0 {
            debug!(
                "Room {}: tick #{} avg {:.3}ms over the last 400 ticks, {} connections",
                room.id,
                tick,
                total_ms / 400.0,
                room.connections()
            );
            total_ms = 0.0;
        }

        if room.phase() == MatchPhase::Ended {
            let id = room.id.clone();
            drop(room);
            if let Err(e) = save_replay(&handle).await {
                warn!("Room {}: failed to save replay: {}", id, e);
            }
            return;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_config(players: usize, bots: usize) -> Arc<Config> {
        let mut config = Config::default();
        config.room.players = players;
        config.room.bots = bots;
        config.room.map_weight = 5;
        config.room.ground_weight = 2;
        config.room.replay_dir = PathBuf::new();
        config.server.tick_interval_ms = 5;
        config.sim.seed = 17;
        Arc::new(config)
    }

    async fn room(players: usize, bots: usize) -> Room {
        let config = test_config(players, bots);
        let map = Room::load_map(&config).await.unwrap();
        Room::new("test", config, map)
    }

    #[tokio::test]
    async fn test_join_fills_then_starts() {
        let mut room = room(1, 1).await;
        let mut rx = room.subscribe();
        assert!(!room.tick().unwrap());

        let seat = room.join("alice").unwrap();
        assert_eq!(seat.index, 0);
        assert_eq!(room.phase(), MatchPhase::Running);
        assert_eq!(room.engine().players().filter(|p| p.bot).count(), 1);

        // PlayerState then MatchStarted
        assert_eq!(rx.recv().await.unwrap()[0], 0x30);
        assert_eq!(rx.recv().await.unwrap()[0], 0x41);

        let rejection = room.join("bob").unwrap_err();
        assert_eq!(rejection.code, RejectCode::InvalidState);
    }

    #[tokio::test]
    async fn test_room_full_and_early_start() {
        let mut room = room(2, 0).await;
        room.join("alice").unwrap();
        assert_eq!(room.phase(), MatchPhase::Registration);
        room.start_match().unwrap();
        assert_eq!(room.phase(), MatchPhase::Running);
        // the empty human slot went to a bot
        assert_eq!(room.engine().players().count(), 2);
        assert!(room.start_match().is_err());
    }

    #[tokio::test]
    async fn test_ticks_are_recorded_and_broadcast() {
        let mut room = room(1, 1).await;
        room.join("alice").unwrap();
        let mut rx = room.subscribe();
        for _ in 0..50 {
            assert!(room.tick().unwrap());
        }
        assert_eq!(room.recorder.ticks(), 50);
        let mut bundles = 0;
        while let Ok(packet) = rx.try_recv() {
            if packet[0] == 0x10 {
                bundles += 1;
            }
        }
        let recorded = room.recorder.replay().ticks.iter().filter(|t| t.bundle.is_some()).count();
        assert_eq!(bundles, recorded);
    }

    #[tokio::test]
    async fn test_disconnect_tracks_empty_rooms() {
        let mut room = room(2, 0).await;
        room.connect();
        room.connect();
        assert_eq!(room.empty_since(), None);
        let seat = room.join("alice").unwrap();
        room.disconnect(Some(seat.player_id));
        assert_eq!(room.connections(), 1);
        assert!(room.empty_since().is_none());
        assert!(!room.seats().next().unwrap().connected);
        room.disconnect(None);
        assert!(room.empty_since().is_some());
    }

    #[tokio::test]
    async fn test_replay_saved_after_match_end() {
        let mut config = (*test_config(1, 1)).clone();
        let dir = std::env::temp_dir().join(format!("arena-replays-{}", std::process::id()));
        config.room.replay_dir = dir.clone();
        config.sim.max_ticks = 12;
        let config = Arc::new(config);
        let map = Room::load_map(&config).await.unwrap();
        let handle: RoomHandle = Arc::new(RwLock::new(Room::new("saved", config, map)));
        handle.write().await.join("alice").unwrap();

        run_room_loop(Arc::clone(&handle), 1).await;

        let path = handle.read().await.replay_path().cloned().unwrap();
        assert_eq!(path, dir.join("saved-17.replay"));
        let replay = sim::Replay::load(&path).unwrap();
        assert_eq!(replay.last_tick(), 12);
        assert!(sim::ReplayPlayer::verify(replay).unwrap().is_match());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejection_codes() {
        let r = Rejection::from(SimError::InvalidOwner { player: 1, unit: 2 });
        assert_eq!(r.code, RejectCode::InvalidOwner);
        let r = Rejection::from(SimError::OutOfRange { row: 1, col: 1, weight: 0 });
        assert_eq!(r.code, RejectCode::OutOfRange);
        assert_eq!(r.to_packet()[..2], [0x12, RejectCode::OutOfRange as u8]);
    }
}
