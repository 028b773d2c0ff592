//! Server configuration.

use serde::{Deserialize, Serialize};
use sim::SimConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub room: RoomConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from `path`, writing the defaults there if the file
    /// does not exist yet.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }
}

/// Server networking and general settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
    /// Server name shown to clients.
    #[serde(default = "default_name")]
    pub name: String,
    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
            name: default_name(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

fn default_port() -> u16 {
    11443
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_ip_limit() -> usize {
    100
}
fn default_name() -> String {
    "Voxel Arena".to_string()
}
fn default_tick_interval() -> u64 {
    50
}

/// Per-room match settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomConfig {
    /// Human players needed before the match starts on its own.
    #[serde(default = "default_players")]
    pub players: usize,
    /// Bot players added when the match starts.
    #[serde(default = "default_bots")]
    pub bots: usize,
    /// Seconds a room may stay without connections before it is dropped.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Seconds between idle-room sweeps.
    #[serde(default = "default_gc_interval")]
    pub gc_interval_secs: u64,
    /// Where finished matches are written (empty = don't record).
    #[serde(default = "default_replay_dir")]
    pub replay_dir: PathBuf,
    /// Map file to load instead of generating one.
    #[serde(default)]
    pub map_path: Option<PathBuf>,
    /// Weight of generated maps.
    #[serde(default = "default_map_weight")]
    pub map_weight: u32,
    /// Level the generated ground is laid at.
    #[serde(default = "default_ground_weight")]
    pub ground_weight: i32,
    /// Camera radius given to new sessions.
    #[serde(default = "default_camera_radius")]
    pub camera_radius: i32,
}

impl RoomConfig {
    /// Player slots of a room: humans first, then bots.
    pub fn slots(&self) -> usize {
        self.players + self.bots
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            players: default_players(),
            bots: default_bots(),
            idle_timeout_secs: default_idle_timeout(),
            gc_interval_secs: default_gc_interval(),
            replay_dir: default_replay_dir(),
            map_path: None,
            map_weight: default_map_weight(),
            ground_weight: default_ground_weight(),
            camera_radius: default_camera_radius(),
        }
    }
}

fn default_players() -> usize {
    2
}
fn default_bots() -> usize {
    0
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_gc_interval() -> u64 {
    10
}
fn default_replay_dir() -> PathBuf {
    PathBuf::from("replays")
}
fn default_map_weight() -> u32 {
    6
}
fn default_ground_weight() -> i32 {
    2
}
fn default_camera_radius() -> i32 {
    4
}
