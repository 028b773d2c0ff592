//! Deterministic voxel match simulation.
//!
//! The map is a quad-tree of cells holding vertical chains of voxels. Players
//! steer their units with task trees; each tick the match engine advances the
//! trees, the pathfinder and the runners, applies the resulting intents to the
//! map and reports everything observable as a [`CommandsBundle`].

pub mod ai;
pub mod bundle;
pub mod config;
pub mod coords;
pub mod engine;
pub mod error;
pub mod map;
pub mod match_engine;
pub mod pathfinder;
pub mod persist;
pub mod replay;
pub mod runner;
pub mod task;

pub use bundle::{BundleCommand, CommandsBundle};
pub use config::{Abilities, SimConfig, VoxelAbilities};
pub use coords::{Coordinate, Dir, MapPos};
pub use error::{SimError, SimResult};
pub use map::{MapCamera, MapRoot, MapSlice, VoxelData, VoxelType};
pub use match_engine::{MatchEngine, MatchInput, MatchPhase, PlayerInfo};
pub use persist::{MapJob, MapJobDone, MapStore};
pub use replay::{Replay, ReplayPlayer, ReplayRecorder, ReplayVerification};
pub use task::{Cmd, CmdCode, Expression, TaskId, TaskInfo, TaskState, TaskType};
