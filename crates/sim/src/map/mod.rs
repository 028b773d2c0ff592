//! Hierarchical voxel map.

pub mod camera;
mod codec;
mod octree;
mod presets;
mod voxel;

pub use camera::{ColumnView, LayerView, MapCamera, MapSlice};
pub use codec::{MAP_MAGIC, MAP_VERSION};
pub use octree::{CellId, ChainIter, MAX_MAP_WEIGHT, MapCell, MapRoot};
pub use presets::GROUND_HEIGHT;
pub use voxel::{UnitActivity, UnitState, VoxelData, VoxelId, VoxelType};
