//! Voxel arena room server.
//!
//! Rooms are created on first connection, each running one match on its own
//! tick loop, and dropped by a periodic sweep once nobody is connected.

pub mod config;
pub mod net;
pub mod registry;
pub mod room;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use net::run;
pub use registry::{DEFAULT_ROOM, RoomRegistry, RoomSummary, room_id_from_path};
pub use room::{Rejection, Room, RoomHandle, run_room_loop, save_replay};
pub use session::{Session, relay};
