//! Per-tick simulation output.
//!
//! A bundle lists every observable change of one tick in the order the match
//! engine produced it. Its encoding is canonical: identical inputs give
//! identical bytes.

use bytes::Bytes;
use protocol::codec::read_tag;
use protocol::{BinaryReader, BinaryWriter, Decode, Encode, ProtocolError};

use crate::coords::Coordinate;
use crate::map::VoxelType;
use crate::task::{TaskId, TaskState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BundleCommand {
    /// A submission was accepted into the task engine.
    Submitted { player: u32, unit: i32, task: TaskId },
    TaskStateChanged {
        task: TaskId,
        unit: i32,
        from: TaskState,
        to: TaskState,
    },
    Moved { unit: i32, from: Coordinate, to: Coordinate },
    HeightChanged { unit: i32, height: i32, health: i32 },
    Split { unit: i32, child: i32, at: Coordinate },
    Converted { unit: i32, into: VoxelType },
    Exploded { unit: i32, at: Coordinate },
    /// Indexed voxel `index` was destroyed by unit `by`.
    Destroyed { index: i32, by: i32 },
    Ate { unit: i32, food: i32, health: i32 },
    Spawned { unit: i32, owner: i32, at: Coordinate },
    PlayerStateChanged { player: u32, connected: bool },
    PlayerDefeated { player: u32 },
    MatchEnded { winner: Option<u32> },
}

impl BundleCommand {
    fn tag(&self) -> u8 {
        match self {
            BundleCommand::Submitted { .. } => 0,
            BundleCommand::TaskStateChanged { .. } => 1,
            BundleCommand::Moved { .. } => 2,
            BundleCommand::HeightChanged { .. } => 3,
            BundleCommand::Split { .. } => 4,
            BundleCommand::Converted { .. } => 5,
            BundleCommand::Exploded { .. } => 6,
            BundleCommand::Destroyed { .. } => 7,
            BundleCommand::Ate { .. } => 8,
            BundleCommand::Spawned { .. } => 9,
            BundleCommand::PlayerStateChanged { .. } => 10,
            BundleCommand::PlayerDefeated { .. } => 11,
            BundleCommand::MatchEnded { .. } => 12,
        }
    }
}

impl Encode for BundleCommand {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_u8(self.tag());
        match self {
            BundleCommand::Submitted { player, unit, task } => {
                w.put_u32(*player);
                w.put_i32(*unit);
                task.encode(w);
            }
            BundleCommand::TaskStateChanged { task, unit, from, to } => {
                task.encode(w);
                w.put_i32(*unit);
                from.encode(w);
                to.encode(w);
            }
            BundleCommand::Moved { unit, from, to } => {
                w.put_i32(*unit);
                from.encode(w);
                to.encode(w);
            }
            BundleCommand::HeightChanged { unit, height, health } => {
                w.put_i32(*unit);
                w.put_i32(*height);
                w.put_i32(*health);
            }
            BundleCommand::Split { unit, child, at } => {
                w.put_i32(*unit);
                w.put_i32(*child);
                at.encode(w);
            }
            BundleCommand::Converted { unit, into } => {
                w.put_i32(*unit);
                into.encode(w);
            }
            BundleCommand::Exploded { unit, at } => {
                w.put_i32(*unit);
                at.encode(w);
            }
            BundleCommand::Destroyed { index, by } => {
                w.put_i32(*index);
                w.put_i32(*by);
            }
            BundleCommand::Ate { unit, food, health } => {
                w.put_i32(*unit);
                w.put_i32(*food);
                w.put_i32(*health);
            }
            BundleCommand::Spawned { unit, owner, at } => {
                w.put_i32(*unit);
                w.put_i32(*owner);
                at.encode(w);
            }
            BundleCommand::PlayerStateChanged { player, connected } => {
                w.put_u32(*player);
                connected.encode(w);
            }
            BundleCommand::PlayerDefeated { player } => w.put_u32(*player),
            BundleCommand::MatchEnded { winner } => winner.encode(w),
        }
    }
}

impl Decode for BundleCommand {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(match read_tag(r)? {
            0 => BundleCommand::Submitted {
                player: u32::decode(r)?,
                unit: i32::decode(r)?,
                task: TaskId::decode(r)?,
            },
            1 => BundleCommand::TaskStateChanged {
                task: TaskId::decode(r)?,
                unit: i32::decode(r)?,
                from: TaskState::decode(r)?,
                to: TaskState::decode(r)?,
            },
            2 => BundleCommand::Moved {
                unit: i32::decode(r)?,
                from: Coordinate::decode(r)?,
                to: Coordinate::decode(r)?,
            },
            3 => BundleCommand::HeightChanged {
                unit: i32::decode(r)?,
                height: i32::decode(r)?,
                health: i32::decode(r)?,
            },
            4 => BundleCommand::Split {
                unit: i32::decode(r)?,
                child: i32::decode(r)?,
                at: Coordinate::decode(r)?,
            },
            5 => BundleCommand::Converted {
                unit: i32::decode(r)?,
                into: VoxelType::decode(r)?,
            },
            6 => BundleCommand::Exploded {
                unit: i32::decode(r)?,
                at: Coordinate::decode(r)?,
            },
            7 => BundleCommand::Destroyed {
                index: i32::decode(r)?,
                by: i32::decode(r)?,
            },
            8 => BundleCommand::Ate {
                unit: i32::decode(r)?,
                food: i32::decode(r)?,
                health: i32::decode(r)?,
            },
            9 => BundleCommand::Spawned {
                unit: i32::decode(r)?,
                owner: i32::decode(r)?,
                at: Coordinate::decode(r)?,
            },
            10 => BundleCommand::PlayerStateChanged {
                player: u32::decode(r)?,
                connected: bool::decode(r)?,
            },
            11 => BundleCommand::PlayerDefeated { player: u32::decode(r)? },
            12 => BundleCommand::MatchEnded {
                winner: Option::<u32>::decode(r)?,
            },
            tag => return Err(ProtocolError::InvalidTag { what: "bundle command", tag }),
        })
    }
}

/// Everything observable that happened in one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandsBundle {
    pub tick: i64,
    pub commands: Vec<BundleCommand>,
}

impl CommandsBundle {
    pub fn new(tick: i64) -> Self {
        Self {
            tick,
            commands: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push(&mut self, command: BundleCommand) {
        self.commands.push(command);
    }

    pub fn to_bytes(&self) -> Bytes {
        protocol::to_bytes(self)
    }

    pub fn match_ended(&self) -> bool {
        self.commands
            .iter()
            .any(|c| matches!(c, BundleCommand::MatchEnded { .. }))
    }
}

impl Encode for CommandsBundle {
    fn encode(&self, w: &mut BinaryWriter) {
        w.put_i64(self.tick);
        self.commands.encode(w);
    }
}

impl Decode for CommandsBundle {
    fn decode(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        Ok(CommandsBundle {
            tick: i64::decode(r)?,
            commands: Vec::<BundleCommand>::decode(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::from_bytes;

    #[test]
    fn test_bundle_roundtrip() {
        let c = Coordinate::new(1, 2, 6, 2);
        let bundle = CommandsBundle {
            tick: 42,
            commands: vec![
                BundleCommand::Submitted {
                    player: 7,
                    unit: 1,
                    task: TaskId(3),
                },
                BundleCommand::Moved {
                    unit: 1,
                    from: c,
                    to: c.add(0, 1),
                },
                BundleCommand::Converted {
                    unit: 1,
                    into: VoxelType::Bomb,
                },
                BundleCommand::MatchEnded { winner: None },
            ],
        };
        let back: CommandsBundle = from_bytes(bundle.to_bytes()).unwrap();
        assert_eq!(back, bundle);
        assert!(back.match_ended());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut w = BinaryWriter::new();
        w.put_i64(1);
        w.put_u32(1);
        w.put_u8(99);
        assert!(from_bytes::<CommandsBundle>(w.finish()).is_err());
    }
}
