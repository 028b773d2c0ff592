//! Task trees and unit commands.

use std::collections::BTreeSet;

use super::expr::Expression;
use crate::coords::{Coordinate, Dir};
use crate::error::{SimError, SimResult};
use crate::map::VoxelType;

/// Identifier of a task, unique within a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Id of a task not yet accepted by an engine.
    pub const UNASSIGNED: TaskId = TaskId(0);
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out task ids in increasing order, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskIdAlloc {
    next: u64,
}

impl TaskIdAlloc {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> TaskId {
        let id = TaskId(self.next);
        self.next += 1;
        id
    }
}

impl Default for TaskIdAlloc {
    fn default() -> Self {
        Self::new()
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Leaf: one unit command.
    Command = 0,
    /// Runs children in order; completes when the last one does.
    Sequence = 1,
    /// `children[0]` while the guard holds, otherwise `children[1]` if present.
    Branch = 2,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    #[default]
    Idle = 0,
    Active = 1,
    Completed = 2,
    Failed = 3,
}

impl TaskState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmdCode {
    /// Idle for `param` ticks.
    Wait = 0,
    /// Walk to `target`.
    Move = 1,
    /// Grow one height step.
    Grow = 2,
    /// Shrink one height step.
    Diminish = 3,
    /// Split into the neighbour in direction `param`.
    Split = 4,
    /// Turn into the voxel type `param`.
    Convert = 5,
    /// Destroy itself and everything adjacent.
    Explode = 6,
    /// Stop whatever the unit is doing.
    Cancel = 7,
}

/// A single unit action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cmd {
    pub code: CmdCode,
    pub unit: i32,
    pub target: Option<Coordinate>,
    pub param: i32,
}

impl Cmd {
    pub fn new(code: CmdCode, unit: i32) -> Self {
        Self {
            code,
            unit,
            target: None,
            param: 0,
        }
    }

    pub fn wait(unit: i32, ticks: i32) -> Self {
        Self {
            param: ticks,
            ..Self::new(CmdCode::Wait, unit)
        }
    }

    pub fn move_to(unit: i32, target: Coordinate) -> Self {
        Self {
            target: Some(target),
            ..Self::new(CmdCode::Move, unit)
        }
    }

    pub fn split(unit: i32, dir: Dir) -> Self {
        Self {
            param: dir as i32,
            ..Self::new(CmdCode::Split, unit)
        }
    }

    pub fn convert(unit: i32, into: VoxelType) -> Self {
        Self {
            param: into as i32,
            ..Self::new(CmdCode::Convert, unit)
        }
    }

    /// Shape checks that need no map.
    pub fn validate(&self) -> SimResult<()> {
        match self.code {
            CmdCode::Move if self.target.is_none() => {
                Err(SimError::InvalidTarget("move without target".into()))
            }
            CmdCode::Wait if self.param < 0 => Err(SimError::InvalidTarget(format!("wait {} ticks", self.param))),
            CmdCode::Split if Dir::from_index(self.param).is_none() => {
                Err(SimError::InvalidTarget(format!("split direction {}", self.param)))
            }
            CmdCode::Convert => match u8::try_from(self.param).ok().and_then(VoxelType::from_u8) {
                Some(VoxelType::Eater | VoxelType::Bomb | VoxelType::Spawner) => Ok(()),
                _ => Err(SimError::InvalidTarget(format!("convert into {}", self.param))),
            },
            _ => Ok(()),
        }
    }
}

/// A node of a task tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub task_type: TaskType,
    pub cmd: Option<Cmd>,
    /// Guard evaluated every tick while the task is live.
    pub expression: Option<Expression>,
    pub state: TaskState,
    pub children: Vec<TaskInfo>,
    /// Id of the enclosing task; `None` for a root.
    pub parent: Option<TaskId>,
}

impl TaskInfo {
    fn node(task_type: TaskType) -> Self {
        Self {
            id: TaskId::UNASSIGNED,
            task_type,
            cmd: None,
            expression: None,
            state: TaskState::Idle,
            children: Vec::new(),
            parent: None,
        }
    }

    pub fn command(cmd: Cmd) -> Self {
        Self {
            cmd: Some(cmd),
            ..Self::node(TaskType::Command)
        }
    }

    pub fn sequence(children: Vec<TaskInfo>) -> Self {
        Self {
            children,
            ..Self::node(TaskType::Sequence)
        }
    }

    pub fn branch(guard: Expression, then: TaskInfo, otherwise: Option<TaskInfo>) -> Self {
        let mut children = vec![then];
        children.extend(otherwise);
        Self {
            expression: Some(guard),
            children,
            ..Self::node(TaskType::Branch)
        }
    }

    pub fn with_guard(mut self, guard: Expression) -> Self {
        self.expression = Some(guard);
        self
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn find(&self, id: TaskId) -> Option<&TaskInfo> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    pub fn find_mut(&mut self, id: TaskId) -> Option<&mut TaskInfo> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Pre-order traversal.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a TaskInfo)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TaskInfo::node_count).sum::<usize>()
    }

    /// Point every child's `parent` at its enclosing node.
    pub fn relink_parents(&mut self) {
        let id = self.id;
        for child in &mut self.children {
            child.parent = Some(id);
            child.relink_parents();
        }
    }

    /// Give every node a fresh id (pre-order) and relink parents.
    pub fn assign_ids(&mut self, alloc: &mut TaskIdAlloc) {
        self.id = alloc.next_id();
        for child in &mut self.children {
            child.assign_ids(alloc);
        }
        self.relink_parents();
    }

    /// Deep copy with fresh ids; parents of the copy point into the copy.
    pub fn clone_with_ids(&self, alloc: &mut TaskIdAlloc) -> TaskInfo {
        let mut copy = self.clone();
        copy.assign_ids(alloc);
        copy.parent = None;
        copy
    }

    /// Units referenced by commands anywhere in the tree.
    pub fn units(&self) -> BTreeSet<i32> {
        let mut out = BTreeSet::new();
        self.walk(&mut |t| {
            if let Some(cmd) = &t.cmd {
                out.insert(cmd.unit);
            }
        });
        out
    }

    /// Shape checks: commands are leaves with a payload, sequences have
    /// children, branches have a guard and one or two children.
    pub fn validate(&self) -> SimResult<()> {
        match self.task_type {
            TaskType::Command => {
                let cmd = self
                    .cmd
                    .as_ref()
                    .ok_or_else(|| SimError::InvalidTarget("command task without command".into()))?;
                if !self.children.is_empty() {
                    return Err(SimError::InvalidTarget("command task with children".into()));
                }
                cmd.validate()?;
            }
            TaskType::Sequence => {
                if self.children.is_empty() || self.cmd.is_some() {
                    return Err(SimError::InvalidTarget("malformed sequence".into()));
                }
            }
            TaskType::Branch => {
                if self.expression.is_none() || self.children.is_empty() || self.children.len() > 2 || self.cmd.is_some()
                {
                    return Err(SimError::InvalidTarget("malformed branch".into()));
                }
            }
        }
        self.children.iter().try_for_each(TaskInfo::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Expression;

    fn sample() -> TaskInfo {
        TaskInfo::sequence(vec![
            TaskInfo::command(Cmd::wait(1, 2)),
            TaskInfo::branch(
                Expression::unit_exists(1),
                TaskInfo::command(Cmd::move_to(1, Coordinate::new(2, 2, 6, 2))),
                None,
            ),
        ])
    }

    #[test]
    fn test_clone_with_ids_relinks_into_clone() {
        let mut alloc = TaskIdAlloc::new();
        let mut original = sample();
        original.assign_ids(&mut alloc);
        let copy = original.clone_with_ids(&mut alloc);

        assert_ne!(copy.id, original.id);
        assert_eq!(copy.children.len(), 2);
        for child in &copy.children {
            assert_eq!(child.parent, Some(copy.id));
            assert_ne!(child.parent, Some(original.id));
        }
        let inner = &copy.children[1].children[0];
        assert_eq!(inner.parent, Some(copy.children[1].id));
        assert_eq!(copy.find(inner.id), Some(inner));
        assert!(original.find(inner.id).is_none());
    }

    #[test]
    fn test_ids_are_preorder() {
        let mut alloc = TaskIdAlloc::new();
        let mut tree = sample();
        tree.assign_ids(&mut alloc);
        let mut ids = Vec::new();
        tree.walk(&mut |t| ids.push(t.id.0));
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(tree.node_count(), 4);
        assert_eq!(tree.units().into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_validate_shapes() {
        assert!(sample().validate().is_ok());
        assert!(TaskInfo::sequence(vec![]).validate().is_err());
        let mut bad = TaskInfo::command(Cmd::new(CmdCode::Move, 1));
        assert!(bad.validate().is_err());
        bad.cmd = Some(Cmd::split(1, Dir::East));
        assert!(bad.validate().is_ok());
        assert!(TaskInfo::command(Cmd { param: 9, ..Cmd::new(CmdCode::Convert, 1) }).validate().is_err());
    }
}
